//! HTTP middleware components.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{error, info, warn};

use crate::state::AppState;

/// Request timing header name.
pub const REQUEST_TIMING_HEADER: &str = "X-Response-Time";

/// Times each request, logs it and records it in the metrics registry.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    // Label by route template so path parameters don't explode cardinality.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    let duration_ms = duration.as_secs_f64() * 1000.0;

    if let Ok(value) = HeaderValue::from_str(&format!("{duration_ms:.2}ms")) {
        response.headers_mut().insert(REQUEST_TIMING_HEADER, value);
    }

    let status = response.status();
    state
        .metrics
        .record_request(method.as_str(), &path, status.as_u16(), duration)
        .await;

    if status.is_success() {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %format!("{:.2}", duration_ms),
            "Request completed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %format!("{:.2}", duration_ms),
            "Client error"
        );
    } else {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %format!("{:.2}", duration_ms),
            "Server error"
        );
    }

    response
}
