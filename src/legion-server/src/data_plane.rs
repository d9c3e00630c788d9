//! Content served by an active legion.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::Uri;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
struct LegionInfo {
    port: u16,
    role: String,
}

/// Router for one legion's listener.
pub fn router(port: u16, role: &str) -> Router {
    let info = Arc::new(LegionInfo {
        port,
        role: role.to_string(),
    });
    Router::new()
        .route("/", get(role_text))
        .fallback(acknowledge)
        .with_state(info)
}

async fn role_text(State(info): State<Arc<LegionInfo>>) -> String {
    info.role.clone()
}

async fn acknowledge(State(info): State<Arc<LegionInfo>>, uri: Uri) -> Json<Value> {
    Json(json!({
        "legion": info.port,
        "role": info.role,
        "acknowledged": true,
        "path": uri.path(),
    }))
}

/// A listener that stopped serving on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub port: u16,
    pub reason: String,
}

/// Serve `listener` until `token` is cancelled.
///
/// A serve error is reported on `failures`.
pub fn spawn(
    listener: TcpListener,
    port: u16,
    role: &str,
    token: CancellationToken,
    failures: UnboundedSender<ListenerFailure>,
) -> JoinHandle<()> {
    let app = router(port, role);
    tokio::spawn(async move {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
        match result {
            Ok(()) => debug!(port, ?local, "Legion listener closed"),
            Err(e) => {
                warn!(port, error = %e, "Legion listener failed");
                let _ = failures.send(ListenerFailure {
                    port,
                    reason: format!("listener: {e}"),
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_root_serves_role() {
        let response = router(5001, "Reconnaissance")
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Reconnaissance");
    }

    #[tokio::test]
    async fn test_any_path_is_acknowledged() {
        let response = router(5002, "Surveillance")
            .oneshot(Request::post("/feeds/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["acknowledged"], json!(true));
        assert_eq!(value["legion"], json!(5002));
        assert_eq!(value["path"], json!("/feeds/7"));
    }
}
