//! Legion Server - control plane for supervised legion listeners.
//!
//! This crate provides:
//! - Legion lifecycle management with a failure-threshold health policy
//! - An authenticated admin API for decrees, status, metrics and diagnostics
//! - HTTP endpoints that delegate to the `legion-tools` bridge
//! - A process supervisor that runs one worker per core with crash respawn
//!
//! Each worker owns its entire state. With more than one worker, legion
//! status and failure counts are per worker; run a single worker when they
//! must be consistent.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod api;
pub mod auth;
pub mod config;
pub mod data_plane;
pub mod decree;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod legion;
pub mod metrics;
pub mod middleware;
pub mod net;
pub mod state;
pub mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::ServerConfig;
pub use error::{AppError, AppResult};
pub use state::AppState;

/// Run a worker until `shutdown` resolves.
///
/// Active legions are closed once the signal arrives, before in-flight
/// control-plane requests finish.
pub async fn run_with_shutdown<F>(
    config: ServerConfig,
    worker_id: Option<usize>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let state = Arc::new(AppState::new(config.clone(), worker_id).await?);
    let failure_watch = CancellationToken::new();
    tokio::spawn({
        let state = Arc::clone(&state);
        let failure_watch = failure_watch.clone();
        async move { state.legions.watch_listener_failures(failure_watch).await }
    });
    mobilize_autostart(&state).await;

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = net::bind_shared(addr)?;
    info!(?worker_id, %addr, "Control plane listening");

    let app = create_router_with_state(Arc::clone(&state));
    let state_for_cleanup = Arc::clone(&state);
    let grace = Duration::from_secs(config.shutdown_timeout);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            failure_watch.cancel();
            let closed = state_for_cleanup.legions.shutdown_all(grace).await;
            info!(closed, "Closed active legions");
        })
        .await?;

    info!(?worker_id, "Shutdown complete");
    Ok(())
}

async fn mobilize_autostart(state: &AppState) {
    for legion in state.config.legions.iter().filter(|l| l.autostart) {
        if let Err(e) = state.legions.activate(legion.port).await {
            warn!(port = legion.port, role = %legion.role, error = %e, "Autostart failed");
        }
    }
}

/// Create the application router with an Arc-wrapped state.
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let config = &state.config;

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };
    let body_limit = DefaultBodyLimit::max(config.max_body_size);

    api::routes(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::timing_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(body_limit)
        .with_state(state)
}
