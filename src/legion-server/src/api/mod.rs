//! Control-plane routes and handlers.
//!
//! `/login` and `/health` are public. Everything under `/admin` and `/osint`
//! requires a bearer token issued by `/login`.

mod admin;
mod health;
mod login;
mod osint;
pub mod types;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth;
use crate::state::AppState;

pub use types::{DiagnosticsResponse, HealthResponse, LoginRequest, LoginResponse};

/// Create the control-plane routes.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        // Session
        .route("/admin/logout", post(login::logout))
        // Legions
        .route("/admin/status", get(admin::status))
        .route("/admin/decree/{port}", post(admin::submit_decree))
        // Observability
        .route("/admin/metrics", get(admin::metrics))
        .route("/admin/diagnostics", get(admin::diagnostics))
        // Tools
        .route("/osint/tools", get(osint::list_tools))
        .route("/osint/{tool_id}", post(osint::run_tool))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware));

    Router::new()
        .route("/login", post(login::login))
        .route("/health", get(health::health_check))
        .merge(protected)
}
