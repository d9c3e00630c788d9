//! Session endpoints.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::info;

use crate::auth::Claims;
use crate::state::AppState;

use super::types::{LoginRequest, LoginResponse, MessageResponse};

/// Exchange the admin secret for a bearer token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> (StatusCode, Json<LoginResponse>) {
    let Ok(Json(request)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(LoginResponse::failed("Request body must be {\"token\": <secret>}")),
        );
    };

    match state.auth.login(&request.token) {
        Ok(issued) => {
            info!(
                jti = %issued.claims.jti,
                ttl_secs = state.auth.token_ttl().as_secs(),
                "Admin session issued"
            );
            (
                StatusCode::OK,
                Json(LoginResponse {
                    success: true,
                    token: Some(issued.token),
                    expires_at: Some(issued.claims.exp),
                    error: None,
                }),
            )
        }
        Err(e) => (e.status_code(), Json(LoginResponse::failed("Invalid credentials"))),
    }
}

/// Revoke the token that authenticated this request.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Json<MessageResponse> {
    state.auth.revoke(&claims).await;
    info!(jti = %claims.jti, "Admin session revoked");
    Json(MessageResponse {
        success: true,
        message: "Token revoked".to_string(),
    })
}
