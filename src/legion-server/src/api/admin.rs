//! Legion administration endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::decree::{self, DecreeCommand, DecreeOutcome};
use crate::error::{AppError, AppResult};
use crate::legion::LegionStatus;
use crate::state::AppState;

use super::types::{
    DecreeRequest, DiagnosticsResponse, LegionHealth, StatusResponse, SystemStatus,
};

/// Snapshot of every legion keyed by port.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let legions = state.legions.status_all().await;
    Json(legions.into_iter().map(|l| (l.port, l)).collect())
}

/// Submit a decree to one legion.
///
/// The port is checked before the body, so an unconfigured port is rejected
/// whatever the command.
pub async fn submit_decree(
    State(state): State<Arc<AppState>>,
    Path(port): Path<String>,
    body: Result<Json<DecreeRequest>, JsonRejection>,
) -> Response {
    let outcome = match resolve(&state, &port, body) {
        Ok((port, command)) => decree::dispatch(&state.legions, port, command).await,
        Err(outcome) => outcome,
    };
    let status = outcome.status_code();
    (status, Json(outcome.into_response_body())).into_response()
}

fn resolve(
    state: &AppState,
    raw_port: &str,
    body: Result<Json<DecreeRequest>, JsonRejection>,
) -> Result<(u16, DecreeCommand), DecreeOutcome> {
    let port: u16 = raw_port
        .parse()
        .map_err(|_| DecreeOutcome::Rejected(format!("Invalid port {raw_port:?}")))?;
    if !state.legions.is_configured(port) {
        return Err(DecreeOutcome::Rejected(format!(
            "No legion configured on port {port}"
        )));
    }

    let Json(request) =
        body.map_err(|e| DecreeOutcome::Rejected(format!("Invalid decree body: {e}")))?;
    let command = request
        .command
        .parse()
        .map_err(DecreeOutcome::Rejected)?;
    Ok((port, command))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    if !state.config.metrics_enabled {
        return Err(AppError::NotFound("metrics are disabled".to_string()));
    }
    let body = state.metrics.export_prometheus().await;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Legion health plus process resources and a metrics snapshot.
pub async fn diagnostics(State(state): State<Arc<AppState>>) -> Json<DiagnosticsResponse> {
    let legions = state.legions.status_all().await;
    let active = legions
        .iter()
        .filter(|l| l.status == LegionStatus::Active)
        .count();
    let degraded = legions.iter().any(|l| l.failure_count > 0);

    let system_status = SystemStatus {
        status: if degraded { "DEGRADED" } else { "OPERATIONAL" },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        worker_id: state.worker_id,
        active_legions: active,
        total_legions: legions.len(),
        failure_threshold: state.config.health.failure_threshold,
    };

    let legion_health = legions
        .into_iter()
        .map(|l| {
            (
                l.port,
                LegionHealth {
                    healthy: l.failure_count == 0,
                    role: l.role,
                    status: l.status,
                    failure_count: l.failure_count,
                },
            )
        })
        .collect();

    Json(DiagnosticsResponse {
        system_status,
        process_resources: state.sampler.sample(),
        legion_health,
        metrics_snapshot: state.metrics.snapshot().await,
    })
}
