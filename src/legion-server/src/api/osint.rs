//! OSINT tool endpoints.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

use super::types::ToolCatalogue;

const UNKNOWN_TOOL_LABEL: &str = "unknown";

/// List registered tools and whether each is installed.
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolCatalogue> {
    Json(ToolCatalogue {
        tools: state.tools.catalogue(),
    })
}

/// Run a tool. Unavailable or failing tools answer with simulated output.
pub async fn run_tool(
    State(state): State<Arc<AppState>>,
    Path(tool_id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let params = parse_params(&body)?;

    match state.tools.run_tool(&tool_id, params).await {
        Ok(outcome) => {
            state.metrics.record_tool(outcome.tool(), outcome.label()).await;
            info!(tool = outcome.tool(), outcome = outcome.label(), "Tool request served");
            Ok(Json(outcome.into_value()))
        }
        Err(e) => {
            let label = if e.is_caller_error() { "rejected" } else { "parse_error" };
            state.metrics.record_tool(metric_tool_label(&state, &tool_id), label).await;
            warn!(tool = %tool_id, error = %e, "Tool request failed");
            Err(e.into())
        }
    }
}

/// Unregistered ids share one series so callers cannot grow the registry.
fn metric_tool_label<'a>(state: &AppState, tool_id: &'a str) -> &'a str {
    if state.tools.registry().contains(tool_id) {
        tool_id
    } else {
        UNKNOWN_TOOL_LABEL
    }
}

/// An empty body means no parameters.
fn parse_params(body: &[u8]) -> AppResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    let params: Value = serde_json::from_slice(body)?;
    if !params.is_object() {
        return Err(AppError::BadRequest(
            "tool parameters must be a JSON object".to_string(),
        ));
    }
    Ok(params)
}
