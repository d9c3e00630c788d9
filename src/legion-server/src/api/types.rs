//! Request and response types for the control-plane API.

use std::collections::BTreeMap;

use legion_tools::ToolDescriptor;
use serde::{Deserialize, Serialize};

use crate::diagnostics::ProcessResources;
use crate::legion::{LegionSnapshot, LegionStatus};
use crate::metrics::MetricsSnapshot;

/// `POST /login` body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// The shared admin secret.
    pub token: String,
}

/// `POST /login` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Expiry as a Unix timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoginResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            expires_at: None,
            error: Some(error.into()),
        }
    }
}

/// `POST /admin/decree/{port}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DecreeRequest {
    pub command: String,
}

/// `GET /admin/status` response, keyed by port.
pub type StatusResponse = BTreeMap<u16, LegionSnapshot>;

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
}

/// `GET /admin/diagnostics` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub system_status: SystemStatus,
    pub process_resources: ProcessResources,
    pub legion_health: BTreeMap<u16, LegionHealth>,
    pub metrics_snapshot: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// `OPERATIONAL` when no legion has pending failures, `DEGRADED` otherwise.
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    pub active_legions: usize,
    pub total_legions: usize,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegionHealth {
    pub role: String,
    pub status: LegionStatus,
    pub failure_count: u32,
    pub healthy: bool,
}

/// `GET /osint/tools` response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogue {
    pub tools: Vec<ToolDescriptor>,
}
