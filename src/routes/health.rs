//! Health check endpoints
//!
//! Kubernetes-style health probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (is the pipeline consuming events?)
//!
//! Readiness needs a running projector task and at least one registered
//! table. Dev mode drops the table requirement so an empty schema can be
//! brought up for local experiments.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    pub version: &'static str,
    pub timestamp: String,
    /// Operating mode
    pub mode: String,
    pub pipeline: PipelineHealth,
    /// Why the service is not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineHealth {
    /// Projector task alive
    pub running: bool,
    pub tables: usize,
    pub halted_tables: usize,
    pub last_applied_seq: Option<u64>,
}

async fn build_health_response(state: &AppState) -> HealthResponse {
    let ctx = &state.ctx;
    let running = ctx.is_running().await;
    let tables = ctx.registry.list_tables().len();

    let error = if !running {
        Some("Projector task is not running".to_string())
    } else if tables == 0 && !state.args.dev_mode {
        Some("No tables registered".to_string())
    } else {
        None
    };

    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        pipeline: PipelineHealth {
            running,
            tables,
            halted_tables: ctx.projector.halted_tables().len(),
            last_applied_seq: ctx.projector.last_applied_seq(),
        },
        error,
    }
}

/// Handle liveness probe (/health, /healthz)
///
/// Always 200 while the process serves requests.
pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = build_health_response(state).await;

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle readiness probe (/ready, /readyz)
pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = build_health_response(state).await;
    let is_ready = response.error.is_none();

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
