//! Status and metrics endpoints
//!
//! `/status` is the operator view: pipeline position, halted tables, row
//! counts and subscriber load. `/metrics` exposes the same counters in
//! Prometheus text format.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::projection::{HaltedTable, TableStats};
use crate::server::AppState;

/// Status response payload
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub dev_mode: bool,
    pub uptime_secs: u64,
    pub pipeline_running: bool,
    pub last_applied_seq: Option<u64>,
    pub halted_tables: Vec<HaltedTable>,
    pub tables: Vec<TableStats>,
    pub connections: usize,
    pub subscriptions: usize,
    pub metrics: MetricsSnapshot,
}

/// Handle status request (/status)
pub async fn status_check(state: &AppState) -> Response<Full<Bytes>> {
    let ctx = &state.ctx;
    let response = StatusResponse {
        service: "tableflow",
        version: env!("CARGO_PKG_VERSION"),
        dev_mode: state.args.dev_mode,
        uptime_secs: state.started_at.elapsed().as_secs(),
        pipeline_running: ctx.is_running().await,
        last_applied_seq: ctx.projector.last_applied_seq(),
        halted_tables: ctx.projector.halted_tables(),
        tables: ctx.store.stats(),
        connections: ctx.bus.connection_count(),
        subscriptions: ctx.bus.subscription_count(),
        metrics: ctx.metrics.snapshot(),
    };

    super::json_response(StatusCode::OK, &response)
}

/// Prometheus exposition (/metrics)
pub fn metrics_export(state: &AppState) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(state.ctx.metrics.snapshot().to_prometheus())))
        .unwrap()
}
