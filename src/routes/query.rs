//! Query endpoints
//!
//! Both answer with the same envelope: `{data, next_cursor, has_more}`.
//! A point lookup returns the record (or `null`) in `data` with no cursor.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::query::{record_json, ScanRequest};
use crate::server::AppState;
use crate::types::{Result, TableflowError};

/// Body of POST /query/get
#[derive(Debug, Deserialize)]
pub struct GetRequest {
    pub table: String,
    /// Key field values in key order; omitted for single-row tables
    #[serde(default)]
    pub key: Vec<JsonValue>,
}

/// POST /query/get
pub fn query_get(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
    match run_get(state, body) {
        Ok(envelope) => super::json_response(StatusCode::OK, &envelope),
        Err(e) => super::error_response(e),
    }
}

fn run_get(state: &AppState, body: &[u8]) -> Result<JsonValue> {
    let request: GetRequest = serde_json::from_slice(body)?;
    let descriptor = state.ctx.registry.resolve(&request.table)?;
    let record = state.ctx.query.get_json(&request.table, &request.key)?;
    Ok(json!({
        "data": record.map(|r| record_json(&descriptor, &r)),
        "next_cursor": JsonValue::Null,
        "has_more": false,
    }))
}

/// POST /query/scan
pub fn query_scan(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
    let request: ScanRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return super::error_response(TableflowError::from(e)),
    };
    match state.ctx.query.scan(&request) {
        Ok(page) => super::json_response(StatusCode::OK, &page.to_json()),
        Err(e) => super::error_response(e.into()),
    }
}
