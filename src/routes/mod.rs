//! HTTP routes for tableflow

pub mod health;
pub mod query;
pub mod status;
pub mod subscribe;
pub mod tables;

pub use health::{health_check, readiness_check};
pub use query::{query_get, query_scan};
pub use status::{metrics_export, status_check};
pub use subscribe::handle_subscribe_upgrade;
pub use tables::{describe_table, list_tables, resume_table};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::TableflowError;

/// Serialize `body` as a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(bytes)))
            .unwrap(),
        Err(e) => error_response(TableflowError::Internal(e.to_string())),
    }
}

/// `{"error": ...}` response with the error's status code
pub fn error_response(err: TableflowError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
