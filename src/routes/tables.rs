//! Table introspection and operator controls

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;

use crate::server::AppState;
use crate::types::TableflowError;

/// GET /tables
pub fn list_tables(state: &AppState) -> Response<Full<Bytes>> {
    let tables: Vec<_> = state
        .ctx
        .registry
        .list_tables()
        .iter()
        .map(|d| d.describe())
        .collect();
    super::json_response(StatusCode::OK, &json!({ "tables": tables }))
}

/// GET /tables/{name}
pub fn describe_table(state: &AppState, name: &str) -> Response<Full<Bytes>> {
    match state.ctx.registry.describe(name) {
        Ok(description) => super::json_response(StatusCode::OK, &description),
        Err(e) => super::error_response(e.into()),
    }
}

/// POST /tables/{name}/resume
///
/// Clears a table halted by a decode failure so it accepts events again.
pub fn resume_table(state: &AppState, name: &str) -> Response<Full<Bytes>> {
    if !state.ctx.registry.contains(name) {
        return super::error_response(TableflowError::NotFound(format!("table {}", name)));
    }
    let resumed = state.ctx.projector.resume_table(name);
    super::json_response(StatusCode::OK, &json!({ "table": name, "resumed": resumed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TypeTag;
    use crate::config::Args;
    use crate::context::{ContextConfig, TableflowContext};
    use crate::schema::{FieldDescriptor, SchemaRegistry, TableDescriptor};
    use clap::Parser;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    fn state() -> AppState {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(
                TableDescriptor::new(
                    "position",
                    vec![
                        FieldDescriptor::key("player", TypeTag::Address),
                        FieldDescriptor::value("x", TypeTag::U32),
                        FieldDescriptor::value("y", TypeTag::U32),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
        let ctx = TableflowContext::new(registry, ContextConfig::default());
        AppState::new(Args::try_parse_from(["tableflow"]).unwrap(), Arc::new(ctx))
    }

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_describe() {
        let state = state();
        let body = body_json(list_tables(&state)).await;
        assert_eq!(body["tables"][0]["name"], "position");

        let resp = describe_table(&state, "position");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["keys"], json!(["player"]));
    }

    #[tokio::test]
    async fn test_unknown_table_is_404() {
        let state = state();
        assert_eq!(describe_table(&state, "nope").status(), StatusCode::NOT_FOUND);
        assert_eq!(resume_table(&state, "nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resume_not_halted() {
        let state = state();
        let body = body_json(resume_table(&state, "position")).await;
        assert_eq!(body["resumed"], false);
    }
}
