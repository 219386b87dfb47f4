//! Opaque scan cursors
//!
//! A cursor records where the previous page stopped: the sort column and
//! direction it was produced for, the sort value and primary key of the
//! last returned row, and the applied seq when the scan began. It is
//! serialized as JSON and wrapped in URL-safe base64.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::engine::SortDirection;
use crate::codec::FieldValue;
use crate::schema::TableDescriptor;
use crate::types::QueryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CursorToken {
    #[serde(rename = "t")]
    table: String,
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(rename = "d")]
    direction: SortDirection,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    sort_value: Option<JsonValue>,
    #[serde(rename = "k")]
    key: Vec<JsonValue>,
}

/// Decoded resume position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub table: String,
    pub order_field: Option<String>,
    pub direction: SortDirection,
    /// Applied seq when the first page of the scan was taken
    pub seq: Option<u64>,
    pub sort_value: Option<FieldValue>,
    pub key: Vec<FieldValue>,
}

impl Cursor {
    pub fn encode(&self, descriptor: &TableDescriptor) -> String {
        let sort_value = match (&self.order_field, &self.sort_value) {
            (Some(field), Some(v)) => descriptor
                .field(field)
                .map(|f| v.to_json(&f.type_tag)),
            _ => None,
        };
        let token = CursorToken {
            table: self.table.clone(),
            field: self.order_field.clone(),
            direction: self.direction,
            seq: self.seq,
            sort_value,
            key: descriptor
                .key_fields()
                .zip(&self.key)
                .map(|(f, v)| v.to_json(&f.type_tag))
                .collect(),
        };
        // serializing plain JSON values cannot fail
        let json = serde_json::to_vec(&token).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str, descriptor: &TableDescriptor) -> Result<Self, QueryError> {
        let invalid = |reason: &str| QueryError::InvalidCursor(reason.to_string());
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| invalid("not base64"))?;
        let token: CursorToken = serde_json::from_slice(&bytes).map_err(|_| invalid("not a cursor"))?;

        if token.table != descriptor.name {
            return Err(invalid("cursor belongs to another table"));
        }
        if token.key.len() != descriptor.key_arity() {
            return Err(invalid("key arity does not match table"));
        }
        let key = descriptor
            .key_fields()
            .zip(&token.key)
            .map(|(f, v)| FieldValue::from_json(v, &f.type_tag))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("key does not match table key types"))?;

        let sort_value = match (&token.field, &token.sort_value) {
            (Some(name), Some(v)) => {
                let field = descriptor.field(name).ok_or_else(|| invalid("unknown sort field"))?;
                Some(
                    FieldValue::from_json(v, &field.type_tag)
                        .map_err(|_| invalid("sort value does not match field type"))?,
                )
            }
            (None, None) => None,
            _ => return Err(invalid("sort value and sort field disagree")),
        };

        Ok(Self {
            table: token.table,
            order_field: token.field,
            direction: token.direction,
            seq: token.seq,
            sort_value,
            key,
        })
    }
}
