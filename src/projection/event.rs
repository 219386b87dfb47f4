//! Mutation events and committed table changes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::store::Record;
use crate::codec::FieldValue;
use crate::schema::TableDescriptor;

/// What a mutation does to its row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// Full upsert; one encoded value per value field, declared order
    Set { values: Vec<Vec<u8>> },
    /// Replace one value field of a live record
    SetField { field_index: u32, value: Vec<u8> },
    /// Tombstone the record
    Delete,
}

/// A raw table mutation as handed over by the ledger client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub seq: u64,
    pub table: String,
    /// One encoded value per key field, declared order
    pub key: Vec<Vec<u8>>,
    pub kind: MutationKind,
    pub timestamp: DateTime<Utc>,
}

impl MutationEvent {
    pub fn set(seq: u64, table: impl Into<String>, key: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Self {
        Self {
            seq,
            table: table.into(),
            key,
            kind: MutationKind::Set { values },
            timestamp: Utc::now(),
        }
    }

    pub fn set_field(
        seq: u64,
        table: impl Into<String>,
        key: Vec<Vec<u8>>,
        field_index: u32,
        value: Vec<u8>,
    ) -> Self {
        Self {
            seq,
            table: table.into(),
            key,
            kind: MutationKind::SetField { field_index, value },
            timestamp: Utc::now(),
        }
    }

    pub fn delete(seq: u64, table: impl Into<String>, key: Vec<Vec<u8>>) -> Self {
        Self {
            seq,
            table: table.into(),
            key,
            kind: MutationKind::Delete,
            timestamp: Utc::now(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            MutationKind::Set { .. } => "set",
            MutationKind::SetField { .. } => "set_field",
            MutationKind::Delete => "delete",
        }
    }

    /// Parse one line of a JSON-lines events file
    pub fn from_json_line(line: &str) -> Result<Self, String> {
        let raw: EventLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
        raw.into_event()
    }
}

/// JSON-lines representation of a mutation; byte payloads are hex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLine {
    pub seq: u64,
    pub table: String,
    pub kind: String,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub field_index: Option<u32>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn unhex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("bad hex {:?}: {}", s, e))
}

impl EventLine {
    pub fn into_event(self) -> Result<MutationEvent, String> {
        let key = self.key.iter().map(|k| unhex(k)).collect::<Result<Vec<_>, _>>()?;
        let kind = match self.kind.as_str() {
            "set" => MutationKind::Set {
                values: self.values.iter().map(|v| unhex(v)).collect::<Result<_, _>>()?,
            },
            "set_field" => MutationKind::SetField {
                field_index: self.field_index.ok_or("set_field requires field_index")?,
                value: unhex(self.value.as_deref().ok_or("set_field requires value")?)?,
            },
            "delete" => MutationKind::Delete,
            other => return Err(format!("unknown mutation kind {:?}", other)),
        };
        Ok(MutationEvent {
            seq: self.seq,
            table: self.table,
            key,
            kind,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// Kind of a committed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Set,
    SetField,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::SetField => "set_field",
            Self::Delete => "delete",
        }
    }
}

/// A mutation after it has been persisted, as published on the bus
#[derive(Debug, Clone)]
pub struct TableChange {
    pub seq: u64,
    pub table: String,
    pub kind: ChangeKind,
    /// Record state after the change; tombstoned for deletes
    pub record: Arc<Record>,
    pub descriptor: Arc<TableDescriptor>,
    pub timestamp: DateTime<Utc>,
}

impl TableChange {
    pub fn key(&self) -> &[FieldValue] {
        &self.record.key
    }

    pub fn key_json(&self) -> JsonValue {
        JsonValue::Array(
            self.descriptor
                .key_fields()
                .zip(&self.record.key)
                .map(|(f, v)| v.to_json(&f.type_tag))
                .collect(),
        )
    }

    /// Field values as a JSON object; `null` for deletes
    pub fn fields_json(&self) -> JsonValue {
        if self.kind == ChangeKind::Delete {
            return JsonValue::Null;
        }
        JsonValue::Object(self.record.to_json_map(&self.descriptor))
    }
}

impl Record {
    pub fn to_json_map(&self, descriptor: &TableDescriptor) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (field, (name, value)) in descriptor.fields.iter().zip(&self.fields) {
            map.insert(name.clone(), value.to_json(&field.type_tag));
        }
        map
    }
}
