//! Persisted structural metadata
//!
//! One JSON document holding a row per table field plus the enum types
//! those rows reference. Startup reads it back to rediscover tables that are
//! no longer in the table configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::descriptor::TableKind;
use crate::codec::EnumType;
use crate::types::SchemaError;

/// One persisted structural metadata row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFieldRow {
    pub table_name: String,
    pub field_name: String,
    pub field_type: String,
    /// Position among key fields or among value fields
    pub field_index: u32,
    pub is_key: bool,
    /// Position in the declared field list; rows written without it load
    /// key fields first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default)]
    pub table_kind: TableKind,
    #[serde(default)]
    pub offchain: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub enums: Vec<EnumType>,
    #[serde(default)]
    pub table_fields: Vec<TableFieldRow>,
}

/// File-backed metadata persistence
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, `None` when nothing has been written yet
    pub fn read(&self) -> Result<Option<MetadataSnapshot>, SchemaError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| self.error(e))
    }

    /// Replace the stored snapshot.
    ///
    /// Writes a sibling temp file and renames it over the target so readers
    /// never observe a partial document.
    pub fn write(&self, snapshot: &MetadataSnapshot) -> Result<(), SchemaError> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| self.error(e))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| self.error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.error(e))?;
        debug!(
            path = %self.path.display(),
            rows = snapshot.table_fields.len(),
            "Wrote table metadata"
        );
        Ok(())
    }

    fn error(&self, e: impl std::fmt::Display) -> SchemaError {
        SchemaError::InvalidDescriptor {
            table: "<metadata>".into(),
            reason: format!("{}: {}", self.path.display(), e),
        }
    }
}
