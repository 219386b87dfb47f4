//! Table configuration file
//!
//! JSON in the shape the ledger package tooling emits:
//!
//! ```json
//! {
//!   "package_id": "0x...",
//!   "start_checkpoint": "0",
//!   "components": [{ "player": { "fields": [{"id": "address"}, {"level": "u32"}], "keys": ["id"], "offchain": false } }],
//!   "resources":  [{ "counter": { "fields": [{"value": "u32"}], "keys": [], "offchain": false } }],
//!   "enums": [{ "Status": ["Caught", "Fled", "Missed"] }]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::descriptor::{FieldDescriptor, TableDescriptor, TableKind};
use crate::codec::{EnumType, TypeTag};
use crate::types::SchemaError;

/// One table entry; each field is a single-entry `{name: type}` map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub fields: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub offchain: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub start_checkpoint: Option<String>,
    #[serde(default)]
    pub components: Vec<BTreeMap<String, TableEntry>>,
    #[serde(default)]
    pub resources: Vec<BTreeMap<String, TableEntry>>,
    #[serde(default)]
    pub enums: Vec<BTreeMap<String, Vec<String>>>,
}

impl TablesConfig {
    pub fn from_json_str(s: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(s).map_err(|e| SchemaError::InvalidDescriptor {
            table: "<config>".into(),
            reason: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| SchemaError::InvalidDescriptor {
            table: "<config>".into(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&raw)
    }

    /// Declared enums, all unit variants
    pub fn enum_types(&self) -> HashMap<String, EnumType> {
        self.enums
            .iter()
            .flat_map(|m| m.iter())
            .map(|(name, variants)| {
                let refs: Vec<&str> = variants.iter().map(String::as_str).collect();
                (name.clone(), EnumType::unit(name.clone(), &refs))
            })
            .collect()
    }

    /// Build descriptors for every configured table
    pub fn descriptors(&self) -> Result<Vec<TableDescriptor>, SchemaError> {
        let enums = self.enum_types();
        let mut out = Vec::new();
        let groups = [
            (TableKind::Component, &self.components),
            (TableKind::Resource, &self.resources),
        ];
        for (kind, group) in groups {
            for (name, entry) in group.iter().flat_map(|m| m.iter()) {
                out.push(entry.to_descriptor(name, kind, &enums)?);
            }
        }
        Ok(out)
    }
}

impl TableEntry {
    fn to_descriptor(
        &self,
        name: &str,
        kind: TableKind,
        enums: &HashMap<String, EnumType>,
    ) -> Result<TableDescriptor, SchemaError> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for entry in &self.fields {
            if entry.len() != 1 {
                return Err(SchemaError::InvalidDescriptor {
                    table: name.to_string(),
                    reason: format!("field entry must have exactly one name, got {}", entry.len()),
                });
            }
            for (field_name, type_str) in entry {
                fields.push(FieldDescriptor {
                    name: field_name.clone(),
                    type_tag: TypeTag::parse(type_str, enums)?,
                    is_key: self.keys.contains(field_name),
                });
            }
        }
        if let Some(missing) = self.keys.iter().find(|k| !fields.iter().any(|f| &f.name == *k)) {
            return Err(SchemaError::InvalidDescriptor {
                table: name.to_string(),
                reason: format!("key {} is not a declared field", missing),
            });
        }
        Ok(TableDescriptor::new(name, fields)?
            .with_kind(kind)
            .with_offchain(self.offchain))
    }
}
