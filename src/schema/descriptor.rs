//! Table and field descriptors
//!
//! A descriptor is immutable once built. The registry hands out
//! `Arc<TableDescriptor>` so readers always see a complete descriptor.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::TypeTag;
use crate::types::SchemaError;

/// Where a table came from in the ledger package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    #[default]
    Component,
    Resource,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Resource => "resource",
        }
    }
}

/// One declared field of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_tag: TypeTag,
    pub is_key: bool,
}

impl FieldDescriptor {
    pub fn key(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            is_key: true,
        }
    }

    pub fn value(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            is_key: false,
        }
    }
}

/// Structural description of one dynamic table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub kind: TableKind,
    /// Declared order; key fields keep their relative position
    pub fields: Vec<FieldDescriptor>,
    /// Off-chain tables are projected the same way, the flag is informational
    #[serde(default)]
    pub offchain: bool,
}

impl TableDescriptor {
    /// Build and validate a descriptor
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Result<Self, SchemaError> {
        let desc = Self {
            name: name.into(),
            kind: TableKind::Component,
            fields,
            offchain: false,
        };
        desc.validate()?;
        Ok(desc)
    }

    pub fn with_kind(mut self, kind: TableKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_offchain(mut self, offchain: bool) -> Self {
        self.offchain = offchain;
        self
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidDescriptor {
            table: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("table name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(invalid("table declares no fields".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(invalid(format!("field {} has an empty name", i)));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(invalid(format!("duplicate field {}", field.name)));
            }
        }
        Ok(())
    }

    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_key)
    }

    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_key)
    }

    pub fn key_arity(&self) -> usize {
        self.key_fields().count()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Value field at `index` among value fields only
    pub fn value_field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.value_fields().nth(index)
    }

    /// Whether two descriptors declare the same field list
    pub fn same_shape(&self, other: &TableDescriptor) -> bool {
        self.name == other.name && self.fields == other.fields
    }

    /// Hex SHA-256 over the table name and field list
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        for field in &self.fields {
            hasher.update([0u8]);
            hasher.update(field.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(field.type_tag.to_string().as_bytes());
            hasher.update([u8::from(field.is_key)]);
        }
        hex::encode(hasher.finalize())
    }

    /// Introspection view with type strings
    pub fn describe(&self) -> TableDescription {
        let mut key_index = 0u32;
        let mut value_index = 0u32;
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let counter = if f.is_key { &mut key_index } else { &mut value_index };
                let field_index = *counter;
                *counter += 1;
                FieldDescription {
                    name: f.name.clone(),
                    field_type: f.type_tag.to_string(),
                    field_index,
                    is_key: f.is_key,
                    is_enum: matches!(f.type_tag, TypeTag::Enum(_)),
                }
            })
            .collect();
        TableDescription {
            name: self.name.clone(),
            kind: self.kind,
            keys: self.key_fields().map(|f| f.name.clone()).collect(),
            fields,
            offchain: self.offchain,
            fingerprint: self.fingerprint(),
        }
    }
}

/// JSON view of a table for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub kind: TableKind,
    pub keys: Vec<String>,
    pub fields: Vec<FieldDescription>,
    pub offchain: bool,
    pub fingerprint: String,
}

/// JSON view of a field; `field_index` counts key and value fields separately
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub field_index: u32,
    pub is_key: bool,
    pub is_enum: bool,
}
