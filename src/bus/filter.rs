//! Subscription filters
//!
//! A filter selects one table (or every table) and optionally narrows the
//! table's rows by primary key. `FilterSpec` is the JSON form clients send;
//! it is resolved against the registry into a typed `SubscriptionFilter`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::codec::FieldValue;
use crate::projection::TableChange;
use crate::schema::{SchemaRegistry, TableDescriptor};
use crate::types::{BusError, SchemaError};

type KeyFn = dyn Fn(&[FieldValue]) -> bool + Send + Sync;

/// Predicate over a change's primary key
#[derive(Clone)]
pub enum KeyPredicate {
    /// Full key equality
    Exact(Vec<FieldValue>),
    /// Leading key fields equal
    Prefix(Vec<FieldValue>),
    /// Arbitrary in-process predicate
    Custom(Arc<KeyFn>),
}

impl KeyPredicate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[FieldValue]) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn matches(&self, key: &[FieldValue]) -> bool {
        match self {
            Self::Exact(expected) => key == expected.as_slice(),
            Self::Prefix(prefix) => key.starts_with(prefix),
            Self::Custom(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(k) => f.debug_tuple("Exact").field(k).finish(),
            Self::Prefix(k) => f.debug_tuple("Prefix").field(k).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Table plus optional key predicate
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// `None` selects every table
    pub table: Option<String>,
    pub key: Option<KeyPredicate>,
}

impl SubscriptionFilter {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: Some(name.into()),
            key: None,
        }
    }

    pub fn all_tables() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, predicate: KeyPredicate) -> Self {
        self.key = Some(predicate);
        self
    }

    pub fn matches(&self, change: &TableChange) -> bool {
        if let Some(table) = &self.table {
            if table != &change.table {
                return false;
            }
        }
        self.key.as_ref().map_or(true, |p| p.matches(change.key()))
    }

    /// Check the filter against the registry
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), BusError> {
        let Some(table) = &self.table else {
            if self.key.is_some() {
                return Err(BusError::InvalidFilter(
                    "a key predicate requires a table".into(),
                ));
            }
            return Ok(());
        };
        let desc = registry.resolve(table).map_err(bus_error)?;
        match &self.key {
            Some(KeyPredicate::Exact(key)) => check_key(&desc, key, false),
            Some(KeyPredicate::Prefix(key)) => check_key(&desc, key, true),
            _ => Ok(()),
        }
    }
}

fn bus_error(err: SchemaError) -> BusError {
    match err {
        SchemaError::UnknownTable(t) => BusError::UnknownTable(t),
        other => BusError::InvalidFilter(other.to_string()),
    }
}

fn check_key(desc: &TableDescriptor, key: &[FieldValue], prefix: bool) -> Result<(), BusError> {
    let arity = desc.key_arity();
    if (prefix && key.len() > arity) || (!prefix && key.len() != arity) {
        return Err(BusError::InvalidFilter(format!(
            "table {} has {} key fields, filter gives {}",
            desc.name,
            arity,
            key.len()
        )));
    }
    for (field, value) in desc.key_fields().zip(key) {
        if !value.matches(&field.type_tag) {
            return Err(BusError::InvalidFilter(format!(
                "key field {} expects {}, got {}",
                field.name,
                field.type_tag,
                value.kind_name()
            )));
        }
    }
    Ok(())
}

/// Wire form of a filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Key values as JSON, typed by the table's key fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub key_prefix: bool,
}

impl FilterSpec {
    pub fn resolve(&self, registry: &SchemaRegistry) -> Result<SubscriptionFilter, BusError> {
        let Some(table) = &self.table else {
            if self.key.is_some() {
                return Err(BusError::InvalidFilter("a key predicate requires a table".into()));
            }
            return Ok(SubscriptionFilter::all_tables());
        };
        let desc = registry.resolve(table).map_err(bus_error)?;
        let mut filter = SubscriptionFilter::table(table.clone());
        if let Some(raw) = &self.key {
            if raw.len() > desc.key_arity() {
                return Err(BusError::InvalidFilter(format!(
                    "table {} has {} key fields, filter gives {}",
                    table,
                    desc.key_arity(),
                    raw.len()
                )));
            }
            let values = desc
                .key_fields()
                .zip(raw)
                .map(|(field, v)| {
                    FieldValue::from_json(v, &field.type_tag)
                        .map_err(|e| BusError::InvalidFilter(format!("key field {}: {}", field.name, e)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            filter.key = Some(if self.key_prefix {
                KeyPredicate::Prefix(values)
            } else {
                KeyPredicate::Exact(values)
            });
        }
        filter.validate(registry)?;
        Ok(filter)
    }
}
