//! Schema registry
//!
//! Read-mostly map of table name to descriptor. Registration goes through
//! the map's entry API so two racing registrations of the same table
//! resolve to one winner and concurrent resolves only ever see a complete
//! `Arc<TableDescriptor>`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::config::TablesConfig;
use super::descriptor::{FieldDescriptor, TableDescriptor, TableDescription};
use super::metadata::{MetadataSnapshot, MetadataStore, TableFieldRow};
use crate::codec::{EnumType, TypeTag};
use crate::types::SchemaError;

/// Point-in-time list of registered tables.
///
/// Iterating does not hold any registry lock and can be repeated.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    tables: Arc<Vec<Arc<TableDescriptor>>>,
}

impl TableCatalog {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> + '_ {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|t| t.name.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a TableCatalog {
    type Item = &'a Arc<TableDescriptor>;
    type IntoIter = std::slice::Iter<'a, Arc<TableDescriptor>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

#[derive(Default)]
pub struct SchemaRegistry {
    tables: DashMap<String, Arc<TableDescriptor>>,
    enums: DashMap<String, EnumType>,
    store: Option<MetadataStore>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a parsed table configuration
    pub fn from_config(config: &TablesConfig) -> Result<Self, SchemaError> {
        let registry = Self::new();
        registry.load_config(config)?;
        Ok(registry)
    }

    /// Persist structural metadata to `store` whenever a table is added
    pub fn with_metadata_store(mut self, store: MetadataStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<TableDescriptor>, SchemaError> {
        self.tables
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Register a descriptor.
    ///
    /// Registering an identical field list again returns the existing
    /// descriptor. A different field list is a `SchemaConflict` and the
    /// original stays registered.
    pub fn register(&self, descriptor: TableDescriptor) -> Result<Arc<TableDescriptor>, SchemaError> {
        descriptor.validate()?;
        let registered = match self.tables.entry(descriptor.name.clone()) {
            Entry::Occupied(existing) => {
                return if existing.get().same_shape(&descriptor) {
                    debug!(table = %descriptor.name, "Table already registered");
                    Ok(Arc::clone(existing.get()))
                } else {
                    warn!(
                        table = %descriptor.name,
                        registered = %existing.get().fingerprint(),
                        offered = %descriptor.fingerprint(),
                        "Schema conflict, keeping registered descriptor"
                    );
                    Err(SchemaError::SchemaConflict(descriptor.name))
                };
            }
            Entry::Vacant(slot) => {
                let desc = Arc::new(descriptor);
                info!(
                    table = %desc.name,
                    fields = desc.fields.len(),
                    keys = desc.key_arity(),
                    "Registered table"
                );
                slot.insert(Arc::clone(&desc));
                desc
            }
        };

        // entry guard is released; exporting iterates the whole map
        if let Err(e) = self.persist_metadata() {
            warn!(table = %registered.name, "Failed to persist table metadata: {}", e);
        }
        Ok(registered)
    }

    /// Snapshot of all tables sorted by name
    pub fn list_tables(&self) -> TableCatalog {
        let mut tables: Vec<_> = self.tables.iter().map(|e| Arc::clone(e.value())).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        TableCatalog {
            tables: Arc::new(tables),
        }
    }

    pub fn describe(&self, name: &str) -> Result<TableDescription, SchemaError> {
        Ok(self.resolve(name)?.describe())
    }

    pub fn register_enum(&self, enum_type: EnumType) {
        self.enums.insert(enum_type.name.clone(), enum_type);
    }

    fn enum_map(&self) -> HashMap<String, EnumType> {
        self.enums
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Register every table and enum in `config`, returning the table count.
    ///
    /// Stops at the first invalid or conflicting table.
    pub fn load_config(&self, config: &TablesConfig) -> Result<usize, SchemaError> {
        for enum_type in config.enum_types().into_values() {
            self.register_enum(enum_type);
        }
        let descriptors = config.descriptors()?;
        let count = descriptors.len();
        for desc in descriptors {
            self.register(desc)?;
        }
        info!(
            tables = count,
            package_id = config.package_id.as_deref().unwrap_or("-"),
            "Loaded table configuration"
        );
        Ok(count)
    }

    /// Rebuild descriptors from persisted metadata rows.
    ///
    /// Within a table, fields follow their recorded `position`. Rows without
    /// one fall back to key fields first by `field_index`, then value fields
    /// by `field_index`. Enum types must already be registered.
    pub fn load_metadata(&self, rows: &[TableFieldRow]) -> Result<usize, SchemaError> {
        let enums = self.enum_map();
        let mut grouped: Vec<(String, Vec<&TableFieldRow>)> = Vec::new();
        for row in rows {
            match grouped.iter_mut().find(|(name, _)| name == &row.table_name) {
                Some((_, fields)) => fields.push(row),
                None => grouped.push((row.table_name.clone(), vec![row])),
            }
        }

        let count = grouped.len();
        for (name, mut fields) in grouped {
            let (kind, offchain) = (fields[0].table_kind, fields[0].offchain);
            fields.sort_by_key(|r| (r.position.unwrap_or(u32::MAX), !r.is_key, r.field_index));
            let fields = fields
                .into_iter()
                .map(|r| {
                    Ok(FieldDescriptor {
                        name: r.field_name.clone(),
                        type_tag: TypeTag::parse(&r.field_type, &enums)?,
                        is_key: r.is_key,
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            self.register(
                TableDescriptor::new(name, fields)?
                    .with_kind(kind)
                    .with_offchain(offchain),
            )?;
        }
        Ok(count)
    }

    /// Structural metadata rows for every registered table
    pub fn export_metadata(&self) -> Vec<TableFieldRow> {
        self.list_tables()
            .iter()
            .flat_map(|table| {
                let (kind, offchain) = (table.kind, table.offchain);
                table
                    .describe()
                    .fields
                    .into_iter()
                    .enumerate()
                    .map(move |(position, f)| TableFieldRow {
                        table_name: table.name.clone(),
                        field_name: f.name,
                        field_type: f.field_type,
                        field_index: f.field_index,
                        is_key: f.is_key,
                        position: Some(position as u32),
                        table_kind: kind,
                        offchain,
                    })
            })
            .collect()
    }

    /// Registered enums and table field rows
    pub fn metadata_snapshot(&self) -> MetadataSnapshot {
        let mut enums: Vec<EnumType> = self.enums.iter().map(|e| e.value().clone()).collect();
        enums.sort_by(|a, b| a.name.cmp(&b.name));
        MetadataSnapshot {
            enums,
            table_fields: self.export_metadata(),
        }
    }

    /// Register the enums and tables recorded in the metadata store.
    ///
    /// Returns the number of tables found, zero without a store or before
    /// anything was written.
    pub fn restore_metadata(&self) -> Result<usize, SchemaError> {
        let Some(snapshot) = self.store.as_ref().map(MetadataStore::read).transpose()?.flatten() else {
            return Ok(0);
        };
        for enum_type in snapshot.enums {
            self.register_enum(enum_type);
        }
        let count = self.load_metadata(&snapshot.table_fields)?;
        info!(tables = count, "Restored table metadata");
        Ok(count)
    }

    /// Write the current metadata to the store, if one is attached
    pub fn persist_metadata(&self) -> Result<(), SchemaError> {
        match &self.store {
            Some(store) => store.write(&self.metadata_snapshot()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ty: TypeTag) -> TableDescriptor {
        TableDescriptor::new("t", vec![FieldDescriptor::value("x", ty)]).unwrap()
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = SchemaRegistry::new();
        assert_eq!(
            registry.resolve("nope").unwrap_err(),
            SchemaError::UnknownTable("nope".into())
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SchemaRegistry::new();
        let first = registry.register(table(TypeTag::U32)).unwrap();
        let second = registry.register(table(TypeTag::U32)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.list_tables().len(), 1);
    }

    #[test]
    fn test_conflict_keeps_original() {
        let registry = SchemaRegistry::new();
        registry.register(table(TypeTag::U32)).unwrap();
        let err = registry.register(table(TypeTag::U64)).unwrap_err();
        assert_eq!(err, SchemaError::SchemaConflict("t".into()));
        assert_eq!(registry.resolve("t").unwrap().fields[0].type_tag, TypeTag::U32);
    }

    #[test]
    fn test_catalog_is_restartable_snapshot() {
        let registry = SchemaRegistry::new();
        for name in ["b", "a"] {
            registry
                .register(TableDescriptor::new(name, vec![FieldDescriptor::value("v", TypeTag::U8)]).unwrap())
                .unwrap();
        }
        let catalog = registry.list_tables();
        registry
            .register(TableDescriptor::new("c", vec![FieldDescriptor::value("v", TypeTag::U8)]).unwrap())
            .unwrap();
        assert_eq!(catalog.names(), vec!["a", "b"]);
        assert_eq!(catalog.iter().count(), 2);
        assert_eq!(catalog.iter().count(), 2);
        assert_eq!(registry.list_tables().len(), 3);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let source = SchemaRegistry::new();
        source.register_enum(EnumType::unit("Status", &["On", "Off"]));
        let enum_tag = TypeTag::Enum(EnumType::unit("Status", &["On", "Off"]));
        source
            .register(
                TableDescriptor::new(
                    "lamp",
                    vec![
                        FieldDescriptor::value("status", enum_tag),
                        FieldDescriptor::key("room", TypeTag::U16),
                        FieldDescriptor::key("slot", TypeTag::U8),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        let rows = source.export_metadata();
        assert_eq!(rows.len(), 3);

        let target = SchemaRegistry::new();
        target.register_enum(EnumType::unit("Status", &["On", "Off"]));
        assert_eq!(target.load_metadata(&rows).unwrap(), 1);
        let lamp = target.resolve("lamp").unwrap();
        let keys: Vec<_> = lamp.key_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(keys, vec!["room", "slot"]);
        assert_eq!(lamp.value_field(0).unwrap().name, "status");
    }

    #[test]
    fn test_metadata_reload_keeps_interleaved_keys() {
        let registry = SchemaRegistry::new();
        registry
            .register(
                TableDescriptor::new(
                    "pos",
                    vec![
                        FieldDescriptor::value("x", TypeTag::U32),
                        FieldDescriptor::key("id", TypeTag::U64),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        // reloading into the same registry is an idempotent re-registration
        let rows = registry.export_metadata();
        assert_eq!(registry.load_metadata(&rows).unwrap(), 1);

        let fresh = SchemaRegistry::new();
        fresh.load_metadata(&rows).unwrap();
        let names: Vec<_> = fresh.resolve("pos").unwrap().fields.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["x", "id"]);
    }

    #[test]
    fn test_rows_without_position_load_keys_first() {
        let rows: Vec<TableFieldRow> = serde_json::from_str(
            r#"[
                {"table_name": "pos", "field_name": "x", "field_type": "u32", "field_index": 0, "is_key": false},
                {"table_name": "pos", "field_name": "id", "field_type": "u64", "field_index": 0, "is_key": true}
            ]"#,
        )
        .unwrap();
        let registry = SchemaRegistry::new();
        registry.load_metadata(&rows).unwrap();
        assert_eq!(registry.resolve("pos").unwrap().fields[0].name, "id");
    }

    #[test]
    fn test_store_written_on_register_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let first = SchemaRegistry::new().with_metadata_store(MetadataStore::new(&path));
        first.register_enum(EnumType::unit("Status", &["On", "Off"]));
        first
            .register(
                TableDescriptor::new(
                    "lamp",
                    vec![
                        FieldDescriptor::key("room", TypeTag::U16),
                        FieldDescriptor::value("status", TypeTag::Enum(EnumType::unit("Status", &["On", "Off"]))),
                    ],
                )
                .unwrap()
                .with_offchain(true),
            )
            .unwrap();
        assert!(path.exists());

        let second = SchemaRegistry::new().with_metadata_store(MetadataStore::new(&path));
        assert_eq!(second.restore_metadata().unwrap(), 1);
        let lamp = second.resolve("lamp").unwrap();
        assert!(lamp.offchain);
        assert_eq!(lamp.fingerprint(), first.resolve("lamp").unwrap().fingerprint());
    }

    #[test]
    fn test_restore_without_store_or_file() {
        assert_eq!(SchemaRegistry::new().restore_metadata().unwrap(), 0);
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::new().with_metadata_store(MetadataStore::new(dir.path().join("none.json")));
        assert_eq!(registry.restore_metadata().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_register_single_winner() {
        let registry = Arc::new(SchemaRegistry::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let ty = if i % 2 == 0 { TypeTag::U32 } else { TypeTag::U64 };
                registry.register(table(ty)).is_ok()
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 4);
        assert!(registry.resolve("t").is_ok());
    }
}
