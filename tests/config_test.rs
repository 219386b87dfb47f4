//! Table configuration loading integration tests

use std::io::Write;

use tableflow::codec::TypeTag;
use tableflow::schema::{MetadataStore, SchemaRegistry, TableKind, TablesConfig};

const TABLES: &str = r#"{
  "package_id": "0x2f1c",
  "start_checkpoint": "1200",
  "components": [
    { "encounter": {
        "fields": [{"player": "address"}, {"monster": "u64"}, {"status": "Status"}],
        "keys": ["player"],
        "offchain": false
    } },
    { "inventory": {
        "fields": [{"owner": "address"}, {"slot": "u8"}, {"items": "vector<u32>"}],
        "keys": ["owner", "slot"]
    } }
  ],
  "resources": [
    { "counter": { "fields": [{"value": "u32"}], "keys": [] } }
  ],
  "enums": [{ "Status": ["Caught", "Fled", "Missed"] }]
}"#;

#[test]
fn test_load_tables_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TABLES.as_bytes()).unwrap();

    let config = TablesConfig::from_file(file.path()).unwrap();
    assert_eq!(config.package_id.as_deref(), Some("0x2f1c"));

    let registry = SchemaRegistry::from_config(&config).unwrap();
    assert_eq!(
        registry.list_tables().names(),
        vec!["counter".to_string(), "encounter".to_string(), "inventory".to_string()]
    );

    let encounter = registry.resolve("encounter").unwrap();
    assert_eq!(encounter.kind, TableKind::Component);
    assert_eq!(encounter.key_arity(), 1);
    assert!(matches!(
        encounter.field("status").unwrap().type_tag,
        TypeTag::Enum(_)
    ));

    let inventory = registry.resolve("inventory").unwrap();
    assert_eq!(inventory.key_arity(), 2);
    assert_eq!(
        inventory.field("items").unwrap().type_tag,
        TypeTag::Vector(Box::new(TypeTag::U32))
    );

    let counter = registry.resolve("counter").unwrap();
    assert_eq!(counter.kind, TableKind::Resource);
    assert_eq!(counter.key_arity(), 0);
}

#[test]
fn test_metadata_rows_rebuild_the_registry() {
    let config = TablesConfig::from_json_str(TABLES).unwrap();
    let original = SchemaRegistry::from_config(&config).unwrap();
    let rows = original.export_metadata();

    let rebuilt = SchemaRegistry::new();
    for enum_type in config.enum_types().into_values() {
        rebuilt.register_enum(enum_type);
    }
    rebuilt.load_metadata(&rows).unwrap();

    for name in ["counter", "encounter", "inventory"] {
        assert_eq!(
            original.resolve(name).unwrap().fingerprint(),
            rebuilt.resolve(name).unwrap().fingerprint(),
            "fingerprint differs for {}",
            name
        );
    }
}

#[test]
fn test_unknown_type_rejected() {
    let raw = r#"{"components": [{"bad": {"fields": [{"dir": "Direction"}], "keys": []}}]}"#;
    let config = TablesConfig::from_json_str(raw).unwrap();
    assert!(SchemaRegistry::from_config(&config).is_err());
}

#[test]
fn test_missing_file() {
    assert!(TablesConfig::from_file("/nonexistent/tables.json").is_err());
}

#[test]
fn test_interleaved_key_survives_metadata_reload() {
    let raw = r#"{"components": [{"pos": {"fields": [{"x": "u32"}, {"id": "u64"}, {"y": "u32"}], "keys": ["id"]}}]}"#;
    let config = TablesConfig::from_json_str(raw).unwrap();
    let registry = SchemaRegistry::from_config(&config).unwrap();

    let rows = registry.export_metadata();
    assert_eq!(registry.load_metadata(&rows).unwrap(), 1);

    let rebuilt = SchemaRegistry::new();
    rebuilt.load_metadata(&rows).unwrap();
    let names: Vec<_> = rebuilt
        .resolve("pos")
        .unwrap()
        .fields
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names, vec!["x", "id", "y"]);
    assert!(registry.load_config(&config).is_ok());
}

#[test]
fn test_metadata_file_rediscovers_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata.json");
    let config = TablesConfig::from_json_str(TABLES).unwrap();

    let first = SchemaRegistry::new().with_metadata_store(MetadataStore::new(&path));
    first.load_config(&config).unwrap();

    // a later start without the table configuration
    let second = SchemaRegistry::new().with_metadata_store(MetadataStore::new(&path));
    assert_eq!(second.restore_metadata().unwrap(), 3);
    assert_eq!(
        second.resolve("encounter").unwrap().fingerprint(),
        first.resolve("encounter").unwrap().fingerprint()
    );

    // the same configuration on top of restored metadata registers cleanly
    assert_eq!(second.load_config(&config).unwrap(), 3);
}
