//! Schema registry for dynamic tables

pub mod config;
pub mod descriptor;
pub mod metadata;
pub mod registry;

pub use config::{TableEntry, TablesConfig};
pub use descriptor::{FieldDescription, FieldDescriptor, TableDescription, TableDescriptor, TableKind};
pub use metadata::{MetadataSnapshot, MetadataStore, TableFieldRow};
pub use registry::{SchemaRegistry, TableCatalog};
