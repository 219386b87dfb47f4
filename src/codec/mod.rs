//! Field codec
//!
//! Typed values for dynamic table fields and their byte encoding.

pub mod types;
pub mod value;
pub mod wire;

pub use types::{EnumType, StructType, TypeTag, VariantType};
pub use ethnum::{I256, U256};
pub use value::FieldValue;
pub use wire::{decode, encode};
