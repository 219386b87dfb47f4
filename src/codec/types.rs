//! Type tags for dynamic table fields
//!
//! A `TypeTag` is the runtime description of a field's type. Tags are parsed
//! from the type strings the ledger tooling emits (`u32`, `address`,
//! `vector<u8>`, `Status`, ...) and drive both encode and decode.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::CodecError;

/// One variant of an enum type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantType {
    pub name: String,
    /// Payload type, `None` for unit variants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TypeTag>,
}

/// Enum (discriminated union) type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<VariantType>,
}

impl EnumType {
    /// Enum whose variants carry no payload
    pub fn unit(name: impl Into<String>, variants: &[&str]) -> Self {
        Self {
            name: name.into(),
            variants: variants
                .iter()
                .map(|v| VariantType {
                    name: v.to_string(),
                    payload: None,
                })
                .collect(),
        }
    }

    pub fn variant_index(&self, name: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|v| v.name == name)
            .map(|i| i as u32)
    }
}

/// Nested struct type, fields in declared (encoding) order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, TypeTag)>,
}

/// Runtime type of a field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeTag {
    U8,
    U16,
    U32,
    U64,
    U128,
    U256,
    I8,
    I16,
    I32,
    I64,
    I128,
    I256,
    Bool,
    Address,
    String,
    Bytes,
    Vector(Box<TypeTag>),
    Enum(EnumType),
    Struct(StructType),
}

impl TypeTag {
    /// Parse a ledger type string.
    ///
    /// `enums` supplies the enum types declared alongside the tables; any
    /// other non-primitive name is rejected.
    pub fn parse(s: &str, enums: &HashMap<String, EnumType>) -> Result<Self, CodecError> {
        let s = s.trim();
        let tag = match s {
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "u128" => Self::U128,
            "u256" => Self::U256,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "i128" => Self::I128,
            "i256" => Self::I256,
            "bool" => Self::Bool,
            "address" => Self::Address,
            "String" | "string" => Self::String,
            "vector<u8>" => Self::Bytes,
            _ => {
                if let Some(inner) = s.strip_prefix("vector<").and_then(|r| r.strip_suffix('>')) {
                    Self::Vector(Box::new(Self::parse(inner, enums)?))
                } else if let Some(e) = enums.get(s) {
                    Self::Enum(e.clone())
                } else {
                    return Err(CodecError::UnknownType(s.to_string()));
                }
            }
        };
        Ok(tag)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::U64 => write!(f, "u64"),
            Self::U128 => write!(f, "u128"),
            Self::U256 => write!(f, "u256"),
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::I128 => write!(f, "i128"),
            Self::I256 => write!(f, "i256"),
            Self::Bool => write!(f, "bool"),
            Self::Address => write!(f, "address"),
            Self::String => write!(f, "String"),
            Self::Bytes => write!(f, "vector<u8>"),
            Self::Vector(inner) => write!(f, "vector<{}>", inner),
            Self::Enum(e) => write!(f, "{}", e.name),
            Self::Struct(s) => write!(f, "{}", s.name),
        }
    }
}
