//! Typed field values
//!
//! `FieldValue` is a closed sum type over every value a dynamic table field can
//! hold. Ordering is total so values can act as primary keys and sort keys.

use ethnum::{I256, U256};
use serde_json::{json, Map, Value as JsonValue};

use super::types::TypeTag;
use crate::types::CodecError;

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    U256(U256),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    I256(I256),
    Bool(bool),
    Address([u8; 32]),
    String(String),
    Bytes(Vec<u8>),
    /// Enum variant: discriminant plus payload when the variant declares one
    Variant {
        index: u32,
        payload: Option<Box<FieldValue>>,
    },
    /// Struct fields in declared order
    Struct(Vec<(String, FieldValue)>),
    Vector(Vec<FieldValue>),
}

impl FieldValue {
    /// Short name of the value's own tag, used in mismatch errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::U128(_) => "u128",
            Self::U256(_) => "u256",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::I128(_) => "i128",
            Self::I256(_) => "i256",
            Self::Bool(_) => "bool",
            Self::Address(_) => "address",
            Self::String(_) => "String",
            Self::Bytes(_) => "vector<u8>",
            Self::Variant { .. } => "enum",
            Self::Struct(_) => "struct",
            Self::Vector(_) => "vector",
        }
    }

    /// Whether this value is a well-formed instance of `tag`
    pub fn matches(&self, tag: &TypeTag) -> bool {
        match (self, tag) {
            (Self::U8(_), TypeTag::U8)
            | (Self::U16(_), TypeTag::U16)
            | (Self::U32(_), TypeTag::U32)
            | (Self::U64(_), TypeTag::U64)
            | (Self::U128(_), TypeTag::U128)
            | (Self::U256(_), TypeTag::U256)
            | (Self::I8(_), TypeTag::I8)
            | (Self::I16(_), TypeTag::I16)
            | (Self::I32(_), TypeTag::I32)
            | (Self::I64(_), TypeTag::I64)
            | (Self::I128(_), TypeTag::I128)
            | (Self::I256(_), TypeTag::I256)
            | (Self::Bool(_), TypeTag::Bool)
            | (Self::Address(_), TypeTag::Address)
            | (Self::String(_), TypeTag::String)
            | (Self::Bytes(_), TypeTag::Bytes) => true,
            (Self::Vector(items), TypeTag::Vector(inner)) => items.iter().all(|v| v.matches(inner)),
            (Self::Variant { index, payload }, TypeTag::Enum(e)) => {
                match (e.variants.get(*index as usize), payload) {
                    (Some(variant), None) => variant.payload.is_none(),
                    (Some(variant), Some(p)) => {
                        variant.payload.as_ref().is_some_and(|t| p.matches(t))
                    }
                    (None, _) => false,
                }
            }
            (Self::Struct(fields), TypeTag::Struct(s)) => {
                fields.len() == s.fields.len()
                    && fields
                        .iter()
                        .zip(&s.fields)
                        .all(|((name, v), (decl, t))| name == decl && v.matches(t))
            }
            _ => false,
        }
    }

    /// Render as JSON.
    ///
    /// Integers up to 64 bits are JSON numbers; wider integers are decimal
    /// strings. Addresses and byte vectors are `0x`-prefixed hex.
    pub fn to_json(&self, tag: &TypeTag) -> JsonValue {
        match self {
            Self::U8(v) => json!(v),
            Self::U16(v) => json!(v),
            Self::U32(v) => json!(v),
            Self::U64(v) => json!(v),
            Self::U128(v) => json!(v.to_string()),
            Self::U256(v) => json!(v.to_string()),
            Self::I8(v) => json!(v),
            Self::I16(v) => json!(v),
            Self::I32(v) => json!(v),
            Self::I64(v) => json!(v),
            Self::I128(v) => json!(v.to_string()),
            Self::I256(v) => json!(v.to_string()),
            Self::Bool(v) => json!(v),
            Self::Address(a) => json!(format!("0x{}", hex::encode(a))),
            Self::String(s) => json!(s),
            Self::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
            Self::Vector(items) => {
                let inner = match tag {
                    TypeTag::Vector(inner) => inner.as_ref(),
                    other => other,
                };
                JsonValue::Array(items.iter().map(|v| v.to_json(inner)).collect())
            }
            Self::Variant { index, payload } => {
                let variant = match tag {
                    TypeTag::Enum(e) => e.variants.get(*index as usize),
                    _ => None,
                };
                let name = variant
                    .map(|v| v.name.clone())
                    .unwrap_or_else(|| index.to_string());
                let inner = match (payload, variant.and_then(|v| v.payload.as_ref())) {
                    (Some(p), Some(t)) => p.to_json(t),
                    (Some(p), None) => p.to_json(&TypeTag::Bytes),
                    (None, _) => return JsonValue::String(name),
                };
                let mut map = Map::new();
                map.insert(name, inner);
                JsonValue::Object(map)
            }
            Self::Struct(fields) => {
                let decls = match tag {
                    TypeTag::Struct(s) => Some(&s.fields),
                    _ => None,
                };
                let mut map = Map::new();
                for (i, (name, v)) in fields.iter().enumerate() {
                    let t = decls.and_then(|d| d.get(i)).map(|(_, t)| t);
                    map.insert(name.clone(), t.map_or(JsonValue::Null, |t| v.to_json(t)));
                }
                JsonValue::Object(map)
            }
        }
    }

    /// Parse a JSON value as an instance of `tag`
    pub fn from_json(value: &JsonValue, tag: &TypeTag) -> Result<Self, CodecError> {
        let mismatch = || CodecError::TypeMismatch {
            expected: tag.to_string(),
            actual: json_kind(value).to_string(),
        };

        let v = match tag {
            TypeTag::U8 => Self::U8(json_uint(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::U16 => Self::U16(json_uint(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::U32 => Self::U32(json_uint(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::U64 => Self::U64(json_uint(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::U128 => Self::U128(json_uint(value).ok_or_else(mismatch)?),
            TypeTag::U256 => Self::U256(match value {
                JsonValue::String(s) => U256::from_str_radix(s, 10).map_err(|_| mismatch())?,
                _ => U256::from(json_uint(value).ok_or_else(mismatch)?),
            }),
            TypeTag::I8 => Self::I8(json_int(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::I16 => Self::I16(json_int(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::I32 => Self::I32(json_int(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::I64 => Self::I64(json_int(value).and_then(|n| n.try_into().ok()).ok_or_else(mismatch)?),
            TypeTag::I128 => Self::I128(json_int(value).ok_or_else(mismatch)?),
            TypeTag::I256 => Self::I256(match value {
                JsonValue::String(s) => I256::from_str_radix(s, 10).map_err(|_| mismatch())?,
                _ => I256::from(json_int(value).ok_or_else(mismatch)?),
            }),
            TypeTag::Bool => Self::Bool(value.as_bool().ok_or_else(mismatch)?),
            TypeTag::Address => {
                let bytes = json_hex(value).ok_or_else(mismatch)?;
                // short addresses are left-padded, as `0x1` means `0x00..01`
                if bytes.len() > 32 {
                    return Err(mismatch());
                }
                let mut addr = [0u8; 32];
                addr[32 - bytes.len()..].copy_from_slice(&bytes);
                Self::Address(addr)
            }
            TypeTag::String => Self::String(value.as_str().ok_or_else(mismatch)?.to_string()),
            TypeTag::Bytes => Self::Bytes(json_hex(value).ok_or_else(mismatch)?),
            TypeTag::Vector(inner) => Self::Vector(
                value
                    .as_array()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(|item| Self::from_json(item, inner))
                    .collect::<Result<_, _>>()?,
            ),
            TypeTag::Enum(e) => match value {
                JsonValue::String(name) => {
                    let index = e.variant_index(name).ok_or_else(mismatch)?;
                    if e.variants[index as usize].payload.is_some() {
                        return Err(mismatch());
                    }
                    Self::Variant { index, payload: None }
                }
                JsonValue::Object(map) if map.len() == 1 => {
                    let (name, inner) = map.iter().next().ok_or_else(mismatch)?;
                    let index = e.variant_index(name).ok_or_else(mismatch)?;
                    let payload_tag = e.variants[index as usize].payload.as_ref().ok_or_else(mismatch)?;
                    Self::Variant {
                        index,
                        payload: Some(Box::new(Self::from_json(inner, payload_tag)?)),
                    }
                }
                _ => return Err(mismatch()),
            },
            TypeTag::Struct(s) => {
                let map = value.as_object().ok_or_else(mismatch)?;
                let mut fields = Vec::with_capacity(s.fields.len());
                for (name, t) in &s.fields {
                    let field = map.get(name).ok_or_else(mismatch)?;
                    fields.push((name.clone(), Self::from_json(field, t)?));
                }
                Self::Struct(fields)
            }
        };
        Ok(v)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn json_uint(value: &JsonValue) -> Option<u128> {
    match value {
        JsonValue::Number(n) => n.as_u64().map(u128::from),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_int(value: &JsonValue) -> Option<i128> {
    match value {
        JsonValue::Number(n) => n.as_i64().map(i128::from),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_hex(value: &JsonValue) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 == 1 {
        hex::decode(format!("0{}", s)).ok()
    } else {
        hex::decode(s).ok()
    }
}
