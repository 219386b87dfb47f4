//! Byte encoding of field values
//!
//! Values travel as BCS. The shape of a value is only known at runtime, so
//! encoding goes through a `Serialize` wrapper and decoding through a
//! `DeserializeSeed`, both driven by the field's `TypeTag`. `bcs` enforces
//! canonical ULEB128 lengths, strict booleans, valid UTF-8 and exact
//! consumption of the input.

use std::fmt;

use ethnum::{I256, U256};
use serde::de::{self, DeserializeSeed, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::ser::{self, SerializeSeq, SerializeTuple};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::types::{EnumType, StructType, TypeTag};
use super::value::FieldValue;
use crate::types::CodecError;

/// Encode `value` as an instance of `tag`
pub fn encode(value: &FieldValue, tag: &TypeTag) -> Result<Vec<u8>, CodecError> {
    if !value.matches(tag) {
        return Err(CodecError::TypeMismatch {
            expected: tag.to_string(),
            actual: value.kind_name().to_string(),
        });
    }
    bcs::to_bytes(&Typed { value, tag })
        .map_err(|e| CodecError::malformed(tag.to_string(), e.to_string()))
}

/// Decode `bytes` as exactly one instance of `tag`
pub fn decode(bytes: &[u8], tag: &TypeTag) -> Result<FieldValue, CodecError> {
    bcs::from_bytes_seed(FieldSeed(tag), bytes)
        .map_err(|e| CodecError::malformed(tag.to_string(), e.to_string()))
}

/// A value paired with the tag it serializes as
struct Typed<'a> {
    value: &'a FieldValue,
    tag: &'a TypeTag,
}

impl Serialize for Typed<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.value, self.tag) {
            (FieldValue::U8(v), TypeTag::U8) => serializer.serialize_u8(*v),
            (FieldValue::U16(v), TypeTag::U16) => serializer.serialize_u16(*v),
            (FieldValue::U32(v), TypeTag::U32) => serializer.serialize_u32(*v),
            (FieldValue::U64(v), TypeTag::U64) => serializer.serialize_u64(*v),
            (FieldValue::U128(v), TypeTag::U128) => serializer.serialize_u128(*v),
            (FieldValue::U256(v), TypeTag::U256) => v.to_le_bytes().serialize(serializer),
            (FieldValue::I8(v), TypeTag::I8) => serializer.serialize_i8(*v),
            (FieldValue::I16(v), TypeTag::I16) => serializer.serialize_i16(*v),
            (FieldValue::I32(v), TypeTag::I32) => serializer.serialize_i32(*v),
            (FieldValue::I64(v), TypeTag::I64) => serializer.serialize_i64(*v),
            (FieldValue::I128(v), TypeTag::I128) => serializer.serialize_i128(*v),
            (FieldValue::I256(v), TypeTag::I256) => v.to_le_bytes().serialize(serializer),
            (FieldValue::Bool(v), TypeTag::Bool) => serializer.serialize_bool(*v),
            (FieldValue::Address(a), TypeTag::Address) => a.serialize(serializer),
            (FieldValue::String(s), TypeTag::String) => serializer.serialize_str(s),
            (FieldValue::Bytes(b), TypeTag::Bytes) => serializer.serialize_bytes(b),
            (FieldValue::Vector(items), TypeTag::Vector(inner)) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for value in items {
                    seq.serialize_element(&Typed { value, tag: inner })?;
                }
                seq.end()
            }
            (FieldValue::Variant { index, payload }, TypeTag::Enum(e)) => {
                let variant = e
                    .variants
                    .get(*index as usize)
                    .ok_or_else(|| {
                        <S::Error as ser::Error>::custom(format!("no variant {} in {}", index, e.name))
                    })?;
                match (payload, &variant.payload) {
                    (None, None) => serializer.serialize_unit_variant("", *index, ""),
                    (Some(p), Some(t)) => {
                        serializer.serialize_newtype_variant("", *index, "", &Typed { value: p, tag: t })
                    }
                    _ => Err(ser::Error::custom(format!("payload mismatch for {}", variant.name))),
                }
            }
            (FieldValue::Struct(fields), TypeTag::Struct(s)) => {
                let mut tuple = serializer.serialize_tuple(s.fields.len())?;
                for ((_, value), (_, tag)) in fields.iter().zip(&s.fields) {
                    tuple.serialize_element(&Typed { value, tag })?;
                }
                tuple.end()
            }
            (value, tag) => Err(ser::Error::custom(format!(
                "cannot encode {} as {}",
                value.kind_name(),
                tag
            ))),
        }
    }
}

/// Deserializes one value of the wrapped tag
#[derive(Clone, Copy)]
struct FieldSeed<'a>(&'a TypeTag);

impl<'de> DeserializeSeed<'de> for FieldSeed<'_> {
    type Value = FieldValue;

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> Result<FieldValue, D::Error> {
        let value = match self.0 {
            TypeTag::U8 => FieldValue::U8(u8::deserialize(d)?),
            TypeTag::U16 => FieldValue::U16(u16::deserialize(d)?),
            TypeTag::U32 => FieldValue::U32(u32::deserialize(d)?),
            TypeTag::U64 => FieldValue::U64(u64::deserialize(d)?),
            TypeTag::U128 => FieldValue::U128(u128::deserialize(d)?),
            TypeTag::U256 => FieldValue::U256(U256::from_le_bytes(<[u8; 32]>::deserialize(d)?)),
            TypeTag::I8 => FieldValue::I8(i8::deserialize(d)?),
            TypeTag::I16 => FieldValue::I16(i16::deserialize(d)?),
            TypeTag::I32 => FieldValue::I32(i32::deserialize(d)?),
            TypeTag::I64 => FieldValue::I64(i64::deserialize(d)?),
            TypeTag::I128 => FieldValue::I128(i128::deserialize(d)?),
            TypeTag::I256 => FieldValue::I256(I256::from_le_bytes(<[u8; 32]>::deserialize(d)?)),
            TypeTag::Bool => FieldValue::Bool(bool::deserialize(d)?),
            TypeTag::Address => FieldValue::Address(<[u8; 32]>::deserialize(d)?),
            TypeTag::String => FieldValue::String(String::deserialize(d)?),
            TypeTag::Bytes => FieldValue::Bytes(Vec::<u8>::deserialize(d)?),
            TypeTag::Vector(inner) => d.deserialize_seq(VectorVisitor(inner))?,
            TypeTag::Struct(s) => d.deserialize_tuple(s.fields.len(), StructVisitor(s))?,
            // BCS reads the discriminant as ULEB128 and ignores the names
            TypeTag::Enum(e) => d.deserialize_enum("", &[], EnumVisitor(e))?,
        };
        Ok(value)
    }
}

struct VectorVisitor<'a>(&'a TypeTag);

impl<'de> Visitor<'de> for VectorVisitor<'_> {
    type Value = FieldValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vector<{}>", self.0)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FieldValue, A::Error> {
        // cap the preallocation; the declared length is untrusted input
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element_seed(FieldSeed(self.0))? {
            items.push(item);
        }
        Ok(FieldValue::Vector(items))
    }
}

struct StructVisitor<'a>(&'a StructType);

impl<'de> Visitor<'de> for StructVisitor<'_> {
    type Value = FieldValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "struct {}", self.0.name)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FieldValue, A::Error> {
        let mut fields = Vec::with_capacity(self.0.fields.len());
        for (i, (name, tag)) in self.0.fields.iter().enumerate() {
            let value = seq
                .next_element_seed(FieldSeed(tag))?
                .ok_or_else(|| <A::Error as de::Error>::invalid_length(i, &self))?;
            fields.push((name.clone(), value));
        }
        Ok(FieldValue::Struct(fields))
    }
}

struct EnumVisitor<'a>(&'a EnumType);

impl<'de> Visitor<'de> for EnumVisitor<'_> {
    type Value = FieldValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "enum {}", self.0.name)
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<FieldValue, A::Error> {
        let (index, access) = data.variant::<u32>()?;
        let variant = self.0.variants.get(index as usize).ok_or_else(|| {
            <A::Error as de::Error>::custom(format!(
                "discriminant {} out of range ({} variants)",
                index,
                self.0.variants.len()
            ))
        })?;
        let payload = match &variant.payload {
            Some(tag) => Some(Box::new(access.newtype_variant_seed(FieldSeed(tag))?)),
            None => {
                access.unit_variant()?;
                None
            }
        };
        Ok(FieldValue::Variant { index, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::types::VariantType;

    fn roundtrip(value: FieldValue, tag: TypeTag) {
        let bytes = encode(&value, &tag).unwrap();
        assert_eq!(decode(&bytes, &tag).unwrap(), value, "roundtrip for {}", tag);
    }

    fn empty_struct(name: &str) -> TypeTag {
        TypeTag::Struct(StructType {
            name: name.into(),
            fields: vec![],
        })
    }

    #[test]
    fn test_integers_are_little_endian() {
        assert_eq!(encode(&FieldValue::U32(5), &TypeTag::U32).unwrap(), vec![5, 0, 0, 0]);
        assert_eq!(encode(&FieldValue::I16(-2), &TypeTag::I16).unwrap(), vec![0xfe, 0xff]);
        assert_eq!(
            decode(&[0x01, 0x02], &TypeTag::U16).unwrap(),
            FieldValue::U16(0x0201)
        );
    }

    #[test]
    fn test_wide_integers_are_32_le_bytes() {
        let bytes = encode(&FieldValue::U256(U256::from(1u8)), &TypeTag::U256).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 1);
        assert_eq!(
            decode(&[0xff; 32], &TypeTag::I256).unwrap(),
            FieldValue::I256(I256::from(-1i128))
        );
        assert_eq!(
            decode(&[0xff; 32], &TypeTag::U256).unwrap(),
            FieldValue::U256(U256::MAX)
        );
    }

    #[test]
    fn test_signedness_comes_from_tag() {
        let bytes = [0xff];
        assert_eq!(decode(&bytes, &TypeTag::U8).unwrap(), FieldValue::U8(255));
        assert_eq!(decode(&bytes, &TypeTag::I8).unwrap(), FieldValue::I8(-1));
    }

    #[test]
    fn test_fixed_width_must_be_exact() {
        assert!(matches!(
            decode(&[1, 0, 0], &TypeTag::U32),
            Err(CodecError::MalformedEncoding { .. })
        ));
        assert!(matches!(
            decode(&[1, 0, 0, 0, 0], &TypeTag::U32),
            Err(CodecError::MalformedEncoding { .. })
        ));
    }

    #[test]
    fn test_roundtrip_composites() {
        roundtrip(FieldValue::String("héllo".into()), TypeTag::String);
        roundtrip(FieldValue::Bytes(vec![1, 2, 3]), TypeTag::Bytes);
        roundtrip(FieldValue::I256(I256::from(-77i128)), TypeTag::I256);
        roundtrip(
            FieldValue::Vector(vec![
                FieldValue::Bytes(vec![]),
                FieldValue::Bytes(vec![9; 200]),
            ]),
            TypeTag::Vector(Box::new(TypeTag::Bytes)),
        );
    }

    #[test]
    fn test_vector_of_zero_width_elements() {
        let tag = TypeTag::Vector(Box::new(empty_struct("E")));
        let value = FieldValue::Vector(vec![FieldValue::Struct(vec![]), FieldValue::Struct(vec![])]);
        let bytes = encode(&value, &tag).unwrap();
        assert_eq!(bytes, vec![2]);
        assert_eq!(decode(&bytes, &tag).unwrap(), value);
    }

    #[test]
    fn test_vector_length_prefix_must_match() {
        let tag = TypeTag::Vector(Box::new(TypeTag::U16));
        // declares 3 elements, carries 2
        assert!(decode(&[3, 1, 0, 2, 0], &tag).is_err());
        // declares 1 element, carries 2
        assert!(decode(&[1, 1, 0, 2, 0], &tag).is_err());
        assert_eq!(
            decode(&[2, 1, 0, 2, 0], &tag).unwrap(),
            FieldValue::Vector(vec![FieldValue::U16(1), FieldValue::U16(2)])
        );
    }

    #[test]
    fn test_enum_payload_only_when_declared() {
        let tag = TypeTag::Enum(EnumType {
            name: "Action".into(),
            variants: vec![
                VariantType { name: "Idle".into(), payload: None },
                VariantType { name: "Move".into(), payload: Some(TypeTag::U8) },
            ],
        });
        assert_eq!(
            decode(&[0], &tag).unwrap(),
            FieldValue::Variant { index: 0, payload: None }
        );
        assert_eq!(
            decode(&[1, 7], &tag).unwrap(),
            FieldValue::Variant { index: 1, payload: Some(Box::new(FieldValue::U8(7))) }
        );
        roundtrip(
            FieldValue::Variant { index: 1, payload: Some(Box::new(FieldValue::U8(9))) },
            tag.clone(),
        );
        // unit variant followed by stray byte
        assert!(decode(&[0, 7], &tag).is_err());
        // out of range discriminant
        assert!(decode(&[2], &tag).is_err());
    }

    #[test]
    fn test_struct_roundtrip() {
        let tag = TypeTag::Struct(StructType {
            name: "Position".into(),
            fields: vec![("x".into(), TypeTag::U32), ("y".into(), TypeTag::U32)],
        });
        roundtrip(
            FieldValue::Struct(vec![
                ("x".into(), FieldValue::U32(3)),
                ("y".into(), FieldValue::U32(4)),
            ]),
            tag,
        );
    }

    #[test]
    fn test_encode_type_mismatch() {
        let err = encode(&FieldValue::U64(5), &TypeTag::U32).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch { expected: "u32".into(), actual: "u64".into() }
        );
    }

    #[test]
    fn test_invalid_bool_and_utf8() {
        assert!(decode(&[2], &TypeTag::Bool).is_err());
        assert!(decode(&[2, 0xc3, 0x28], &TypeTag::String).is_err());
    }

    #[test]
    fn test_uleb128_lengths() {
        let bytes = encode(&FieldValue::Bytes(vec![0; 300]), &TypeTag::Bytes).unwrap();
        assert_eq!(&bytes[..2], &[0xac, 0x02]);
        assert!(matches!(decode(&bytes, &TypeTag::Bytes).unwrap(), FieldValue::Bytes(b) if b.len() == 300));
        // 0x80 0x00 encodes zero non-canonically
        assert!(decode(&[0x80, 0x00], &TypeTag::Bytes).is_err());
    }
}
