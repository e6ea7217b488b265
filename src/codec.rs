//! Record codec (C1): typed tuples <-> little-endian byte strings.
//!
//! A [`Schema`] is an ordered list of [`FieldType`] tags. [`encode_record`]
//! and [`decode_record`] convert between a `Vec<Value>` and the flat byte
//! encoding that slotted pages actually store.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_VAR_STR_LEN;
use crate::error::{DecodeError, Error, Result};

/// One field's type tag. `int` is conventionally the first field of every
/// record, since the engine keys records on a record's first 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Short,
    Byte,
    VarStr,
}

/// An ordered list of field types describing every record in a file.
pub type Schema = Vec<FieldType>;

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(u32),
    Short(u16),
    Byte(u8),
    VarStr(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Short(_) => "short",
            Value::Byte(_) => "byte",
            Value::VarStr(_) => "var_str",
        }
    }
}

/// A full record: one [`Value`] per schema field, in schema order.
pub type Record = Vec<Value>;

fn encode_field(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Short(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Byte(v) => out.push(*v),
        Value::VarStr(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > MAX_VAR_STR_LEN {
                return Err(Error::VarStrTooLong { len: bytes.len() });
            }
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

/// Encodes `record` against `schema`, concatenating each field's bytes in
/// order. Fails with `SchemaMismatch` if the field count doesn't match, or
/// `VarStrTooLong` if a `var_str` value's length can't fit in the 1-byte
/// length prefix.
pub fn encode_record(record: &Record, schema: &Schema) -> Result<Vec<u8>> {
    if record.len() != schema.len() {
        return Err(Error::SchemaMismatch {
            expected: schema.len(),
            got: record.len(),
        });
    }
    let mut out = Vec::new();
    for value in record {
        encode_field(value, &mut out)?;
    }
    Ok(out)
}

fn decode_field(bytes: &[u8], idx: usize, field_type: FieldType) -> Result<(Value, usize)> {
    match field_type {
        FieldType::Int => {
            let end = idx + 4;
            let slice = bytes.get(idx..end).ok_or(DecodeError::UnexpectedEof {
                consumed: bytes.len().min(idx),
                field_type: "int",
            })?;
            let arr: [u8; 4] = slice.try_into().expect("slice length checked above");
            Ok((Value::Int(u32::from_le_bytes(arr)), end))
        }
        FieldType::Short => {
            let end = idx + 2;
            let slice = bytes.get(idx..end).ok_or(DecodeError::UnexpectedEof {
                consumed: bytes.len().min(idx),
                field_type: "short",
            })?;
            let arr: [u8; 2] = slice.try_into().expect("slice length checked above");
            Ok((Value::Short(u16::from_le_bytes(arr)), end))
        }
        FieldType::Byte => {
            let byte = *bytes.get(idx).ok_or(DecodeError::UnexpectedEof {
                consumed: bytes.len().min(idx),
                field_type: "byte",
            })?;
            Ok((Value::Byte(byte), idx + 1))
        }
        FieldType::VarStr => {
            let len = *bytes.get(idx).ok_or(DecodeError::UnexpectedEof {
                consumed: bytes.len().min(idx),
                field_type: "var_str",
            })? as usize;
            let start = idx + 1;
            let end = start + len;
            let slice = bytes.get(start..end).ok_or(DecodeError::VarStrOverrun {
                declared: len,
                available: bytes.len().saturating_sub(start),
            })?;
            let s = std::str::from_utf8(slice).map_err(DecodeError::InvalidUtf8)?;
            Ok((Value::VarStr(s.to_owned()), end))
        }
    }
}

/// Decodes `bytes` against `schema`, consuming it left-to-right. Any
/// shortfall, oversized `var_str` length, or invalid UTF-8 is a
/// [`Error::Decode`].
pub fn decode_record(bytes: &[u8], schema: &Schema) -> Result<Record> {
    let mut idx = 0;
    let mut record = Vec::with_capacity(schema.len());
    for &field_type in schema {
        let (value, next_idx) = decode_field(bytes, idx, field_type)?;
        record.push(value);
        idx = next_idx;
    }
    Ok(record)
}

/// Extracts the 4-byte key from an encoded record's front. Every record's
/// first field is assumed to be `int`-sized, per the engine's keying
/// convention.
pub fn key_of(encoded: &[u8]) -> Result<[u8; crate::constants::KEY_SIZE]> {
    encoded
        .get(..crate::constants::KEY_SIZE)
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::Decode(DecodeError::UnexpectedEof {
            consumed: encoded.len(),
            field_type: "key",
        }))
}

/// Encodes a bare `u32` id as a 4-byte little-endian key, for use in
/// `find`/`read`/`update`/`delete` lookups.
pub fn encode_key(id: u32) -> [u8; crate::constants::KEY_SIZE] {
    id.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> Schema {
        vec![
            FieldType::Int,
            FieldType::VarStr,
            FieldType::VarStr,
            FieldType::Int,
        ]
    }

    #[test]
    fn round_trip_all_field_types() {
        let schema = user_schema();
        let record = vec![
            Value::Int(42),
            Value::VarStr("Brian Green".into()),
            Value::VarStr("Guam".into()),
            Value::Int(76486),
        ];
        let encoded = encode_record(&record, &schema).unwrap();
        let decoded = decode_record(&encoded, &schema).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn empty_var_str_round_trips() {
        let schema = vec![FieldType::Int, FieldType::VarStr];
        let record = vec![Value::Int(1), Value::VarStr(String::new())];
        let encoded = encode_record(&record, &schema).unwrap();
        assert_eq!(decode_record(&encoded, &schema).unwrap(), record);
    }

    #[test]
    fn schema_mismatch_on_wrong_field_count() {
        let schema = user_schema();
        let record = vec![Value::Int(1)];
        let err = encode_record(&record, &schema).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn var_str_too_long_is_not_a_schema_mismatch() {
        let schema = vec![FieldType::VarStr];
        let record = vec![Value::VarStr("x".repeat(256))];
        let err = encode_record(&record, &schema).unwrap_err();
        assert!(matches!(err, Error::VarStrTooLong { len: 256 }));
    }

    #[test]
    fn decode_error_on_truncated_var_str() {
        // declares a 10-byte string but only provides 2
        let bytes = vec![10u8, b'a', b'b'];
        let schema = vec![FieldType::VarStr];
        let err = decode_record(&bytes, &schema).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::VarStrOverrun { .. })
        ));
    }

    #[test]
    fn decode_error_on_short_buffer() {
        let bytes = vec![1u8, 2u8];
        let schema = vec![FieldType::Int];
        let err = decode_record(&bytes, &schema).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn key_of_reads_first_four_bytes_le() {
        let schema = vec![FieldType::Int, FieldType::Byte];
        let record = vec![Value::Int(0x0102_0304), Value::Byte(9)];
        let encoded = encode_record(&record, &schema).unwrap();
        assert_eq!(key_of(&encoded).unwrap(), encode_key(0x0102_0304));
    }
}
