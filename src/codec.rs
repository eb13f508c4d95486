//! Schema-driven binary row encoding.
//!
//! No per-value type tag is stored on disk (§4.2, §9) — the schema loaded
//! at read time dictates how each field is decoded. Fields are encoded in
//! the schema's field-name-sorted order so encoding is deterministic
//! regardless of the order callers populate a row in.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use crate::error::{Result, SrdbError};
use crate::schema::{FieldType, Schema};
use crate::value::{Row, TaggedValue};

fn corrupt(msg: impl Into<String>) -> SrdbError {
    SrdbError::Corruption(msg.into())
}

/// Encode `data` per `schema`'s sorted field list. Nullable fields get a
/// one-byte presence flag; non-nullable fields are written unconditionally.
pub fn encode_data(schema: &Schema, data: &BTreeMap<String, TaggedValue>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for field in schema.sorted_fields() {
        let value = data.get(&field.name).unwrap_or(&TaggedValue::Null);
        if field.nullable {
            let present = !matches!(value, TaggedValue::Null);
            buf.write_all(&[present as u8])?;
            if !present {
                continue;
            }
        }
        encode_value(&mut buf, field.type_, value)?;
    }
    Ok(buf)
}

pub fn decode_data(schema: &Schema, bytes: &[u8]) -> Result<BTreeMap<String, TaggedValue>> {
    let mut cursor = Cursor::new(bytes);
    let mut out = BTreeMap::new();
    for field in schema.sorted_fields() {
        if field.nullable {
            let mut flag = [0u8; 1];
            cursor
                .read_exact(&mut flag)
                .map_err(|e| corrupt(format!("truncated presence flag: {}", e)))?;
            if flag[0] == 0 {
                out.insert(field.name.clone(), TaggedValue::Null);
                continue;
            }
        }
        let value = decode_value(&mut cursor, field.type_)?;
        out.insert(field.name.clone(), value);
    }
    Ok(out)
}

fn encode_value(buf: &mut Vec<u8>, ty: FieldType, value: &TaggedValue) -> Result<()> {
    match (ty, value) {
        (FieldType::Int64, TaggedValue::Int64(v)) => buf.write_all(&v.to_le_bytes())?,
        (FieldType::Float64, TaggedValue::Float64(v)) => buf.write_all(&v.to_le_bytes())?,
        (FieldType::Bool, TaggedValue::Bool(v)) => buf.write_all(&[*v as u8])?,
        (FieldType::String, TaggedValue::Str(v)) => {
            buf.write_all(&(v.len() as u32).to_le_bytes())?;
            buf.write_all(v.as_bytes())?;
        }
        (FieldType::Bytes, TaggedValue::Bytes(v)) => {
            buf.write_all(&(v.len() as u32).to_le_bytes())?;
            buf.write_all(v)?;
        }
        _ => {
            return Err(SrdbError::TypeMismatch {
                field: String::new(),
                expected: "matching schema type",
                found: value.type_name(),
            })
        }
    }
    Ok(())
}

fn decode_value(cursor: &mut Cursor<&[u8]>, ty: FieldType) -> Result<TaggedValue> {
    Ok(match ty {
        FieldType::Int64 => {
            let mut buf = [0u8; 8];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| corrupt(format!("truncated int64: {}", e)))?;
            TaggedValue::Int64(i64::from_le_bytes(buf))
        }
        FieldType::Float64 => {
            let mut buf = [0u8; 8];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| corrupt(format!("truncated float64: {}", e)))?;
            TaggedValue::Float64(f64::from_le_bytes(buf))
        }
        FieldType::Bool => {
            let mut buf = [0u8; 1];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| corrupt(format!("truncated bool: {}", e)))?;
            TaggedValue::Bool(buf[0] != 0)
        }
        FieldType::String => {
            let len = read_u32(cursor)?;
            let mut buf = vec![0u8; len as usize];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| corrupt(format!("truncated string: {}", e)))?;
            TaggedValue::Str(String::from_utf8(buf).map_err(|e| corrupt(e.to_string()))?)
        }
        FieldType::Bytes => {
            let len = read_u32(cursor)?;
            let mut buf = vec![0u8; len as usize];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| corrupt(format!("truncated bytes: {}", e)))?;
            TaggedValue::Bytes(buf)
        }
    })
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| corrupt(format!("truncated length prefix: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

/// Encode a full row payload: `seq(8) | time(8) | schema-driven data`.
pub fn encode_row(schema: &Schema, row: &Row) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    buf.write_all(&row.seq.to_le_bytes())?;
    buf.write_all(&row.time.to_le_bytes())?;
    buf.extend(encode_data(schema, &row.data)?);
    Ok(buf)
}

pub fn decode_row(schema: &Schema, bytes: &[u8]) -> Result<Row> {
    if bytes.len() < 16 {
        return Err(corrupt("row payload shorter than seq+time header"));
    }
    let seq = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let time = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let data = decode_data(schema, &bytes[16..])?;
    Ok(Row { seq, time, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Schema {
        Schema::new(
            "t",
            vec![
                Field {
                    name: "name".into(),
                    type_: FieldType::String,
                    indexed: false,
                    nullable: false,
                    comment: String::new(),
                },
                Field {
                    name: "age".into(),
                    type_: FieldType::Int64,
                    indexed: false,
                    nullable: true,
                    comment: String::new(),
                },
            ],
        )
    }

    #[test]
    fn row_roundtrips() {
        let schema = schema();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TaggedValue::Str("alice".into()));
        data.insert("age".to_string(), TaggedValue::Int64(30));
        let row = Row::new(7, 1234, data);

        let bytes = encode_row(&schema, &row).unwrap();
        let decoded = decode_row(&schema, &bytes).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn nullable_field_roundtrips_as_null() {
        let schema = schema();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TaggedValue::Str("bob".into()));
        data.insert("age".to_string(), TaggedValue::Null);
        let row = Row::new(1, 0, data);

        let bytes = encode_row(&schema, &row).unwrap();
        let decoded = decode_row(&schema, &bytes).unwrap();
        assert_eq!(decoded.data.get("age"), Some(&TaggedValue::Null));
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let schema = schema();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TaggedValue::Str("carol".into()));
        data.insert("age".to_string(), TaggedValue::Int64(1));
        let row = Row::new(1, 0, data);
        let mut bytes = encode_row(&schema, &row).unwrap();
        bytes.truncate(bytes.len() - 2);
        let err = decode_row(&schema, &bytes).unwrap_err();
        assert!(matches!(err, SrdbError::Corruption(_)));
    }
}
