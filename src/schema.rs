//! Schema: field declarations, canonical checksum, and the sidecar file.
//!
//! A schema determines on-disk encoding of row data, secondary-index
//! targets, and is paired with a SHA-256 checksum recomputed on every open
//! (§3.2, §6, §8 scenario 6).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SrdbError};
use crate::value::TaggedValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int64,
    Float64,
    Bool,
    String,
    Bytes,
}

impl FieldType {
    fn type_name(self) -> &'static str {
        match self {
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields in a stable, field-name-sorted order, used both for the
    /// checksum and for the on-disk row encoding (§3.2, §6).
    pub fn sorted_fields(&self) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.fields.iter().collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        fields
    }

    /// SHA-256 over a canonical, field-name-sorted JSON serialization.
    pub fn checksum(&self) -> String {
        let sorted = self.sorted_fields();
        let canonical = serde_json::to_vec(&sorted).expect("field list always serializes");
        let digest = Sha256::digest(&canonical);
        hex_encode(&digest)
    }

    /// Validate and coerce a loosely-typed insert payload into row data.
    /// This is the concrete form of the schema-validator collaborator
    /// interface named in §1/§3.2 — required for `Insert` to function.
    pub fn validate_and_coerce(
        &self,
        input: BTreeMap<String, TaggedValue>,
    ) -> Result<BTreeMap<String, TaggedValue>> {
        let mut out = BTreeMap::new();
        for field in &self.fields {
            match input.get(&field.name) {
                Some(TaggedValue::Null) | None => {
                    if !field.nullable {
                        return Err(SrdbError::SchemaInvalid(format!(
                            "field '{}' is not nullable",
                            field.name
                        )));
                    }
                    out.insert(field.name.clone(), TaggedValue::Null);
                }
                Some(v) => {
                    let coerced = coerce(field, v)?;
                    out.insert(field.name.clone(), coerced);
                }
            }
        }
        for key in input.keys() {
            if self.field(key).is_none() {
                return Err(SrdbError::FieldNotFound(key.clone()));
            }
        }
        Ok(out)
    }
}

fn coerce(field: &Field, value: &TaggedValue) -> Result<TaggedValue> {
    let ok = matches!(
        (field.type_, value),
        (FieldType::Int64, TaggedValue::Int64(_))
            | (FieldType::Float64, TaggedValue::Float64(_))
            | (FieldType::Bool, TaggedValue::Bool(_))
            | (FieldType::String, TaggedValue::Str(_))
            | (FieldType::Bytes, TaggedValue::Bytes(_))
    );
    if ok {
        return Ok(value.clone());
    }
    Err(SrdbError::TypeMismatch {
        field: field.name.clone(),
        expected: field.type_.type_name(),
        found: value.type_name(),
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// The `schema.json` sidecar: schema plus its checksum and a write
/// timestamp, used to detect tampering or a mismatched schema on open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaFile {
    pub version: u32,
    pub timestamp: i64,
    pub checksum: String,
    pub schema: Schema,
}

const SCHEMA_FILE_VERSION: u32 = 1;
pub const SCHEMA_FILE_NAME: &str = "schema.json";

impl SchemaFile {
    pub fn new(schema: Schema, timestamp: i64) -> Self {
        let checksum = schema.checksum();
        Self {
            version: SCHEMA_FILE_VERSION,
            timestamp,
            checksum,
            schema,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read the sidecar and verify its checksum still matches the embedded
    /// schema (§6, §7, §8 scenario 6). Tamper or corruption is a hard
    /// refusal to open.
    pub fn read(path: &Path) -> Result<Schema> {
        let bytes = std::fs::read(path).map_err(SrdbError::Io)?;
        let file: SchemaFile = serde_json::from_slice(&bytes)
            .map_err(|e| SrdbError::Corruption(format!("{}: {}", path.display(), e)))?;
        let recomputed = file.schema.checksum();
        if recomputed != file.checksum {
            return Err(SrdbError::SchemaChecksumMismatch {
                path: path.display().to_string(),
            });
        }
        Ok(file.schema)
    }
}
