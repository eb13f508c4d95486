//! Row and value types.
//!
//! A row is `{ seq, time, data }`; `data` maps schema field names to
//! [`TaggedValue`]s. The tag only exists in memory — on disk, encoding is
//! schema-driven and carries no per-value type byte (§4.2, §9).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single field value. Kept as a tagged union in memory; callers coerce
/// into this shape via [`crate::schema::validate_and_coerce`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaggedValue {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Null,
}

impl TaggedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaggedValue::Int64(_) => "int64",
            TaggedValue::Float64(_) => "float64",
            TaggedValue::Bool(_) => "bool",
            TaggedValue::Str(_) => "string",
            TaggedValue::Bytes(_) => "bytes",
            TaggedValue::Null => "null",
        }
    }

    /// Rough in-memory footprint, used by the memtable's size estimator.
    pub fn estimated_size(&self) -> usize {
        match self {
            TaggedValue::Int64(_) | TaggedValue::Float64(_) => 8,
            TaggedValue::Bool(_) => 1,
            TaggedValue::Str(s) => s.len(),
            TaggedValue::Bytes(b) => b.len(),
            TaggedValue::Null => 0,
        }
    }
}

/// A committed row. `seq` is the primary key; `time` only breaks ties
/// between two rows sharing a `seq` during compaction merges (§3.1).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub seq: i64,
    pub time: i64,
    pub data: BTreeMap<String, TaggedValue>,
}

impl Row {
    pub fn new(seq: i64, time: i64, data: BTreeMap<String, TaggedValue>) -> Self {
        Self { seq, time, data }
    }

    pub fn estimated_size(&self) -> usize {
        // seq + time + per-field name/value overhead.
        16 + self
            .data
            .iter()
            .map(|(k, v)| k.len() + v.estimated_size() + 8)
            .sum::<usize>()
    }
}
