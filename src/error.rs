//! Crate-wide error type.
//!
//! Mirrors the error surface named in the external interface contract:
//! schema problems, I/O, corruption, and the two operational states
//! (`NotFound` on `Get`, `AlreadyClosed` after shutdown).

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SrdbError {
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("type mismatch for field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("schema checksum mismatch for {path}")]
    SchemaChecksumMismatch { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corruption in {0}")]
    Corruption(String),

    #[error("key not found")]
    NotFound,

    #[error("table already closed")]
    AlreadyClosed,

    #[error("compaction failed: {0}")]
    CompactionFailed(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SrdbError>;

impl From<serde_json::Error> for SrdbError {
    fn from(e: serde_json::Error) -> Self {
        SrdbError::Encoding(e.to_string())
    }
}
