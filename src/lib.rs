//! SRDB: an embeddable, append-only, schema-aware row store for
//! sequence-keyed workloads.
//!
//! A table assigns each inserted row a monotonic `seq` and durably
//! records it before acknowledging the write:
//!
//! ```text
//! Insert(data)
//!   -> schema.validate_and_coerce
//!   -> assign seq
//!   -> WAL.append
//!   -> Memtable.put
//!   -> (size threshold?) rotate mutable -> immutable -> flush -> SST on L0
//!   -> VersionSet.log_and_apply
//! ```
//!
//! On-disk storage is a Log-Structured Merge tree with up to seven
//! levels (L0-L6) of immutable, seq-indexed SST files; a MANIFEST log
//! records every Version transition atomically. See `engine::Table` for
//! the facade that ties these pieces together.

pub mod btree;
pub mod clock;
pub mod codec;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod memtable;
pub mod schema;
pub mod sst;
pub mod value;
pub mod version;
pub mod wal;

pub use config::{TableConfig, TableConfigBuilder, WalSyncPolicy};
pub use engine::{Table, ValueIndex};
pub use error::{Result, SrdbError};
pub use schema::{Field, FieldType, Schema};
pub use value::{Row, TaggedValue};
