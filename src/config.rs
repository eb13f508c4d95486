//! Per-table configuration (§6), builder-validated before use.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SrdbError};
use crate::schema::Field;
use crate::version::NUM_LEVELS;

/// How often the WAL is fsynced relative to an `Insert`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalSyncPolicy {
    EveryWrite,
    Periodic { interval: Duration },
}

const DEFAULT_MEM_TABLE_SIZE: usize = 4 * 1024 * 1024;

/// Default level size limits, bytes (§4.6.1).
pub const DEFAULT_LEVEL_SIZE_LIMITS: [u64; NUM_LEVELS] = [
    10 * 1024 * 1024,             // L0
    100 * 1024 * 1024,            // L1
    1024 * 1024 * 1024,           // L2
    10 * 1024 * 1024 * 1024,      // L3
    100 * 1024 * 1024 * 1024,     // L4
    1024 * 1024 * 1024 * 1024,    // L5
    u64::MAX,                     // L6, unlimited
];

pub const DEFAULT_LEVEL_FILE_LIMITS: [Option<usize>; NUM_LEVELS] =
    [Some(4), None, None, None, None, None, None];

#[derive(Clone, Debug)]
pub struct TableConfig {
    pub dir: PathBuf,
    pub schema_name: String,
    pub fields: Vec<Field>,
    pub mem_table_size: usize,
    pub level_size_limits: [u64; NUM_LEVELS],
    pub level_file_limits: [Option<usize>; NUM_LEVELS],
    pub wal_sync_policy: WalSyncPolicy,
    pub flush_workers: usize,
}

impl TableConfig {
    pub fn builder(dir: impl Into<PathBuf>) -> TableConfigBuilder {
        TableConfigBuilder::new(dir)
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.dir.join("wal")
    }

    pub fn sst_dir(&self) -> PathBuf {
        self.dir.join("sst")
    }
}

pub struct TableConfigBuilder {
    dir: PathBuf,
    schema_name: String,
    fields: Vec<Field>,
    mem_table_size: usize,
    level_size_limits: [u64; NUM_LEVELS],
    level_file_limits: [Option<usize>; NUM_LEVELS],
    wal_sync_policy: WalSyncPolicy,
    flush_workers: usize,
}

impl TableConfigBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            schema_name: String::new(),
            fields: Vec::new(),
            mem_table_size: DEFAULT_MEM_TABLE_SIZE,
            level_size_limits: DEFAULT_LEVEL_SIZE_LIMITS,
            level_file_limits: DEFAULT_LEVEL_FILE_LIMITS,
            wal_sync_policy: WalSyncPolicy::EveryWrite,
            flush_workers: 1,
        }
    }

    pub fn schema(mut self, name: impl Into<String>, fields: Vec<Field>) -> Self {
        self.schema_name = name.into();
        self.fields = fields;
        self
    }

    pub fn mem_table_size(mut self, bytes: usize) -> Self {
        self.mem_table_size = bytes;
        self
    }

    pub fn level_size_limits(mut self, limits: [u64; NUM_LEVELS]) -> Self {
        self.level_size_limits = limits;
        self
    }

    pub fn level_file_limits(mut self, limits: [Option<usize>; NUM_LEVELS]) -> Self {
        self.level_file_limits = limits;
        self
    }

    pub fn wal_sync_policy(mut self, policy: WalSyncPolicy) -> Self {
        self.wal_sync_policy = policy;
        self
    }

    /// Only `1` is currently honored (flush runs on a single worker); see
    /// DESIGN.md's Open Question resolution for why this is a documented
    /// limitation rather than a missing feature.
    pub fn flush_workers(mut self, workers: usize) -> Self {
        self.flush_workers = workers;
        self
    }

    pub fn build(self) -> Result<TableConfig> {
        if self.mem_table_size == 0 {
            return Err(SrdbError::InvalidConfig(
                "mem_table_size must be greater than zero".to_string(),
            ));
        }
        if self.flush_workers == 0 {
            return Err(SrdbError::InvalidConfig(
                "flush_workers must be at least 1".to_string(),
            ));
        }
        Ok(TableConfig {
            dir: self.dir,
            schema_name: self.schema_name,
            fields: self.fields,
            mem_table_size: self.mem_table_size,
            level_size_limits: self.level_size_limits,
            level_file_limits: self.level_file_limits,
            wal_sync_policy: self.wal_sync_policy,
            flush_workers: self.flush_workers,
        })
    }
}
