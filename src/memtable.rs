//! In-memory table of recently inserted rows (§4.3).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::value::Row;

/// Rows held in ascending-`seq` order. Insertion order is guaranteed to
/// equal `seq` order by the caller (a monotonic counter assigns `seq`),
/// so a `BTreeMap` gives O(log n) point lookup and an ordered iterator
/// for flush for free.
#[derive(Default)]
pub struct MemTable {
    rows: BTreeMap<i64, Row>,
    size_bytes: usize,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, row: Row) {
        self.size_bytes += row.estimated_size();
        if let Some(old) = self.rows.insert(row.seq, row) {
            self.size_bytes = self.size_bytes.saturating_sub(old.estimated_size());
        }
    }

    pub fn get(&self, seq: i64) -> Option<&Row> {
        self.rows.get(&seq)
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Ordered iterator of rows, used by flush to build an SST in
    /// ascending-seq order.
    pub fn flush(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }
}

/// Owns one mutable memtable and a bounded queue of immutable ones
/// awaiting flush. Rotation is atomic with respect to `put`/`get`
/// callers because both happen under the engine's write lock (§4.3, §5).
pub struct MemtableManager {
    mutable: MemTable,
    immutables: VecDeque<Arc<MemTable>>,
    size_threshold: usize,
}

impl MemtableManager {
    pub fn new(size_threshold: usize) -> Self {
        Self {
            mutable: MemTable::new(),
            immutables: VecDeque::new(),
            size_threshold,
        }
    }

    pub fn put(&mut self, row: Row) {
        self.mutable.put(row);
    }

    /// Returns the newly frozen immutable memtable if the mutable one
    /// crossed `size_threshold`, triggering rotation.
    pub fn maybe_rotate(&mut self) -> Option<Arc<MemTable>> {
        if self.mutable.size_bytes() < self.size_threshold {
            return None;
        }
        let frozen = Arc::new(std::mem::take(&mut self.mutable));
        self.immutables.push_back(frozen.clone());
        Some(frozen)
    }

    /// Search order for `Get`: mutable, then immutables newest-first
    /// (§4.7).
    pub fn get(&self, seq: i64) -> Option<Row> {
        if let Some(row) = self.mutable.get(seq) {
            return Some(row.clone());
        }
        for imm in self.immutables.iter().rev() {
            if let Some(row) = imm.get(seq) {
                return Some(row.clone());
            }
        }
        None
    }

    pub fn immutables(&self) -> &VecDeque<Arc<MemTable>> {
        &self.immutables
    }

    /// Drops a successfully flushed immutable memtable from the queue.
    pub fn drop_immutable(&mut self, target: &Arc<MemTable>) {
        self.immutables.retain(|m| !Arc::ptr_eq(m, target));
    }

    pub fn mutable_size_bytes(&self) -> usize {
        self.mutable.size_bytes()
    }
}
