//! Table facade (§4.7): bundles the WAL, memtables, SST cache, VersionSet,
//! and CompactionManager behind `open`/`insert`/`get`/`query`/`flush`/`close`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::clock;
use crate::codec;
use crate::compaction::CompactionManager;
use crate::config::{TableConfig, WalSyncPolicy};
use crate::error::{Result, SrdbError};
use crate::memtable::{MemTable, MemtableManager};
use crate::schema::{Schema, SchemaFile, SCHEMA_FILE_NAME};
use crate::sst::{sst_file_name, SstReader, SstWriter};
use crate::value::{Row, TaggedValue};
use crate::version::{FileMetadata, VersionEdit, VersionSet, NUM_LEVELS};
use crate::wal::{list_wal_files, replay_file, wal_file_name, WalEntry, WalManager};

/// Interface-only collaborator: a secondary value index maps an indexed
/// field's value to every `seq` that currently holds it. No
/// implementation ships with this crate (out of scope per spec's
/// Non-goals); `Table::query` is simply the concrete dispatch point.
pub trait ValueIndex: Send + Sync {
    fn lookup(&self, field: &str, value: &TaggedValue) -> Result<Vec<i64>>;
}

pub struct Table {
    config: TableConfig,
    schema: Schema,
    wal: Mutex<WalManager>,
    memtables: Mutex<MemtableManager>,
    version_set: Arc<VersionSet>,
    sst_readers: Mutex<HashMap<i64, Arc<SstReader>>>,
    compaction_manager: CompactionManager,
    seq_counter: AtomicI64,
    closed: AtomicBool,
    value_index: Option<Arc<dyn ValueIndex>>,
    /// Serializes the whole insert path (§5: "insert path serializes via
    /// a write lock"), so a memtable rotation and the WAL rotation paired
    /// with it always agree on which entries belong to which generation.
    write_lock: Mutex<()>,
    /// Maps a frozen memtable's identity (`Arc::as_ptr` as `usize`) to the
    /// WAL file number retired alongside it, so the file can be deleted
    /// once that memtable's SST is durably installed.
    pending_flush_wal: Mutex<Vec<(usize, i64)>>,
}

impl Table {
    /// Ensures the directory layout, loads or persists the schema,
    /// replays the MANIFEST into a Version, opens readers for every file
    /// the Version references, replays the WAL into a fresh memtable,
    /// and starts the compaction manager's background loops (§4.7).
    pub fn open(config: TableConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        std::fs::create_dir_all(config.wal_dir())?;
        std::fs::create_dir_all(config.sst_dir())?;

        let schema_path = config.dir.join(SCHEMA_FILE_NAME);
        let schema = if schema_path.exists() {
            SchemaFile::read(&schema_path)?
        } else {
            if config.fields.is_empty() {
                return Err(SrdbError::SchemaInvalid(
                    "table has no schema sidecar and no fields were supplied".to_string(),
                ));
            }
            let schema = Schema::new(config.schema_name.clone(), config.fields.clone());
            SchemaFile::new(schema.clone(), clock::now_millis()).write(&schema_path)?;
            schema
        };

        let version_set = Arc::new(VersionSet::open(&config.dir)?);
        let version = version_set.current();

        let mut sst_readers = HashMap::new();
        for level in 0..NUM_LEVELS {
            for file in version.get_level(level) {
                let path = config.sst_dir().join(sst_file_name(file.file_number));
                let reader = SstReader::open(&path, &schema)?;
                sst_readers.insert(file.file_number, Arc::new(reader));
            }
        }

        let wal_files = list_wal_files(&config.wal_dir())?;
        let mut memtables = MemtableManager::new(config.mem_table_size);
        let mut max_seq = version.last_sequence;
        for (_, path) in &wal_files {
            let entries = replay_file(path)?;
            for entry in entries {
                let row = codec::decode_row(&schema, &entry.payload)?;
                max_seq = max_seq.max(row.seq);
                memtables.put(row);
            }
        }

        let wal_manager = if wal_files.is_empty() {
            WalManager::create(&config.wal_dir(), 1)?
        } else {
            WalManager::open_current(&config.wal_dir())?
        };

        let mut compaction_manager =
            CompactionManager::new(config.clone(), schema.clone(), version_set.clone());
        compaction_manager.start();

        info!(dir = %config.dir.display(), last_seq = max_seq, "table opened");

        Ok(Self {
            config,
            schema,
            wal: Mutex::new(wal_manager),
            memtables: Mutex::new(memtables),
            version_set,
            sst_readers: Mutex::new(sst_readers),
            compaction_manager,
            seq_counter: AtomicI64::new(max_seq),
            closed: AtomicBool::new(false),
            value_index: None,
            write_lock: Mutex::new(()),
            pending_flush_wal: Mutex::new(Vec::new()),
        })
    }

    pub fn with_value_index(mut self, index: Arc<dyn ValueIndex>) -> Self {
        self.value_index = Some(index);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validates, assigns `seq`, WAL-appends, and memtable-puts under the
    /// write lock; rotates and flushes synchronously if the mutable
    /// memtable crossed its size threshold (§4.7).
    pub fn insert(&self, input: BTreeMap<String, TaggedValue>) -> Result<i64> {
        self.ensure_open()?;
        let data = self.schema.validate_and_coerce(input)?;

        let _write_guard = self
            .write_lock
            .lock()
            .map_err(|_| SrdbError::LockPoisoned("write"))?;

        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let time = clock::now_millis();
        let row = Row::new(seq, time, data);
        let payload = codec::encode_row(&self.schema, &row)?;

        {
            let mut wal = self.wal.lock().map_err(|_| SrdbError::LockPoisoned("wal"))?;
            wal.append(&WalEntry { seq, payload })?;
            if matches!(self.config.wal_sync_policy, WalSyncPolicy::EveryWrite) {
                wal.sync()?;
            }
        }

        let rotated = {
            let mut memtables = self
                .memtables
                .lock()
                .map_err(|_| SrdbError::LockPoisoned("memtables"))?;
            memtables.put(row);
            memtables.maybe_rotate()
        };
        self.version_set.advance_last_sequence(seq);

        if let Some(frozen) = rotated {
            // Roll the WAL to a new file so the retired one holds exactly
            // the entries now frozen in `frozen`; it is deleted once the
            // matching SST is durably installed (§2 data flow, §5).
            let old_wal_file = {
                let mut wal = self.wal.lock().map_err(|_| SrdbError::LockPoisoned("wal"))?;
                wal.rotate()?.0
            };
            self.pending_flush_wal
                .lock()
                .map_err(|_| SrdbError::LockPoisoned("pending_flush_wal"))?
                .push((Arc::as_ptr(&frozen) as usize, old_wal_file));
            self.flush_immutable(&frozen)?;
        }
        Ok(seq)
    }

    /// Loops the single-row procedure; a failure partway leaves every
    /// already-committed `seq` durable and visible (§4.7).
    pub fn insert_batch(&self, inputs: Vec<BTreeMap<String, TaggedValue>>) -> Result<Vec<i64>> {
        let mut seqs = Vec::with_capacity(inputs.len());
        for input in inputs {
            seqs.push(self.insert(input)?);
        }
        Ok(seqs)
    }

    fn flush_immutable(&self, frozen: &Arc<MemTable>) -> Result<()> {
        let rows: Vec<Row> = frozen.flush().cloned().collect();
        if rows.is_empty() {
            self.retire_pending_wal(frozen)?;
            return Ok(());
        }
        let min_key = rows.first().unwrap().seq;
        let max_key = rows.last().unwrap().seq;

        let file_number = self.version_set.allocate_file_number();
        let path = self.config.sst_dir().join(sst_file_name(file_number));
        let now = clock::now_millis();
        let mut writer = SstWriter::create(&path, now)?;
        for row in &rows {
            writer.add(&self.schema, row)?;
        }
        let row_count = writer.finish(now)?;
        let file_size = std::fs::metadata(&path)?.len() as i64;

        let edit = VersionEdit {
            added_files: vec![FileMetadata {
                file_number,
                level: 0,
                file_size,
                min_key,
                max_key,
                row_count: row_count as i64,
            }],
            deleted_files: vec![],
            next_file_number: None,
            last_sequence: None,
        };

        match self.version_set.log_and_apply(edit) {
            Ok(_) => {
                let reader = SstReader::open(&path, &self.schema)?;
                self.sst_readers
                    .lock()
                    .map_err(|_| SrdbError::LockPoisoned("sst_readers"))?
                    .insert(file_number, Arc::new(reader));
                self.memtables
                    .lock()
                    .map_err(|_| SrdbError::LockPoisoned("memtables"))?
                    .drop_immutable(frozen);
                info!(file_number, rows = rows.len(), "flushed immutable memtable to L0");
                self.retire_pending_wal(frozen)?;
                self.compaction_manager.maybe_compact();
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Deletes the WAL file retired alongside `frozen`'s rotation, once
    /// its SST is durably installed (§2 data flow: `LogAndApply(edit) ->
    /// WAL truncate/rotate`). A no-op if no WAL file was ever paired with
    /// this memtable (e.g. it was never rotated through `insert`).
    fn retire_pending_wal(&self, frozen: &Arc<MemTable>) -> Result<()> {
        let ptr = Arc::as_ptr(frozen) as usize;
        let file_number = {
            let mut pending = self
                .pending_flush_wal
                .lock()
                .map_err(|_| SrdbError::LockPoisoned("pending_flush_wal"))?;
            pending
                .iter()
                .position(|(p, _)| *p == ptr)
                .map(|idx| pending.remove(idx).1)
        };
        let Some(file_number) = file_number else {
            return Ok(());
        };
        let path = self.config.wal_dir().join(wal_file_name(file_number));
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(file_number, "retired flushed wal file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SrdbError::Io(e)),
        }
    }

    /// Mutable memtable, then each immutable newest-first, then L0 files
    /// newest-first, then L1..L6 by key-range lookup (§4.7).
    pub fn get(&self, seq: i64) -> Result<Row> {
        self.ensure_open()?;
        if let Some(row) = self
            .memtables
            .lock()
            .map_err(|_| SrdbError::LockPoisoned("memtables"))?
            .get(seq)
        {
            return Ok(row);
        }

        let version = self.version_set.current();
        for file in version.l0_newest_first() {
            if file.min_key <= seq && seq <= file.max_key {
                if let Some(row) = self.read_from_file(file.file_number, seq)? {
                    return Ok(row);
                }
            }
        }
        for level in 1..NUM_LEVELS {
            if let Some(file) = version.find_file_for_seq(level, seq) {
                if let Some(row) = self.read_from_file(file.file_number, seq)? {
                    return Ok(row);
                }
            }
        }
        Err(SrdbError::NotFound)
    }

    fn read_from_file(&self, file_number: i64, seq: i64) -> Result<Option<Row>> {
        let reader = self.reader_for(file_number)?;
        reader.get(&self.schema, seq)
    }

    fn reader_for(&self, file_number: i64) -> Result<Arc<SstReader>> {
        {
            let cache = self
                .sst_readers
                .lock()
                .map_err(|_| SrdbError::LockPoisoned("sst_readers"))?;
            if let Some(reader) = cache.get(&file_number) {
                return Ok(reader.clone());
            }
        }
        let path = self.config.sst_dir().join(sst_file_name(file_number));
        let reader = Arc::new(SstReader::open(&path, &self.schema)?);
        self.sst_readers
            .lock()
            .map_err(|_| SrdbError::LockPoisoned("sst_readers"))?
            .insert(file_number, reader.clone());
        Ok(reader)
    }

    /// Dispatches to the `ValueIndex` collaborator (not implemented by
    /// this crate); resolves each returned `seq` via `get`.
    pub fn query(&self, field: &str, value: &TaggedValue) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let index = self
            .value_index
            .as_ref()
            .ok_or_else(|| SrdbError::FieldNotFound(field.to_string()))?;
        let seqs = index.lookup(field, value)?;
        seqs.into_iter().map(|seq| self.get(seq)).collect()
    }

    /// Flushes every currently queued immutable memtable.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let immutables: Vec<Arc<MemTable>> = {
            let memtables = self
                .memtables
                .lock()
                .map_err(|_| SrdbError::LockPoisoned("memtables"))?;
            memtables.immutables().iter().cloned().collect()
        };
        for imm in immutables {
            self.flush_immutable(&imm)?;
        }
        Ok(())
    }

    /// Shutdown order (§5, §9): stop compaction → flush remaining
    /// immutable memtables → close WAL → close MANIFEST → drop cached
    /// SST readers (releasing their mmaps).
    pub fn close(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(SrdbError::AlreadyClosed);
        }
        self.compaction_manager.shutdown();
        self.flush()?;
        self.wal
            .lock()
            .map_err(|_| SrdbError::LockPoisoned("wal"))?
            .sync()?;
        self.sst_readers
            .lock()
            .map_err(|_| SrdbError::LockPoisoned("sst_readers"))?
            .clear();
        info!(dir = %self.config.dir.display(), "table closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SrdbError::AlreadyClosed);
        }
        Ok(())
    }
}
