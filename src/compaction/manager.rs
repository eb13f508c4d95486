//! Manager: background compaction + orphan-GC loops (§4.6.3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::TableConfig;
use crate::error::Result;
use crate::schema::Schema;
use crate::sst::sst_file_name;
use crate::version::VersionSet;

use super::compactor::Compactor;
use super::picker::Picker;

const COMPACTION_INTERVAL: Duration = Duration::from_secs(10);
const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Clone, Copy, Debug, Default)]
pub struct GcStats {
    pub total_orphans_found: u64,
    pub last_gc_time: i64,
}

struct Shared {
    config: TableConfig,
    schema: Schema,
    version_set: Arc<VersionSet>,
    compaction_lock: Mutex<()>,
    failure_counts: Mutex<HashMap<i64, u32>>,
    gc_stats: Mutex<GcStats>,
}

/// Owns the Compactor + Picker and runs the two background loops. Clone
/// handles share the same underlying state; `shutdown()` stops both
/// loops and joins their threads (§4.6.3, §5).
pub struct CompactionManager {
    shared: Arc<Shared>,
    shutdown_tx: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl CompactionManager {
    pub fn new(config: TableConfig, schema: Schema, version_set: Arc<VersionSet>) -> Self {
        let shared = Arc::new(Shared {
            config,
            schema,
            version_set,
            compaction_lock: Mutex::new(()),
            failure_counts: Mutex::new(HashMap::new()),
            gc_stats: Mutex::new(GcStats::default()),
        });
        Self {
            shared,
            shutdown_tx: None,
            handles: Vec::new(),
        }
    }

    /// Spawns the compaction loop (every 10 s) and the orphan-GC loop
    /// (every 5 min). Both honor the shutdown channel on each tick.
    pub fn start(&mut self) {
        let (tx, rx) = mpsc::channel::<()>();
        let rx = Arc::new(Mutex::new(rx));

        let compaction_shared = self.shared.clone();
        let compaction_rx = rx.clone();
        self.handles.push(thread::spawn(move || {
            run_loop(COMPACTION_INTERVAL, compaction_rx, move || {
                maybe_compact(&compaction_shared);
            });
        }));

        let gc_shared = self.shared.clone();
        let gc_rx = rx.clone();
        self.handles.push(thread::spawn(move || {
            run_loop(GC_INTERVAL, gc_rx, move || {
                let _ = run_orphan_gc(&gc_shared);
            });
        }));

        self.shutdown_tx = Some(tx);
    }

    /// Non-blocking: if a compaction is already running, returns
    /// immediately. Otherwise runs every pending task in priority order.
    pub fn maybe_compact(&self) {
        maybe_compact(&self.shared);
    }

    pub fn gc_stats(&self) -> GcStats {
        *self.shared.gc_stats.lock().expect("gc stats lock poisoned")
    }

    /// Runs one orphan-GC pass synchronously, off the background loop's
    /// own 5-minute cadence. Exposed for tests and operator-triggered
    /// maintenance.
    pub fn gc_now(&self) -> Result<()> {
        run_orphan_gc(&self.shared)
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // Closing the channel is enough: every blocked recv_timeout
            // wakes on the next tick and sees the sender gone.
            drop(tx);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for CompactionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<F: FnMut()>(interval: Duration, rx: Arc<Mutex<Receiver<()>>>, mut tick: F) {
    loop {
        let signal = rx.lock().expect("shutdown receiver lock poisoned").recv_timeout(interval);
        match signal {
            Ok(()) | Err(mpsc::RecvTimeoutError::Timeout) => tick(),
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn maybe_compact(shared: &Arc<Shared>) {
    let guard = match shared.compaction_lock.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return,
        Err(TryLockError::Poisoned(_)) => return,
    };

    let version = shared.version_set.current();
    let tasks = Picker::pick_compaction(&version, &shared.config);
    for task in &tasks {
        // Re-read the current Version before each task (§4.6.3).
        let first_input = task.files.first().map(|f| f.file_number);
        if let Some(file_number) = first_input {
            let mut counts = shared.failure_counts.lock().expect("failure counts lock poisoned");
            if counts.get(&file_number).copied().unwrap_or(0) >= MAX_CONSECUTIVE_FAILURES {
                warn!(file_number, "skipping task after repeated failures, resetting counter");
                counts.remove(&file_number);
                continue;
            }
        }

        match run_task(shared, task) {
            Ok(()) => {
                if let Some(file_number) = first_input {
                    shared
                        .failure_counts
                        .lock()
                        .expect("failure counts lock poisoned")
                        .remove(&file_number);
                }
                info!(source_level = task.source_level, output_level = task.output_level, "compaction task finished");
            }
            Err(e) => {
                error!(error = %e, "compaction task failed");
                if let Some(file_number) = first_input {
                    *shared
                        .failure_counts
                        .lock()
                        .expect("failure counts lock poisoned")
                        .entry(file_number)
                        .or_insert(0) += 1;
                }
            }
        }
    }

    drop(guard);
}

fn run_task(shared: &Arc<Shared>, task: &super::CompactionTask) -> Result<()> {
    let now = crate::clock::now_millis();
    let edit = Compactor::compact(
        task,
        &shared.config.sst_dir(),
        &shared.schema,
        &shared.version_set,
        now,
    )?;
    let Some(edit) = edit else {
        return Ok(());
    };

    let added_paths: Vec<PathBuf> = edit
        .added_files
        .iter()
        .map(|f| shared.config.sst_dir().join(sst_file_name(f.file_number)))
        .collect();

    match shared.version_set.log_and_apply(edit.clone()) {
        Ok(_) => {
            for file_number in &edit.deleted_files {
                let path = shared.config.sst_dir().join(sst_file_name(*file_number));
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(file_number, error = %e, "failed to delete compacted input file, orphan GC will retry");
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            for path in &added_paths {
                let _ = std::fs::remove_file(path);
            }
            Err(e)
        }
    }
}

/// Enumerates `*.sst` in the data directory and removes any file whose
/// `fileNumber` is not referenced by the current Version (§4.6.3).
pub fn run_orphan_gc(shared: &Shared) -> Result<()> {
    let version = shared.version_set.current();
    let mut referenced = std::collections::HashSet::new();
    for level in 0..crate::version::NUM_LEVELS {
        for file in version.get_level(level) {
            referenced.insert(file.file_number);
        }
    }

    let sst_dir = shared.config.sst_dir();
    if !sst_dir.exists() {
        return Ok(());
    }
    let mut orphans_found = 0u64;
    for entry in std::fs::read_dir(&sst_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name.strip_suffix(".sst") else {
            continue;
        };
        let Ok(file_number) = stem.parse::<i64>() else {
            continue;
        };
        if !referenced.contains(&file_number) {
            orphans_found += 1;
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(file_number, error = %e, "failed to remove orphaned sst file");
            } else {
                info!(file_number, "removed orphaned sst file");
            }
        }
    }

    let mut stats = shared.gc_stats.lock().expect("gc stats lock poisoned");
    stats.total_orphans_found += orphans_found;
    stats.last_gc_time = crate::clock::now_millis();
    Ok(())
}
