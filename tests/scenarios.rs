//! End-to-end scenarios against the public `Table` facade plus the
//! lower-level pieces that aren't reachable through it (manual
//! compaction, orphan GC, schema tamper detection).

use std::collections::BTreeMap;
use std::path::Path;

use srdb::compaction::{CompactionManager, Compactor, Picker};
use srdb::schema::{Field, FieldType, Schema, SchemaFile, SCHEMA_FILE_NAME};
use srdb::sst::{sst_file_name, SstReader, SstWriter};
use srdb::value::{Row, TaggedValue};
use srdb::version::{FileMetadata, VersionEdit, VersionSet};
use srdb::{SrdbError, Table, TableConfig};

fn events_schema() -> Vec<Field> {
    vec![
        Field {
            name: "name".into(),
            type_: FieldType::String,
            indexed: false,
            nullable: false,
            comment: String::new(),
        },
        Field {
            name: "count".into(),
            type_: FieldType::Int64,
            indexed: false,
            nullable: false,
            comment: String::new(),
        },
    ]
}

fn config(dir: &Path, mem_table_size: usize) -> TableConfig {
    TableConfig::builder(dir)
        .schema("events", events_schema())
        .mem_table_size(mem_table_size)
        .build()
        .unwrap()
}

fn insert(table: &Table, name: &str, count: i64) -> i64 {
    let mut data = BTreeMap::new();
    data.insert("name".to_string(), TaggedValue::Str(name.to_string()));
    data.insert("count".to_string(), TaggedValue::Int64(count));
    table.insert(data).unwrap()
}

/// Scenario 1: basic durability. Insert, close, reopen, verify specific
/// rows and the total row count survive.
#[test]
fn basic_durability_survives_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut seqs = Vec::new();
    {
        let mut table = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap();
        for i in 0..100 {
            seqs.push(insert(&table, &format!("row-{}", i), i));
        }
        table.close().unwrap();
    }

    let table = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap();
    assert_eq!(seqs.len(), 100);
    for (i, seq) in seqs.iter().enumerate() {
        let row = table.get(*seq).unwrap();
        assert_eq!(row.data.get("name"), Some(&TaggedValue::Str(format!("row-{}", i))));
        assert_eq!(row.data.get("count"), Some(&TaggedValue::Int64(i as i64)));
    }
}

/// Scenario 2: a small memtable forces frequent L0 rotation; manually
/// driving the picker + compactor should shrink the L0 file count while
/// every row stays readable with unchanged data.
#[test]
fn l0_overlap_merge_preserves_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut seqs = Vec::new();
    {
        let table = Table::open(config(dir.path(), 1024)).unwrap();
        for i in 0..200 {
            seqs.push(insert(&table, &format!("row-{}", i), i));
        }
        table.flush().unwrap();
    }

    let config = config(dir.path(), 1024);
    let version_set = VersionSet::open(dir.path()).unwrap();
    let schema = Schema::new("events", events_schema());
    let l0_before = version_set.current().get_level(0).len();
    assert!(l0_before > 1, "expected rotation to have produced multiple L0 files");

    loop {
        let version = version_set.current();
        let tasks = Picker::pick_compaction(&version, &config);
        let Some(task) = tasks.into_iter().find(|t| t.source_level == 0) else {
            break;
        };
        let edit = Compactor::compact(&task, &config.sst_dir(), &schema, &version_set, 0)
            .unwrap()
            .expect("inputs existed, should produce an edit");
        version_set.log_and_apply(edit.clone()).unwrap();
        for file_number in &edit.deleted_files {
            let _ = std::fs::remove_file(config.sst_dir().join(sst_file_name(*file_number)));
        }
    }

    let l0_after = version_set.current().get_level(0).len();
    assert!(l0_after < l0_before, "compaction should reduce L0 file count");

    drop(version_set);
    let table = Table::open(config.clone()).unwrap();
    for (i, seq) in seqs.iter().enumerate() {
        let row = table.get(*seq).unwrap();
        assert_eq!(row.data.get("name"), Some(&TaggedValue::Str(format!("row-{}", i))));
    }
}

/// Scenario 3: two SSTs at L0 share an overlapping `seq` range; compacting
/// to L1 keeps exactly the documented winner (greatest `time`, ties
/// broken by higher source level then higher fileNumber).
#[test]
fn duplicate_seq_resolution_keeps_documented_winner() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sst")).unwrap();
    let schema = Schema::new("events", events_schema());

    let mut row_at = |seq: i64, time: i64, name: &str| -> Row {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TaggedValue::Str(name.to_string()));
        data.insert("count".to_string(), TaggedValue::Int64(seq));
        Row::new(seq, time, data)
    };

    let sst_dir = dir.path().join("sst");
    let path_a = sst_dir.join(sst_file_name(1));
    let mut writer_a = SstWriter::create(&path_a, 0).unwrap();
    for seq in 0..10 {
        writer_a.add(&schema, &row_at(seq, 100, "old")).unwrap();
    }
    writer_a.finish(0).unwrap();

    let path_b = sst_dir.join(sst_file_name(2));
    let mut writer_b = SstWriter::create(&path_b, 0).unwrap();
    for seq in 5..15 {
        writer_b.add(&schema, &row_at(seq, 200, "new")).unwrap();
    }
    writer_b.finish(0).unwrap();

    let version_set = VersionSet::open(dir.path()).unwrap();
    version_set
        .log_and_apply(VersionEdit {
            added_files: vec![
                FileMetadata { file_number: 1, level: 0, file_size: 1, min_key: 0, max_key: 9, row_count: 10 },
                FileMetadata { file_number: 2, level: 0, file_size: 1, min_key: 5, max_key: 14, row_count: 10 },
            ],
            deleted_files: vec![],
            next_file_number: Some(3),
            last_sequence: Some(14),
        })
        .unwrap();

    let task = srdb::compaction::CompactionTask {
        source_level: 0,
        files: version_set.current().get_level(0).to_vec(),
        output_level: 1,
        score: 1.0,
    };
    let edit = Compactor::compact(&task, &sst_dir, &schema, &version_set, 0)
        .unwrap()
        .expect("both inputs exist");
    version_set.log_and_apply(edit.clone()).unwrap();

    assert_eq!(edit.added_files.len(), 1);
    let output_path = sst_dir.join(sst_file_name(edit.added_files[0].file_number));
    let reader = SstReader::open(&output_path, &schema).unwrap();
    assert_eq!(reader.row_count(), 15);
    for seq in 0..5 {
        let row = reader.get(&schema, seq).unwrap().unwrap();
        assert_eq!(row.data.get("name"), Some(&TaggedValue::Str("old".to_string())));
    }
    for seq in 5..15 {
        let row = reader.get(&schema, seq).unwrap().unwrap();
        assert_eq!(row.data.get("name"), Some(&TaggedValue::Str("new".to_string())));
    }
}

/// Scenario 4: a table accumulates rows with frequent rotation and is
/// dropped without `close()`, simulating a crash. Every WAL-acked `seq`
/// must still be recoverable on reopen.
#[test]
fn crash_mid_flush_recovers_every_acked_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut seqs = Vec::new();
    {
        let table = Table::open(config(dir.path(), 2048)).unwrap();
        for i in 0..500 {
            seqs.push(insert(&table, &format!("row-{}", i), i));
        }
        // Dropped here without close(): simulates a crash.
    }

    let table = Table::open(config(dir.path(), 2048)).unwrap();
    for (i, seq) in seqs.iter().enumerate() {
        let row = table.get(*seq).unwrap();
        assert_eq!(row.data.get("count"), Some(&TaggedValue::Int64(i as i64)));
    }
}

/// Scenario 5: orphan GC removes an SST file with no referencing
/// `Version` entry while leaving referenced files untouched.
#[test]
fn orphan_gc_removes_unreferenced_files_only() {
    let dir = tempfile::tempdir().unwrap();
    // Small enough that the single insert below rotates and flushes to L0
    // synchronously; `Table::flush` only drains already-rotated immutables,
    // it does not force-flush the current mutable memtable.
    let config = config(dir.path(), 1);
    {
        let mut table = Table::open(config.clone()).unwrap();
        insert(&table, "alice", 1);
        table.flush().unwrap();
        table.close().unwrap();
    }

    let referenced_path = config.sst_dir().join(sst_file_name(1));
    assert!(referenced_path.exists());
    let orphan_path = config.sst_dir().join(sst_file_name(999999));
    std::fs::write(&orphan_path, b"stale").unwrap();

    let version_set = std::sync::Arc::new(VersionSet::open(dir.path()).unwrap());
    let schema = Schema::new("events", events_schema());
    let manager = CompactionManager::new(config.clone(), schema, version_set);
    manager.gc_now().unwrap();

    assert!(!orphan_path.exists());
    assert!(referenced_path.exists());
}

/// Scenario 6: tampering with `schema.json` without updating its checksum
/// is a hard open-time refusal naming the file.
#[test]
fn schema_tamper_is_refused_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut table = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap();
        insert(&table, "alice", 1);
        table.close().unwrap();
    }

    let schema_path = dir.path().join(SCHEMA_FILE_NAME);
    let mut tampered: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&schema_path).unwrap()).unwrap();
    tampered["schema"]["fields"][0]["comment"] = serde_json::json!("tampered without rechecksum");
    std::fs::write(&schema_path, serde_json::to_vec(&tampered).unwrap()).unwrap();

    let err = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap_err();
    assert!(matches!(err, SrdbError::SchemaChecksumMismatch { .. }));
}

/// An empty immutable memtable flushes to no file and installs no edit.
#[test]
fn flush_with_no_pending_writes_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let table = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap();
    table.flush().unwrap();
    assert!(!dir.path().join("sst").join(sst_file_name(1)).exists());
}

/// Operations after `close()` consistently fail with `AlreadyClosed`.
#[test]
fn operations_after_close_are_already_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::open(config(dir.path(), 4 * 1024 * 1024)).unwrap();
    insert(&table, "alice", 1);
    table.close().unwrap();

    assert!(matches!(table.get(1).unwrap_err(), SrdbError::AlreadyClosed));
    assert!(matches!(table.close().unwrap_err(), SrdbError::AlreadyClosed));
    assert!(matches!(
        table.query("name", &TaggedValue::Str("alice".into())).unwrap_err(),
        SrdbError::AlreadyClosed
    ));
}
