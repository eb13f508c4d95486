//! Compactor: executes one task atomically with respect to the Version
//! (§4.6.2).

use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::schema::Schema;
use crate::sst::{sst_file_name, SstReader, SstWriter};
use crate::value::Row;
use crate::version::{FileMetadata, VersionEdit, VersionSet};

use super::picker::{target_bytes_for_level, CompactionTask};

/// A row tagged with where it came from, so the merge step can apply the
/// documented same-seq/same-time tie-break (Open Question 2: prefer the
/// row from the higher source level, then the higher fileNumber).
struct TaggedRow {
    row: Row,
    source_level: u8,
    source_file_number: i64,
}

pub struct Compactor;

impl Compactor {
    /// Runs one task to completion, returning the `VersionEdit` to
    /// install, or `None` if every input file was already missing
    /// (a no-op after a prior crash left stale metadata).
    pub fn compact(
        task: &CompactionTask,
        sst_dir: &Path,
        schema: &Schema,
        version_set: &VersionSet,
        now: i64,
    ) -> Result<Option<VersionEdit>> {
        let mut deleted_files = Vec::new();
        let mut tagged_rows = Vec::new();
        let mut total_input_bytes: i64 = 0;
        let mut total_input_rows: i64 = 0;
        let mut any_survived = false;

        // Step 1 + 2: read surviving input files.
        for file in &task.files {
            let path = sst_dir.join(sst_file_name(file.file_number));
            if !path.exists() {
                warn!(file_number = file.file_number, "compaction input file missing, skipping");
                continue;
            }
            any_survived = true;
            let reader = SstReader::open(&path, schema)?;
            let rows = reader.read_all(schema)?;
            total_input_bytes += file.file_size;
            total_input_rows += file.row_count;
            for row in rows {
                tagged_rows.push(TaggedRow {
                    row,
                    source_level: task.source_level,
                    source_file_number: file.file_number,
                });
            }
            deleted_files.push(file.file_number);
        }

        if !any_survived {
            return Ok(None);
        }

        // Step 3: overlapping output-level files.
        let min_seq = tagged_rows.iter().map(|t| t.row.seq).min().unwrap();
        let max_seq = tagged_rows.iter().map(|t| t.row.seq).max().unwrap();
        let current = version_set.current();
        let output_level = task.output_level as usize;
        for file in current.get_level(output_level) {
            if !file.overlaps(min_seq, max_seq) {
                continue;
            }
            let path = sst_dir.join(sst_file_name(file.file_number));
            if !path.exists() {
                warn!(
                    file_number = file.file_number,
                    "overlapping output file missing, scrubbing stale reference"
                );
                deleted_files.push(file.file_number);
                continue;
            }
            let reader = SstReader::open(&path, schema)?;
            let rows = reader.read_all(schema)?;
            total_input_bytes += file.file_size;
            total_input_rows += file.row_count;
            for row in rows {
                tagged_rows.push(TaggedRow {
                    row,
                    source_level: task.output_level,
                    source_file_number: file.file_number,
                });
            }
            deleted_files.push(file.file_number);
        }

        // Step 4: merge, keep highest time per seq, tie-break by
        // source level then fileNumber, both descending.
        let merged = merge_rows(tagged_rows);

        // Step 5: partition by estimated per-row size.
        let avg_row_size = if total_input_rows > 0 {
            (total_input_bytes / total_input_rows).max(1) as u64
        } else {
            1024
        };
        let target_bytes = (target_bytes_for_level(output_level) as f64 * 0.8) as u64;
        let rows_per_partition = (target_bytes / avg_row_size).max(1) as usize;

        // Step 6: write new SSTs.
        let mut added_files = Vec::new();
        for chunk in merged.chunks(rows_per_partition) {
            let file_number = version_set.allocate_file_number();
            let path = sst_dir.join(sst_file_name(file_number));
            let mut writer = SstWriter::create(&path, now)?;
            for row in chunk {
                writer.add(schema, row)?;
            }
            writer.finish(now)?;
            let file_size = std::fs::metadata(&path)?.len() as i64;
            added_files.push(FileMetadata {
                file_number,
                level: task.output_level,
                file_size,
                min_key: chunk.first().unwrap().seq,
                max_key: chunk.last().unwrap().seq,
                row_count: chunk.len() as i64,
            });
        }

        // Step 7.
        Ok(Some(VersionEdit {
            added_files,
            deleted_files,
            next_file_number: None,
            last_sequence: None,
        }))
    }
}

fn merge_rows(mut tagged: Vec<TaggedRow>) -> Vec<Row> {
    tagged.sort_by(|a, b| {
        a.row
            .seq
            .cmp(&b.row.seq)
            .then_with(|| a.row.time.cmp(&b.row.time))
            .then_with(|| a.source_level.cmp(&b.source_level))
            .then_with(|| a.source_file_number.cmp(&b.source_file_number))
    });

    let mut out: Vec<Row> = Vec::new();
    let mut i = 0;
    while i < tagged.len() {
        let mut j = i;
        while j + 1 < tagged.len() && tagged[j + 1].row.seq == tagged[i].row.seq {
            j += 1;
        }
        // The last entry in [i, j] wins: ascending sort by (time, level,
        // fileNumber) means the winner is the greatest time, and among
        // equal times the highest source level then highest fileNumber.
        out.push(tagged[j].row.clone());
        i = j + 1;
    }
    out
}
