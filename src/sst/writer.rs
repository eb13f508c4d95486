use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::btree::BTreeBuilder;
use crate::codec;
use crate::error::{Result, SrdbError};
use crate::schema::Schema;
use crate::value::Row;

use super::{SstHeader, HEADER_SIZE};

/// Streams rows to a new SST file. `add` requires strictly ascending
/// `seq`; `finish` builds the B+Tree index and performs the atomic
/// tmp-file-then-rename durability dance (§4.2, grounded in the
/// header-placeholder-then-rewrite pattern used for this table's other
/// durable files).
pub struct SstWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: BufWriter<File>,
    offsets: Vec<(i64, i64, i32)>, // (seq, offset, size)
    last_seq: Option<i64>,
    created_at: i64,
}

impl SstWriter {
    pub fn create(path: &Path, created_at: i64) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let file = File::create(&tmp_path)?;
        let mut file = BufWriter::new(file);
        file.write_all(&[0u8; HEADER_SIZE])?;
        Ok(Self {
            tmp_path,
            final_path: path.to_path_buf(),
            file,
            offsets: Vec::new(),
            last_seq: None,
            created_at,
        })
    }

    pub fn add(&mut self, schema: &Schema, row: &Row) -> Result<()> {
        if let Some(last) = self.last_seq {
            if row.seq <= last {
                return Err(SrdbError::CompactionFailed(format!(
                    "sst writer requires strictly ascending seq, got {} after {}",
                    row.seq, last
                )));
            }
        }
        let offset = self.file.stream_position()?;
        let payload = codec::encode_row(schema, row)?;
        self.file.write_all(&payload)?;
        self.offsets.push((row.seq, offset as i64, payload.len() as i32));
        self.last_seq = Some(row.seq);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Builds the B+Tree index, rewrites the header, fsyncs, and performs
    /// the atomic rename into place. Returns the finished row count.
    pub fn finish(mut self, updated_at: i64) -> Result<u64> {
        if self.offsets.is_empty() {
            return Err(SrdbError::CompactionFailed(
                "cannot finish an sst with no rows".to_string(),
            ));
        }
        let data_end = self.file.stream_position()?;
        let mut index_bytes = Vec::new();
        let root_offset = BTreeBuilder::build(&self.offsets, &mut index_bytes, data_end)?;
        self.file.write_all(&index_bytes)?;

        let min_seq = self.offsets.first().unwrap().0;
        let max_seq = self.offsets.last().unwrap().0;
        let header = SstHeader {
            format_version: super::FORMAT_VERSION,
            root_offset,
            data_start: HEADER_SIZE as u64,
            min_seq,
            max_seq,
            row_count: self.offsets.len() as u64,
            created_at: self.created_at,
            updated_at,
        };

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        std::fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(header.row_count)
    }
}

impl Drop for SstWriter {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.tmp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};
    use crate::sst::SstReader;
    use std::collections::BTreeMap;
    use crate::value::TaggedValue;

    fn schema() -> Schema {
        Schema::new(
            "t",
            vec![Field {
                name: "v".into(),
                type_: FieldType::Int64,
                indexed: false,
                nullable: false,
                comment: String::new(),
            }],
        )
    }

    fn row(seq: i64, v: i64) -> Row {
        let mut data = BTreeMap::new();
        data.insert("v".to_string(), TaggedValue::Int64(v));
        Row::new(seq, seq, data)
    }

    #[test]
    fn rejects_non_ascending_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.sst");
        let mut writer = SstWriter::create(&path, 0).unwrap();
        let schema = schema();
        writer.add(&schema, &row(5, 1)).unwrap();
        let err = writer.add(&schema, &row(5, 2)).unwrap_err();
        assert!(matches!(err, SrdbError::CompactionFailed(_)));
    }

    #[test]
    fn writer_then_reader_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.sst");
        let schema = schema();
        let mut writer = SstWriter::create(&path, 42).unwrap();
        for i in 0..100 {
            writer.add(&schema, &row(i, i * 10)).unwrap();
        }
        let written = writer.finish(43).unwrap();
        assert_eq!(written, 100);
        assert!(!dir.path().join("000001.sst.tmp").exists());

        let reader = SstReader::open(&path, &schema).unwrap();
        assert_eq!(reader.min_seq(), 0);
        assert_eq!(reader.max_seq(), 99);
        assert_eq!(reader.row_count(), 100);
        for i in 0..100 {
            let row = reader.get(&schema, i).unwrap().expect("row present");
            assert_eq!(row.data.get("v"), Some(&TaggedValue::Int64(i * 10)));
        }
        assert!(reader.get(&schema, 1000).unwrap().is_none());
    }
}
