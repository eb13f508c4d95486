use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::btree::BTreeReader;
use crate::codec;
use crate::error::{Result, SrdbError};
use crate::schema::Schema;
use crate::value::Row;

use super::{SstHeader, HEADER_SIZE};

/// An opened, immutable SST file, mmap-backed for random access (§4.2).
/// The mapping lives as long as this reader; dropping it releases the
/// mapping (§5 resource scoping).
pub struct SstReader {
    mmap: Mmap,
    header: SstHeader,
}

impl SstReader {
    pub fn open(path: &Path, _schema: &Schema) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_SIZE {
            return Err(SrdbError::Corruption(format!(
                "{}: truncated sst header",
                path.display()
            )));
        }
        let header = SstHeader::decode(&mmap).map_err(|_| {
            SrdbError::Corruption(format!("{}: bad sst magic or header", path.display()))
        })?;
        if (header.root_offset as usize) >= mmap.len() {
            return Err(SrdbError::Corruption(format!(
                "{}: index root offset out of bounds",
                path.display()
            )));
        }
        Ok(Self { mmap, header })
    }

    pub fn min_seq(&self) -> i64 {
        self.header.min_seq
    }

    pub fn max_seq(&self) -> i64 {
        self.header.max_seq
    }

    pub fn row_count(&self) -> u64 {
        self.header.row_count
    }

    fn contains_range(&self, seq: i64) -> bool {
        seq >= self.header.min_seq && seq <= self.header.max_seq
    }

    /// Freshly decodes the row on every call; no row cache is kept (§4.2).
    pub fn get(&self, schema: &Schema, seq: i64) -> Result<Option<Row>> {
        if !self.contains_range(seq) {
            return Ok(None);
        }
        let tree = BTreeReader::new(&self.mmap, self.header.root_offset);
        let Some((offset, size)) = tree.get(seq)? else {
            return Ok(None);
        };
        let start = offset as usize;
        let end = start
            .checked_add(size as usize)
            .ok_or_else(|| SrdbError::Corruption("row payload size overflow".into()))?;
        let bytes = self
            .mmap
            .get(start..end)
            .ok_or_else(|| SrdbError::Corruption("row payload exceeds mapped region".into()))?;
        let row = codec::decode_row(schema, bytes)?;
        Ok(Some(row))
    }

    pub fn get_all_keys(&self) -> Result<Vec<i64>> {
        let tree = BTreeReader::new(&self.mmap, self.header.root_offset);
        tree.get_all_keys()
    }

    /// Decodes every row in ascending-seq order, for compaction's merge
    /// step (§4.6.2 step 2).
    pub fn read_all(&self, schema: &Schema) -> Result<Vec<Row>> {
        let tree = BTreeReader::new(&self.mmap, self.header.root_offset);
        let mut rows = Vec::with_capacity(self.header.row_count as usize);
        for (_, offset, size) in tree.scan_all()? {
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .ok_or_else(|| SrdbError::Corruption("row payload size overflow".into()))?;
            let bytes = self
                .mmap
                .get(start..end)
                .ok_or_else(|| SrdbError::Corruption("row payload exceeds mapped region".into()))?;
            rows.push(codec::decode_row(schema, bytes)?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};
    use crate::sst::SstWriter;
    use crate::value::TaggedValue;
    use std::collections::BTreeMap;

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

    #[test]
    fn read_all_returns_ascending_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000002.sst");
        let schema = schema();
        let mut writer = SstWriter::create(&path, 1).unwrap();
        for i in 0..50 {
            let mut data = BTreeMap::new();
            data.insert("v".to_string(), TaggedValue::Int64(i));
            writer.add(&schema, &crate::value::Row::new(i, i, data)).unwrap();
        }
        writer.finish(2).unwrap();

        let reader = SstReader::open(&path, &schema).unwrap();
        let rows = reader.read_all(&schema).unwrap();
        assert_eq!(rows.len(), 50);
        for w in rows.windows(2) {
            assert!(w[0].seq < w[1].seq);
        }
    }

    #[test]
    fn bad_magic_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sst");
        std::fs::write(&path, vec![0u8; 300]).unwrap();
        let err = SstReader::open(&path, &schema()).unwrap_err();
        assert!(matches!(err, SrdbError::Corruption(_)));
    }
}
