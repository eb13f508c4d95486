//! SST (Sorted Sequence Table) file: header, row payloads, B+Tree index
//! (§4.2).

mod reader;
mod writer;

pub use reader::SstReader;
pub use writer::SstWriter;

use crate::error::{Result, SrdbError};

pub const HEADER_SIZE: usize = 256;
pub const MAGIC: &[u8; 4] = b"SSTB";
pub const FORMAT_VERSION: u32 = 1;

/// Parsed fixed-size SST header. Byte layout (little-endian):
/// `magic(4) | formatVersion(4) | rootOffset(8) | dataStart(8) |
/// minSeq(8) | maxSeq(8) | rowCount(8) | createdAt(8) | updatedAt(8)`,
/// reserved to 256 B.
#[derive(Clone, Copy, Debug)]
pub struct SstHeader {
    pub format_version: u32,
    pub root_offset: u64,
    pub data_start: u64,
    pub min_seq: i64,
    pub max_seq: i64,
    pub row_count: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SstHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.root_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_start.to_le_bytes());
        buf[24..32].copy_from_slice(&self.min_seq.to_le_bytes());
        buf[32..40].copy_from_slice(&self.max_seq.to_le_bytes());
        buf[40..48].copy_from_slice(&self.row_count.to_le_bytes());
        buf[48..56].copy_from_slice(&self.created_at.to_le_bytes());
        buf[56..64].copy_from_slice(&self.updated_at.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SrdbError::Corruption("sst file shorter than header".into()));
        }
        if &bytes[0..4] != MAGIC {
            return Err(SrdbError::Corruption("bad sst magic".into()));
        }
        Ok(Self {
            format_version: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            root_offset: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            data_start: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            min_seq: i64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            max_seq: i64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            row_count: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
            created_at: i64::from_le_bytes(bytes[48..56].try_into().unwrap()),
            updated_at: i64::from_le_bytes(bytes[56..64].try_into().unwrap()),
        })
    }
}

/// File naming: `NNNNNN.sst`, zero-padded to six digits (§6).
pub fn sst_file_name(file_number: i64) -> String {
    format!("{:06}.sst", file_number)
}
