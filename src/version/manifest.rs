//! MANIFEST log: length-prefixed, CRC32-checked `VersionEdit` records, plus
//! the `CURRENT` pointer file (§4.5).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use crate::error::{Result, SrdbError};

use super::VersionEdit;

pub const CURRENT_FILE_NAME: &str = "CURRENT";

pub fn manifest_file_name(file_number: i64) -> String {
    format!("MANIFEST-{:06}", file_number)
}

fn encode_record(edit: &VersionEdit) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(edit)?;
    let mut hasher = Hasher::new();
    hasher.update(&json);
    let crc = hasher.finalize();

    let mut record = Vec::with_capacity(8 + json.len());
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(&(json.len() as u32).to_le_bytes());
    record.extend_from_slice(&json);
    Ok(record)
}

/// Reads every record in a MANIFEST file. Unlike WAL replay, a corrupt or
/// truncated record here is a hard open-time failure (§7) — a MANIFEST
/// is never expected to have a live crash tail the way a WAL is.
pub struct Manifest;

impl Manifest {
    pub fn read_edits(path: &Path) -> Result<Vec<VersionEdit>> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut edits = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes.len() < pos + 8 {
                return Err(SrdbError::Corruption(format!(
                    "{}: truncated manifest record header",
                    path.display()
                )));
            }
            let crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let length = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
            let body_start = pos + 8;
            let body_end = body_start
                .checked_add(length)
                .ok_or_else(|| SrdbError::Corruption(format!("{}: bad record length", path.display())))?;
            if bytes.len() < body_end {
                return Err(SrdbError::Corruption(format!(
                    "{}: truncated manifest record body",
                    path.display()
                )));
            }
            let body = &bytes[body_start..body_end];
            let mut hasher = Hasher::new();
            hasher.update(body);
            if hasher.finalize() != crc {
                return Err(SrdbError::Corruption(format!(
                    "{}: manifest record CRC mismatch",
                    path.display()
                )));
            }
            let edit: VersionEdit = serde_json::from_slice(body)?;
            edits.push(edit);
            pos = body_end;
        }
        Ok(edits)
    }
}

/// Append-only writer over one MANIFEST file.
pub struct ManifestWriter {
    path: PathBuf,
    file: File,
}

impl ManifestWriter {
    pub fn create(dir: &Path, file_number: i64) -> Result<Self> {
        let path = dir.join(manifest_file_name(file_number));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let record = encode_record(edit)?;
        self.file.write_all(&record)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Reads/writes the `CURRENT` pointer file, atomically via tmp+rename.
pub fn read_current(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(CURRENT_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(path)?.trim().to_string()))
}

pub fn write_current(dir: &Path, manifest_name: &str) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", CURRENT_FILE_NAME));
    std::fs::write(&tmp, manifest_name)?;
    std::fs::rename(&tmp, dir.join(CURRENT_FILE_NAME))?;
    Ok(())
}
