//! Write-ahead log (§4.4): durable record of every insertion, replayed to
//! rebuild the mutable memtable after a crash.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use crate::error::Result;

const ENTRY_TYPE_PUT: u8 = 1;
pub const CURRENT_FILE_NAME: &str = "CURRENT";

pub fn wal_file_name(file_number: i64) -> String {
    format!("{:06}.wal", file_number)
}

/// One durable record: a `Put` of `seq -> payload` (the schema-encoded
/// row). `Delete` is named in the wire format but has no producer yet.
pub struct WalEntry {
    pub seq: i64,
    pub payload: Vec<u8>,
}

fn encode_entry(entry: &WalEntry) -> Vec<u8> {
    let mut body = Vec::with_capacity(13 + entry.payload.len());
    let length = (1 + 8 + entry.payload.len()) as u32;
    body.extend_from_slice(&length.to_le_bytes());
    body.push(ENTRY_TYPE_PUT);
    body.extend_from_slice(&entry.seq.to_le_bytes());
    body.extend_from_slice(&entry.payload);

    let mut hasher = Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Reads one frame from `bytes` starting at `pos`. Returns `None` on a
/// CRC mismatch or short read — both are treated as the expected crash
/// tail and trigger silent truncation during replay (§4.4, §7).
fn decode_entry(bytes: &[u8], pos: usize) -> Option<(WalEntry, usize)> {
    if bytes.len() < pos + 8 {
        return None;
    }
    let crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
    let length = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
    let body_start = pos + 8;
    let body_end = body_start.checked_add(length)?;
    if bytes.len() < body_end {
        return None;
    }
    let body = &bytes[pos + 4..body_end];
    let mut hasher = Hasher::new();
    hasher.update(body);
    if hasher.finalize() != crc {
        return None;
    }
    if length < 9 {
        return None;
    }
    let entry_type = body[4];
    if entry_type != ENTRY_TYPE_PUT {
        return None;
    }
    let seq = i64::from_le_bytes(body[5..13].try_into().unwrap());
    let payload = body[13..].to_vec();
    Some((WalEntry { seq, payload }, body_end))
}

/// Replays one WAL file, returning every entry preceding the first
/// corrupt or truncated frame.
pub fn replay_file(path: &Path) -> Result<Vec<WalEntry>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let mut entries = Vec::new();
    let mut pos = 0;
    while let Some((entry, next)) = decode_entry(&bytes, pos) {
        entries.push(entry);
        pos = next;
    }
    Ok(entries)
}

/// Owns the active WAL file and the `CURRENT` pointer. One instance per
/// table; the file handle is exclusive to the manager (§5).
pub struct WalManager {
    dir: PathBuf,
    file_number: i64,
    writer: BufWriter<File>,
}

impl WalManager {
    /// Creates the first WAL file and writes `CURRENT` to point at it.
    pub fn create(dir: &Path, file_number: i64) -> Result<Self> {
        let path = dir.join(wal_file_name(file_number));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let manager = Self {
            dir: dir.to_path_buf(),
            file_number,
            writer: BufWriter::new(file),
        };
        manager.write_current(file_number)?;
        Ok(manager)
    }

    /// Opens the WAL file named by `CURRENT` for continued appends,
    /// without touching its contents (replay is a separate step, done by
    /// the caller against every `*.wal` file before this is called).
    pub fn open_current(dir: &Path) -> Result<Self> {
        let current_path = dir.join(CURRENT_FILE_NAME);
        let contents = std::fs::read_to_string(&current_path)?;
        let file_number = parse_wal_file_number(contents.trim())?;
        let path = dir.join(wal_file_name(file_number));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file_number,
            writer: BufWriter::new(file),
        })
    }

    fn write_current(&self, file_number: i64) -> Result<()> {
        let current_path = self.dir.join(CURRENT_FILE_NAME);
        let tmp_path = self.dir.join(format!("{}.tmp", CURRENT_FILE_NAME));
        std::fs::write(&tmp_path, wal_file_name(file_number))?;
        std::fs::rename(&tmp_path, &current_path)?;
        Ok(())
    }

    pub fn file_number(&self) -> i64 {
        self.file_number
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        let frame = encode_entry(entry);
        self.writer.write_all(&frame)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Resets the current file to empty for in-place reuse.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(0)?;
        Ok(())
    }

    /// Closes the current file and opens the next one, atomically moving
    /// `CURRENT` to point at it. Returns `(old_number, new_number)`.
    pub fn rotate(&mut self) -> Result<(i64, i64)> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        let old = self.file_number;
        let new = old + 1;
        let path = self.dir.join(wal_file_name(new));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = BufWriter::new(file);
        self.file_number = new;
        self.write_current(new)?;
        Ok((old, new))
    }
}

fn parse_wal_file_number(name: &str) -> Result<i64> {
    let digits = name.trim_end_matches(".wal");
    digits
        .parse::<i64>()
        .map_err(|e| crate::error::SrdbError::Corruption(format!("bad CURRENT contents: {}", e)))
}

/// Lists every `NNNNNN.wal` file in `dir`, sorted ascending by file
/// number, for ordered multi-file replay (§4.4).
pub fn list_wal_files(dir: &Path) -> Result<Vec<(i64, PathBuf)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".wal") {
            if let Ok(number) = stem.parse::<i64>() {
                files.push((number, entry.path()));
            }
        }
    }
    files.sort_by_key(|(n, _)| *n);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_sync_and_replay_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = WalManager::create(dir.path(), 1).unwrap();
        for seq in 0..10i64 {
            manager
                .append(&WalEntry {
                    seq,
                    payload: vec![seq as u8; 4],
                })
                .unwrap();
        }
        manager.sync().unwrap();

        let path = dir.path().join(wal_file_name(1));
        let entries = replay_file(&path).unwrap();
        assert_eq!(entries.len(), 10);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.seq, i as i64);
        }
    }

    #[test]
    fn replay_truncates_silently_at_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = WalManager::create(dir.path(), 1).unwrap();
        manager
            .append(&WalEntry {
                seq: 1,
                payload: vec![1, 2, 3],
            })
            .unwrap();
        manager.sync().unwrap();

        let path = dir.path().join(wal_file_name(1));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xFF; 5]); // garbage tail, short of a full frame
        std::fs::write(&path, &bytes).unwrap();

        let entries = replay_file(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rotate_updates_current_and_starts_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = WalManager::create(dir.path(), 1).unwrap();
        manager
            .append(&WalEntry {
                seq: 1,
                payload: vec![9],
            })
            .unwrap();
        let (old, new) = manager.rotate().unwrap();
        assert_eq!(old, 1);
        assert_eq!(new, 2);
        let current = std::fs::read_to_string(dir.path().join(CURRENT_FILE_NAME)).unwrap();
        assert_eq!(current, wal_file_name(2));
        let files = list_wal_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn list_wal_files_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let _a = WalManager::create(dir.path(), 5).unwrap();
        std::fs::write(dir.path().join(wal_file_name(2)), []).unwrap();
        std::fs::write(dir.path().join(wal_file_name(10)), []).unwrap();
        let files = list_wal_files(dir.path()).unwrap();
        let numbers: Vec<i64> = files.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![2, 5, 10]);
    }
}
