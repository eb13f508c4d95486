//! Version / VersionEdit / VersionSet / MANIFEST (§3.3–3.6, §4.5).

mod manifest;
mod version_set;

pub use manifest::{Manifest, ManifestWriter};
pub use version_set::VersionSet;

use serde::{Deserialize, Serialize};

pub const NUM_LEVELS: usize = 7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_number: i64,
    pub level: u8,
    pub file_size: i64,
    pub min_key: i64,
    pub max_key: i64,
    pub row_count: i64,
}

impl FileMetadata {
    pub fn overlaps(&self, min_key: i64, max_key: i64) -> bool {
        self.min_key <= max_key && min_key <= self.max_key
    }
}

/// A unit of durable state change for the LSM metadata (§3.5). Edits are
/// applied to a cloned [`Version`], then appended to the MANIFEST.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VersionEdit {
    pub added_files: Vec<FileMetadata>,
    pub deleted_files: Vec<i64>,
    pub next_file_number: Option<i64>,
    pub last_sequence: Option<i64>,
}

/// Immutable once installed (§3.4). A new `Version` is produced by
/// cloning the current one and applying an edit to the clone.
#[derive(Clone, Debug)]
pub struct Version {
    pub levels: [Vec<FileMetadata>; NUM_LEVELS],
    pub next_file_number: i64,
    pub last_sequence: i64,
    pub version_number: i64,
}

impl Version {
    pub fn empty() -> Self {
        Self {
            levels: std::array::from_fn(|_| Vec::new()),
            next_file_number: 1,
            last_sequence: 0,
            version_number: 0,
        }
    }

    pub fn get_level(&self, level: usize) -> &[FileMetadata] {
        &self.levels[level]
    }

    pub fn get_level_file_count(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn get_file_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Deep-copies the file lists and bumps `versionNumber`.
    pub fn clone_for_edit(&self) -> Self {
        let mut next = self.clone();
        next.version_number += 1;
        next
    }

    /// Apply-semantics on a clone (§4.5):
    /// 1. remove `deletedFiles` from every level;
    /// 2. append `addedFiles` to their level, re-sorting level ≥ 1 by
    ///    `minKey` to preserve the non-overlap/ordering invariant;
    /// 3. adopt `nextFileNumber`/`lastSequence` if present.
    pub fn apply(&mut self, edit: &VersionEdit) {
        if !edit.deleted_files.is_empty() {
            for level in self.levels.iter_mut() {
                level.retain(|f| !edit.deleted_files.contains(&f.file_number));
            }
        }
        for file in &edit.added_files {
            self.levels[file.level as usize].push(file.clone());
        }
        for level in self.levels.iter_mut().skip(1) {
            level.sort_by_key(|f| f.min_key);
        }
        if let Some(next) = edit.next_file_number {
            self.next_file_number = next;
        }
        if let Some(seq) = edit.last_sequence {
            self.last_sequence = seq;
        }
    }

    /// L0 is read newest-file-first since its ranges may overlap (§3.3,
    /// §4.7); L1+ hold at most one candidate file per level.
    pub fn find_file_for_seq(&self, level: usize, seq: i64) -> Option<&FileMetadata> {
        if level == 0 {
            self.levels[0]
                .iter()
                .rev()
                .find(|f| f.min_key <= seq && seq <= f.max_key)
        } else {
            self.levels[level]
                .binary_search_by(|f| {
                    if seq < f.min_key {
                        std::cmp::Ordering::Greater
                    } else if seq > f.max_key {
                        std::cmp::Ordering::Less
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .ok()
                .map(|idx| &self.levels[level][idx])
        }
    }

    /// L0 files in `fileNumber` descending order, for read precedence.
    pub fn l0_newest_first(&self) -> Vec<&FileMetadata> {
        let mut files: Vec<&FileMetadata> = self.levels[0].iter().collect();
        files.sort_by_key(|f| std::cmp::Reverse(f.file_number));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(number: i64, level: u8, min: i64, max: i64) -> FileMetadata {
        FileMetadata {
            file_number: number,
            level,
            file_size: 1024,
            min_key: min,
            max_key: max,
            row_count: max - min + 1,
        }
    }

    #[test]
    fn apply_removes_deleted_and_adds_new_sorted() {
        let mut version = Version::empty();
        version.apply(&VersionEdit {
            added_files: vec![file(1, 1, 100, 200), file(2, 1, 0, 99)],
            deleted_files: vec![],
            next_file_number: Some(3),
            last_sequence: Some(200),
        });
        let l1: Vec<i64> = version.get_level(1).iter().map(|f| f.file_number).collect();
        assert_eq!(l1, vec![2, 1]);
        assert_eq!(version.next_file_number, 3);
        assert_eq!(version.last_sequence, 200);

        version.apply(&VersionEdit {
            added_files: vec![],
            deleted_files: vec![2],
            next_file_number: None,
            last_sequence: None,
        });
        assert_eq!(version.get_level_file_count(1), 1);
        assert_eq!(version.next_file_number, 3);
    }

    #[test]
    fn find_file_for_seq_binary_searches_non_overlapping_levels() {
        let mut version = Version::empty();
        version.apply(&VersionEdit {
            added_files: vec![file(1, 1, 0, 99), file(2, 1, 100, 199)],
            ..Default::default()
        });
        let found = version.find_file_for_seq(1, 150).unwrap();
        assert_eq!(found.file_number, 2);
        assert!(version.find_file_for_seq(1, 500).is_none());
    }

    #[test]
    fn l0_newest_first_orders_by_file_number_descending() {
        let mut version = Version::empty();
        version.apply(&VersionEdit {
            added_files: vec![file(1, 0, 0, 50), file(3, 0, 10, 60), file(2, 0, 5, 55)],
            ..Default::default()
        });
        let ordered: Vec<i64> = version.l0_newest_first().iter().map(|f| f.file_number).collect();
        assert_eq!(ordered, vec![3, 2, 1]);
    }
}
