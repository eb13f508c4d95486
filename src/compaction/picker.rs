//! Picker: scores each level and proposes compaction tasks (§4.6.1).

use crate::config::TableConfig;
use crate::version::{FileMetadata, Version};

#[derive(Clone, Debug)]
pub struct CompactionTask {
    pub source_level: u8,
    pub files: Vec<FileMetadata>,
    pub output_level: u8,
    pub score: f64,
}

/// Output partition target, bytes, before the 0.8 safety factor applied
/// in the compactor (§4.6.2 step 5). Also reused here, unscaled, as the
/// base input-selection cumulative-size budget per source level.
pub fn target_bytes_for_level(level: usize) -> u64 {
    match level {
        0 => 2 * 1024 * 1024,
        1 => 10 * 1024 * 1024,
        2 => 50 * 1024 * 1024,
        3 => 100 * 1024 * 1024,
        _ => 200 * 1024 * 1024,
    }
}

/// `(target multiplier, max file count)` scaled by pressure (§4.6.1).
fn pressure_scale(pressure: f64) -> (u64, usize) {
    if pressure >= 10.0 {
        (5, 100)
    } else if pressure >= 5.0 {
        (3, 50)
    } else if pressure >= 2.0 {
        (2, 20)
    } else {
        (1, 10)
    }
}

pub struct Picker;

impl Picker {
    pub fn pick_compaction(version: &Version, config: &TableConfig) -> Vec<CompactionTask> {
        let mut tasks = Vec::new();

        if let Some(task) = Self::pick_l0(version, config) {
            tasks.push(task);
        }
        for level in 1..=5usize {
            if let Some(task) = Self::pick_level(version, config, level) {
                tasks.push(task);
            }
        }

        tasks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        tasks
    }

    fn pick_l0(version: &Version, config: &TableConfig) -> Option<CompactionTask> {
        let files = version.get_level(0);
        let count = files.len();
        let total_size: i64 = files.iter().map(|f| f.file_size).sum();
        let size_limit = config.level_size_limits[0];
        let file_limit = config.level_file_limits[0].unwrap_or(usize::MAX);

        let over_size = total_size as u64 > size_limit;
        let over_count = file_limit != usize::MAX && count > file_limit;
        if !over_size && !over_count {
            return None;
        }

        let score = f64_max(
            count as f64 / file_limit.max(1) as f64,
            total_size as f64 / size_limit.max(1) as f64,
        );
        let mut selected = files.to_vec();
        selected.sort_by_key(|f| f.file_number);
        Some(CompactionTask {
            source_level: 0,
            files: selected,
            output_level: 1,
            score,
        })
    }

    fn pick_level(version: &Version, config: &TableConfig, level: usize) -> Option<CompactionTask> {
        let files = version.get_level(level);
        let total_size: i64 = files.iter().map(|f| f.file_size).sum();
        let size_limit = config.level_size_limits[level];
        if total_size as u64 <= size_limit || size_limit == u64::MAX {
            return None;
        }
        let pressure = total_size as f64 / size_limit as f64;
        let (multiplier, max_files) = pressure_scale(pressure);
        let target_bytes = target_bytes_for_level(level) * multiplier;

        let mut ordered = files.to_vec();
        ordered.sort_by_key(|f| f.min_key);

        let mut selected = Vec::new();
        let mut accumulated = 0i64;
        for file in ordered {
            if !selected.is_empty()
                && (selected.len() >= max_files || accumulated as u64 >= target_bytes)
            {
                break;
            }
            accumulated += file.file_size;
            selected.push(file);
        }

        Some(CompactionTask {
            source_level: level as u8,
            files: selected,
            output_level: (level + 1) as u8,
            score: pressure,
        })
    }
}

fn f64_max(a: f64, b: f64) -> f64 {
    if a > b {
        a
    } else {
        b
    }
}
