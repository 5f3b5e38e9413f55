use chrono::{DateTime, Utc};
use log::{error, warn};
use parking_lot::Mutex;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use crate::core::error::Result;

/// Fallback estimates used before any history has accumulated
pub const DEFAULT_ESTIMATED_CARDINALITY: u32 = 5000;
pub const DEFAULT_ESTIMATED_AVG_VALUE_SIZE: u32 = 32;

/// Per-column statistics captured when a segment is destroyed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub cardinality: u32,
    pub avg_value_size: u32,
}

/// One stats record per destroyed segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentStats {
    pub segment_name: String,
    pub rows_consumed: u64,
    pub rows_indexed: u64,
    pub bytes_used: u64,
    pub seconds: u64,
    pub columns: HashMap<String, ColumnStats>,
    pub recorded_at: DateTime<Utc>,
}

/// Process-wide append-only history of segment ingestion statistics.
///
/// Read at segment construction to size dictionaries and hash tables,
/// appended at destroy. One JSON record per line; unreadable lines are
/// skipped at load so a truncated tail never blocks startup.
pub struct StatsHistory {
    path: PathBuf,
    entries: Mutex<Vec<SegmentStats>>,
}

impl StatsHistory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();

        if path.exists() {
            let file = File::open(&path)?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SegmentStats>(&line) {
                    Ok(stats) => entries.push(stats),
                    Err(e) => {
                        warn!("Skipping stats record at line {}: {}", line_no + 1, e);
                    }
                }
            }
        }

        Ok(StatsHistory {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Append a record. Called during segment teardown, so write failures
    /// are logged and swallowed rather than propagated.
    pub fn append(&self, stats: SegmentStats) {
        let mut entries = self.entries.lock();

        match self.append_to_file(&stats) {
            Ok(()) => {}
            Err(e) => error!("Failed to persist stats for {}: {}", stats.segment_name, e),
        }
        entries.push(stats);
    }

    fn append_to_file(&self, stats: &SegmentStats) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(stats)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean observed cardinality for a column across the history
    pub fn estimated_cardinality(&self, column: &str) -> u32 {
        self.estimate(column, |s| s.cardinality)
            .unwrap_or(DEFAULT_ESTIMATED_CARDINALITY)
    }

    /// Mean observed average value size for a column across the history
    pub fn estimated_avg_value_size(&self, column: &str) -> u32 {
        self.estimate(column, |s| s.avg_value_size)
            .unwrap_or(DEFAULT_ESTIMATED_AVG_VALUE_SIZE)
    }

    fn estimate<F: Fn(&ColumnStats) -> u32>(&self, column: &str, field: F) -> Option<u32> {
        let entries = self.entries.lock();
        let samples: Vec<u64> = entries
            .iter()
            .filter_map(|e| e.columns.get(column))
            .map(|s| field(s) as u64)
            .collect();

        if samples.is_empty() {
            return None;
        }
        Some((samples.iter().sum::<u64>() / samples.len() as u64) as u32)
    }
}
