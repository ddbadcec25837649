//! Write-Ahead Log (WAL) implementation
//!
//! A single writer thread owns the log file. Requests are encoded into an
//! in-memory buffer that is written out once it passes a size threshold;
//! on every flush tick the pending bytes are written and synced, and only
//! then are the waiting requests acknowledged (group commit). On startup
//! the log is replayed to rebuild the in-memory state.

mod entry;
mod reader;
mod writer;

pub use entry::WalRecord;
pub use reader::WalReader;
pub use writer::{Commit, WalWriter};
pub(crate) use writer::ensure_can_block;

use crate::{Result, TsdbError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory for WAL segment files
    pub dir: PathBuf,
    /// Group commit period: pending bytes are written and synced this often
    pub flush_interval: Duration,
    /// Buffered bytes that trigger a write to the segment file
    pub buffer_threshold: usize,
    /// Segment size that triggers rotation to a new file
    pub segment_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            flush_interval: crate::config::WAL_FLUSH_INTERVAL,
            buffer_threshold: crate::config::WAL_BUFFER_THRESHOLD,
            segment_size: crate::config::WAL_SEGMENT_SIZE,
        }
    }
}

impl WalConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(TsdbError::Config("WAL flush_interval must be non-zero".into()));
        }
        if self.buffer_threshold == 0 {
            return Err(TsdbError::Config("WAL buffer_threshold must be non-zero".into()));
        }
        if self.segment_size < self.buffer_threshold {
            return Err(TsdbError::Config(
                "WAL segment_size must be at least buffer_threshold".into(),
            ));
        }
        Ok(())
    }
}

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

fn segment_path(dir: &Path, segment_id: u64) -> PathBuf {
    dir.join(format!("{}{:020}{}", SEGMENT_PREFIX, segment_id, SEGMENT_SUFFIX))
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix(SEGMENT_PREFIX))
        .and_then(|s| s.strip_suffix(SEGMENT_SUFFIX))
        .and_then(|s| s.parse().ok())
}

/// Segment files in `dir`, sorted by id
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }
    segments.sort_by_key(|(id, _)| *id);

    Ok(segments)
}
