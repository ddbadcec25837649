//! WAL reader for recovery

use super::{list_segments, WalConfig, WalRecord};
use crate::{Result, TsdbError};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// WAL reader for recovering records after a restart
pub struct WalReader {
    config: WalConfig,
}

impl WalReader {
    /// Create a new WAL reader
    pub fn new(config: WalConfig) -> Self {
        Self { config }
    }

    /// Recover all records from WAL segments, oldest first.
    ///
    /// Reading a segment stops at the first torn or checksum-failing frame;
    /// the following segments are still read.
    pub fn recover(&self) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();

        for (_, path) in list_segments(&self.config.dir)? {
            let segment_records = Self::read_segment(&path)?;
            if !segment_records.is_empty() {
                info!(
                    "Recovered {} records from {:?}",
                    segment_records.len(),
                    path
                );
            }
            records.extend(segment_records);
        }

        Ok(records)
    }

    fn read_segment(path: &Path) -> Result<Vec<WalRecord>> {
        let data = fs::read(path)?;

        let mut records = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalRecord::decode(&data[offset..]) {
                Ok(Some((record, bytes_read))) => {
                    records.push(record);
                    offset += bytes_read;
                }
                Ok(None) => {
                    // Incomplete record at end (crash during write)
                    warn!(
                        "Ignoring {} trailing bytes of partial record in {:?}",
                        data.len() - offset,
                        path
                    );
                    break;
                }
                Err(e @ (TsdbError::ChecksumMismatch { .. } | TsdbError::Corruption(_))) => {
                    warn!("{} at offset {} in {:?}, truncating", e, offset, path);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }
}
