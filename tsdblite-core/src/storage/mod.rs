//! Storage engine - shards, series routing and the public API

mod database;
mod shard;

pub use database::{Database, DatabaseStats};
pub use shard::Shard;

use crate::wal::WalConfig;
use crate::{Result, TsdbError};
use std::path::PathBuf;
use std::time::Duration;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Number of shards; fixed for the lifetime of the database
    pub shard_count: usize,
    /// Points per chunk
    pub chunk_capacity: usize,
    /// Start the background compactor on open with this interval
    pub compaction_interval: Option<Duration>,
    /// Write-ahead log; `None` keeps the engine purely in memory
    pub wal: Option<WalConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_count: crate::config::SHARD_COUNT,
            chunk_capacity: crate::config::CHUNK_CAPACITY,
            compaction_interval: None,
            wal: None,
        }
    }
}

impl StorageConfig {
    /// Default configuration with a write-ahead log in `dir`
    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            wal: Some(WalConfig {
                dir: dir.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Enable the background compactor
    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = Some(interval);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(TsdbError::Config("shard_count must be at least 1".into()));
        }
        if self.chunk_capacity == 0 {
            return Err(TsdbError::Config("chunk_capacity must be at least 1".into()));
        }
        if self.compaction_interval == Some(Duration::ZERO) {
            return Err(TsdbError::Config("compaction_interval must be non-zero".into()));
        }
        if let Some(wal) = &self.wal {
            wal.validate()?;
        }
        Ok(())
    }
}
