//! Database - fixed set of shards behind the create/append/query API

use super::{Shard, StorageConfig};
use crate::compaction::{self, Compactor};
use crate::key::canonical_key;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::partition::Partitioner;
use crate::series::TimeSeries;
use crate::wal::{self, Commit, WalConfig, WalReader, WalRecord, WalWriter};
use crate::{Point, Result, Tags, TimeRange, Timestamp, TsdbError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The storage engine.
///
/// Owns a fixed array of shards. Every operation canonicalizes the
/// (metric, tags) pair, routes the key to its shard and works under that
/// shard's and series' locks only.
pub struct Database {
    shards: Arc<[Shard]>,
    partitioner: Partitioner,
    chunk_capacity: usize,
    metrics: Arc<dyn MetricsSink>,

    // Background workers; the compactor stops before the log closes
    compactor: Mutex<Option<Compactor>>,
    wal: Option<WalWriter>,
}

impl Database {
    /// In-memory database with default shard and chunk sizes and no log
    pub fn in_memory() -> Self {
        let config = StorageConfig::default();
        Self {
            shards: new_shards(config.shard_count),
            partitioner: Partitioner::new(config.shard_count),
            chunk_capacity: config.chunk_capacity,
            metrics: Arc::new(NoopMetrics),
            compactor: Mutex::new(None),
            wal: None,
        }
    }

    /// Open a database, replaying the write-ahead log if one is configured
    pub fn open(config: StorageConfig) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Open a database reporting into `metrics`
    pub fn open_with_metrics(config: StorageConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;

        let mut db = Self {
            shards: new_shards(config.shard_count),
            partitioner: Partitioner::new(config.shard_count),
            chunk_capacity: config.chunk_capacity,
            metrics,
            compactor: Mutex::new(None),
            wal: None,
        };

        if let Some(wal_config) = config.wal {
            db.recover(&wal_config)?;
            db.wal = Some(WalWriter::open(wal_config)?);
        }

        if let Some(interval) = config.compaction_interval {
            db.start_compaction_loop(interval)?;
        }

        info!(
            "Opened database with {} shards, {} series",
            db.shards.len(),
            db.series_count()
        );

        Ok(db)
    }

    /// Create an empty series. Fails with `AlreadyExists` if the key is taken.
    ///
    /// With a log configured this blocks until the record is synced. Inside
    /// a multi-threaded tokio runtime the wait runs under `block_in_place`;
    /// on a current-thread runtime nothing is created and the call fails with
    /// `Config`. Async callers should use [`Database::create_series_async`].
    pub fn create_series(&self, metric: &str, tags: &Tags) -> Result<()> {
        self.ensure_can_block()?;
        match self.begin_create(metric, tags)? {
            Some(commit) => commit.wait(),
            None => Ok(()),
        }
    }

    /// Async variant of [`Database::create_series`]
    pub async fn create_series_async(&self, metric: &str, tags: &Tags) -> Result<()> {
        match self.begin_create(metric, tags)? {
            Some(commit) => commit.wait_async().await,
            None => Ok(()),
        }
    }

    /// Append one point. Fails with `NotFound` if the series was never created.
    ///
    /// Returns once the point is in memory and, with a log configured, once
    /// the group commit covering it has been synced. Runtime handling is the
    /// same as for [`Database::create_series`]; async callers should use
    /// [`Database::append_point_async`].
    pub fn append_point(
        &self,
        metric: &str,
        tags: &Tags,
        timestamp: Timestamp,
        value: f64,
    ) -> Result<()> {
        self.ensure_can_block()?;
        let start = Instant::now();
        if let Some(commit) = self.begin_append(metric, tags, Point::new(timestamp, value))? {
            commit.wait()?;
        }
        self.metrics.point_ingested(start.elapsed());
        Ok(())
    }

    /// Async variant of [`Database::append_point`]
    pub async fn append_point_async(
        &self,
        metric: &str,
        tags: &Tags,
        timestamp: Timestamp,
        value: f64,
    ) -> Result<()> {
        let start = Instant::now();
        if let Some(commit) = self.begin_append(metric, tags, Point::new(timestamp, value))? {
            commit.wait_async().await?;
        }
        self.metrics.point_ingested(start.elapsed());
        Ok(())
    }

    /// Points with `start <= timestamp <= end`.
    ///
    /// Results follow chunk order, then stored order inside each chunk. An
    /// open chunk keeps arrival order, so the output is not guaranteed to be
    /// sorted by timestamp.
    pub fn get_range(
        &self,
        metric: &str,
        tags: &Tags,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Point>> {
        let key = canonical_key(metric, tags);
        let series = self
            .shard(&key)
            .get(&key)
            .ok_or(TsdbError::NotFound(key))?;
        let points = series.read().range(&TimeRange::new(start, end));
        Ok(points)
    }

    /// Start the background compactor. Calling it again is a no-op.
    pub fn start_compaction_loop(&self, interval: Duration) -> Result<()> {
        let mut compactor = self.compactor.lock();
        if compactor.is_some() {
            debug!("Compaction loop already running");
            return Ok(());
        }
        *compactor = Some(Compactor::start(
            Arc::clone(&self.shards),
            interval,
            Arc::clone(&self.metrics),
        )?);
        Ok(())
    }

    /// Run one compaction sweep on the calling thread
    pub fn compact_now(&self) -> usize {
        compaction::compact_shards(&self.shards, self.metrics.as_ref())
    }

    /// Stop background work. The log drains and syncs everything queued.
    pub fn shutdown(&self) {
        if let Some(compactor) = self.compactor.lock().take() {
            compactor.stop();
        }
        if let Some(wal) = &self.wal {
            wal.close();
        }
    }

    /// Number of series across all shards
    pub fn series_count(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    /// Shard count
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index a (metric, tags) pair routes to
    pub fn shard_index(&self, metric: &str, tags: &Tags) -> usize {
        self.partitioner.shard_for(&canonical_key(metric, tags))
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        let mut stats = DatabaseStats {
            shards: self.shards.len(),
            ..Default::default()
        };
        for shard in self.shards.iter() {
            shard.for_each_series(|_, ts| {
                stats.series += 1;
                stats.chunks += ts.chunks().len();
                stats.compacted_chunks += ts.chunks().iter().filter(|c| c.is_compacted()).count();
                stats.points += ts.point_count();
            });
        }
        stats
    }

    /// Insert the series and enqueue its log record under the shard lock
    fn begin_create(&self, metric: &str, tags: &Tags) -> Result<Option<Commit>> {
        let key = canonical_key(metric, tags);
        let mut commit = None;
        self.shard(&key).try_insert(&key, || {
            if let Some(wal) = &self.wal {
                commit = Some(wal.submit(WalRecord::create_series(metric, tags))?);
            }
            Ok(TimeSeries::new(metric, tags.clone(), self.chunk_capacity))
        })?;
        Ok(commit)
    }

    /// Enqueue the log record and append in memory under the series lock,
    /// so log order matches in-memory order for every series
    fn begin_append(&self, metric: &str, tags: &Tags, point: Point) -> Result<Option<Commit>> {
        let key = canonical_key(metric, tags);
        let series = self
            .shard(&key)
            .get(&key)
            .ok_or_else(|| TsdbError::NotFound(key.clone()))?;

        let mut series = series.write();
        let commit = match &self.wal {
            Some(wal) => Some(wal.submit(WalRecord::append_point(key, point))?),
            None => None,
        };
        series.append(point);
        Ok(commit)
    }

    /// Refuse a blocking call up front rather than after the record is queued
    fn ensure_can_block(&self) -> Result<()> {
        match self.wal {
            Some(_) => wal::ensure_can_block(),
            None => Ok(()),
        }
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.partitioner.shard_for(key)]
    }

    fn recover(&self, wal_config: &WalConfig) -> Result<()> {
        let reader = WalReader::new(wal_config.clone());
        let records = reader.recover()?;

        if records.is_empty() {
            return Ok(());
        }

        info!("Recovering {} WAL records", records.len());

        let mut skipped = 0usize;
        for record in records {
            match record {
                WalRecord::CreateSeries { metric, tags } => {
                    let key = canonical_key(&metric, &tags);
                    let capacity = self.chunk_capacity;
                    match self
                        .shard(&key)
                        .try_insert(&key, || Ok(TimeSeries::new(metric, tags, capacity)))
                    {
                        Ok(()) | Err(TsdbError::AlreadyExists(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                WalRecord::AppendPoint { key, point } => match self.shard(&key).get(&key) {
                    Some(series) => {
                        series.write().append(point);
                    }
                    None => skipped += 1,
                },
            }
        }

        if skipped > 0 {
            warn!("Skipped {} WAL points for series that were never created", skipped);
        }

        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn new_shards(count: usize) -> Arc<[Shard]> {
    (0..count).map(|_| Shard::new()).collect()
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub shards: usize,
    pub series: usize,
    pub chunks: usize,
    pub compacted_chunks: usize,
    pub points: usize,
}
