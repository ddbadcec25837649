//! Background chunk compaction
//!
//! A full chunk is sorted by timestamp in place and flagged compacted, once.
//! The sweep walks every shard, taking the shard's exclusive map lock and
//! each series' exclusive lock in turn, so it serializes against appends and
//! queries on the series being compacted but never against other shards.

use crate::metrics::MetricsSink;
use crate::storage::Shard;
use crate::Result;
use crossbeam_channel::{select, tick, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Run one compaction sweep over `shards`. Returns the number of chunks
/// compacted.
pub fn compact_shards(shards: &[Shard], metrics: &dyn MetricsSink) -> usize {
    let start = Instant::now();
    let compacted: usize = shards.iter().map(Shard::compact).sum();

    if compacted > 0 {
        metrics.chunks_compacted(compacted as u64);
        debug!(
            "Compacted {} chunks across {} shards in {:?}",
            compacted,
            shards.len(),
            start.elapsed()
        );
    }
    compacted
}

/// Handle to the periodic compaction thread
pub struct Compactor {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Spawn a thread sweeping `shards` every `interval`
    pub fn start(
        shards: Arc<[Shard]>,
        interval: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("tsdb-compactor".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            compact_shards(&shards, metrics.as_ref());
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("Compaction loop stopped");
            })?;

        info!("Started compaction loop every {:?}", interval);

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for any in-flight sweep to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // disconnecting wakes the loop
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EngineMetrics;
    use crate::series::TimeSeries;
    use crate::{Point, Tags};
    use rand::seq::SliceRandom;

    fn shards_with_full_chunk(capacity: usize) -> Arc<[Shard]> {
        let shards: Arc<[Shard]> = (0..4).map(|_| Shard::new()).collect();
        shards[2]
            .try_insert("cpu", || Ok(TimeSeries::new("cpu", Tags::new(), capacity)))
            .unwrap();

        let mut timestamps: Vec<i64> = (0..capacity as i64).collect();
        timestamps.shuffle(&mut rand::thread_rng());
        let series = shards[2].get("cpu").unwrap();
        for ts in timestamps {
            series.write().append(Point::new(ts, ts as f64));
        }
        shards
    }

    #[test]
    fn test_compact_shards() {
        let shards = shards_with_full_chunk(2048);
        let metrics = EngineMetrics::new();

        assert_eq!(compact_shards(&shards, &metrics), 1);
        assert_eq!(metrics.compacted_chunks_total(), 1);

        let series = shards[2].get("cpu").unwrap();
        let series = series.read();
        let chunk = &series.chunks()[0];
        assert!(chunk.is_compacted());
        assert!(chunk.points().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_second_sweep_is_noop() {
        let shards = shards_with_full_chunk(16);
        let metrics = EngineMetrics::new();
        compact_shards(&shards, &metrics);

        let before = shards[2].get("cpu").unwrap().read().chunks()[0].points().to_vec();
        assert_eq!(compact_shards(&shards, &metrics), 0);
        let after = shards[2].get("cpu").unwrap().read().chunks()[0].points().to_vec();
        assert_eq!(before, after);
        assert_eq!(metrics.compacted_chunks_total(), 1);
    }

    #[test]
    fn test_background_loop_compacts_and_stops() {
        let shards = shards_with_full_chunk(64);
        let metrics = Arc::new(EngineMetrics::new());
        let compactor = Compactor::start(
            Arc::clone(&shards),
            Duration::from_millis(5),
            metrics.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while metrics.compacted_chunks_total() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        compactor.stop();

        assert_eq!(metrics.compacted_chunks_total(), 1);
        assert!(shards[2].get("cpu").unwrap().read().chunks()[0].is_compacted());
    }
}
