//! Shard - one partition of the series keyspace

use crate::key::canonical_key;
use crate::series::TimeSeries;
use crate::{Result, TsdbError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Handle to one series; the lock guards its chunk list and contents
pub type SeriesHandle = Arc<RwLock<TimeSeries>>;

/// Owns the series routed to it by the partitioner.
///
/// Lock order is always shard map first, then series; no code path takes a
/// shard lock while holding a series lock.
#[derive(Debug, Default)]
pub struct Shard {
    series: RwLock<HashMap<String, SeriesHandle>>,
}

impl Shard {
    /// Create an empty shard
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a series under the shared map lock
    pub fn get(&self, key: &str) -> Option<SeriesHandle> {
        self.series.read().get(key).cloned()
    }

    /// Insert the series produced by `build` unless `key` is already taken.
    ///
    /// `build` runs under the exclusive map lock, so whatever it does (such
    /// as enqueueing a log record) is ordered before any access to the new
    /// series. A failing `build` leaves the shard unchanged.
    pub fn try_insert<F>(&self, key: &str, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<TimeSeries>,
    {
        let mut series = self.series.write();
        if series.contains_key(key) {
            return Err(TsdbError::AlreadyExists(key.to_string()));
        }
        let ts = build()?;
        series.insert(key.to_string(), Arc::new(RwLock::new(ts)));
        Ok(())
    }

    /// Number of series in this shard
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// Whether the shard holds no series
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact every full chunk of every series in the shard.
    ///
    /// Holds the exclusive map lock for the whole sweep and each series'
    /// exclusive lock while its chunks are scanned.
    pub fn compact(&self) -> usize {
        let series = self.series.write();
        series
            .values()
            .map(|ts| {
                let mut ts = ts.write();
                let compacted = ts.compact();
                if compacted > 0 {
                    trace!(
                        "Compacted {} chunks of {}",
                        compacted,
                        canonical_key(ts.metric(), ts.tags())
                    );
                }
                compacted
            })
            .sum()
    }

    /// Visit every series under shared locks
    pub fn for_each_series<F>(&self, mut f: F)
    where
        F: FnMut(&str, &TimeSeries),
    {
        let series = self.series.read();
        for (key, ts) in series.iter() {
            f(key, &ts.read());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Point, Tags};

    fn series(capacity: usize) -> TimeSeries {
        TimeSeries::new("cpu", Tags::new(), capacity)
    }

    #[test]
    fn test_try_insert_rejects_duplicate() {
        let shard = Shard::new();
        shard.try_insert("cpu", || Ok(series(4))).unwrap();
        shard.get("cpu").unwrap().write().append(Point::new(1, 1.0));

        let result = shard.try_insert("cpu", || Ok(series(4)));
        assert!(matches!(result, Err(TsdbError::AlreadyExists(ref k)) if k == "cpu"));
        assert_eq!(shard.len(), 1);
        // first series untouched
        assert_eq!(shard.get("cpu").unwrap().read().point_count(), 1);
    }

    #[test]
    fn test_failed_build_leaves_shard_empty() {
        let shard = Shard::new();
        let result = shard.try_insert("cpu", || Err(TsdbError::Durability("disk gone".into())));
        assert!(result.is_err());
        assert!(shard.is_empty());
        assert!(shard.get("cpu").is_none());
    }

    #[test]
    fn test_compact_counts_full_chunks() {
        let shard = Shard::new();
        shard.try_insert("a", || Ok(series(2))).unwrap();
        shard.try_insert("b", || Ok(series(2))).unwrap();

        for ts in [5, 4, 3] {
            shard.get("a").unwrap().write().append(Point::new(ts, 0.0));
        }
        shard.get("b").unwrap().write().append(Point::new(1, 0.0));

        assert_eq!(shard.compact(), 1);
        assert_eq!(shard.compact(), 0);

        let mut compacted = 0;
        shard.for_each_series(|_, ts| {
            compacted += ts.chunks().iter().filter(|c| c.is_compacted()).count();
        });
        assert_eq!(compacted, 1);
    }
}
