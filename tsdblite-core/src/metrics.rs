//! Engine instrumentation
//!
//! The engine reports into a [`MetricsSink`] and never reads anything back,
//! so a sink cannot influence control flow or return values.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fire-and-forget receiver of engine events
pub trait MetricsSink: Send + Sync {
    /// A point was appended to a series
    fn point_ingested(&self, latency: Duration);

    /// The compactor sorted and sealed `count` chunks
    fn chunks_compacted(&self, count: u64);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn point_ingested(&self, _latency: Duration) {}

    fn chunks_compacted(&self, _count: u64) {}
}

/// In-process counters and an ingest latency histogram
#[derive(Debug)]
pub struct EngineMetrics {
    ingest_total: AtomicU64,
    compacted_chunks_total: AtomicU64,
    ingest_latency: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            ingest_total: AtomicU64::new(0),
            compacted_chunks_total: AtomicU64::new(0),
            ingest_latency: Histogram::new(),
        }
    }

    /// Total number of points ingested
    pub fn ingest_total(&self) -> u64 {
        self.ingest_total.load(Ordering::Relaxed)
    }

    /// Total number of chunks compacted
    pub fn compacted_chunks_total(&self) -> u64 {
        self.compacted_chunks_total.load(Ordering::Relaxed)
    }

    /// Latency of point ingestion
    pub fn ingest_latency(&self) -> HistogramSnapshot {
        self.ingest_latency.snapshot()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for EngineMetrics {
    fn point_ingested(&self, latency: Duration) {
        self.ingest_total.fetch_add(1, Ordering::Relaxed);
        self.ingest_latency.observe(latency.as_secs_f64());
    }

    fn chunks_compacted(&self, count: u64) {
        self.compacted_chunks_total.fetch_add(count, Ordering::Relaxed);
    }
}

/// Cumulative histogram over fixed upper bounds
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum: Mutex<f64>,
}

/// Point-in-time copy of a [`Histogram`]
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(upper bound, observations <= bound)`
    pub buckets: Vec<(f64, u64)>,
}

impl Histogram {
    /// Default bucket boundaries (in seconds)
    pub const DEFAULT_BUCKETS: &'static [f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    pub fn new() -> Self {
        Self::with_buckets(Self::DEFAULT_BUCKETS.to_vec())
    }

    pub fn with_buckets(bounds: Vec<f64>) -> Self {
        let bucket_counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            bucket_counts,
            count: AtomicU64::new(0),
            sum: Mutex::new(0.0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += value;
        for (bound, counter) in self.bounds.iter().zip(&self.bucket_counts) {
            if value <= *bound {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: *self.sum.lock(),
            buckets: self
                .bounds
                .iter()
                .zip(&self.bucket_counts)
                .map(|(b, c)| (*b, c.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
