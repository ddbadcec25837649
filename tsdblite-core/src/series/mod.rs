//! Time series and their chunk lists
//!
//! A [`TimeSeries`] owns an append-only list of [`Chunk`]s. Only the tail
//! chunk is ever written; when it is sealed (full or compacted) the next
//! append pushes a fresh chunk. Earlier chunks change only once, when the
//! compactor sorts them.

mod chunk;

pub use chunk::Chunk;

use crate::{Point, Tags, TimeRange};

/// A named, tagged stream of points
#[derive(Debug)]
pub struct TimeSeries {
    metric: String,
    tags: Tags,
    chunk_capacity: usize,
    chunks: Vec<Chunk>,
}

impl TimeSeries {
    /// Create a series with one empty chunk pre-allocated
    pub fn new(metric: impl Into<String>, tags: Tags, chunk_capacity: usize) -> Self {
        Self {
            metric: metric.into(),
            tags,
            chunk_capacity,
            chunks: vec![Chunk::new(chunk_capacity)],
        }
    }

    /// Metric name
    pub(crate) fn metric(&self) -> &str {
        &self.metric
    }

    /// Tag set
    pub(crate) fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Chunks in creation order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Total points across all chunks
    pub fn point_count(&self) -> usize {
        self.chunks.iter().map(Chunk::count).sum()
    }

    /// Append a point to the tail chunk, rolling over when it is sealed.
    ///
    /// Returns `true` if a new chunk was created.
    pub fn append(&mut self, point: Point) -> bool {
        let rolled = match self.chunks.last() {
            Some(tail) => tail.is_sealed(),
            None => true,
        };
        if rolled {
            self.chunks.push(Chunk::new(self.chunk_capacity));
        }

        // the tail exists: either it was there or we just pushed it
        if let Some(tail) = self.chunks.last_mut() {
            tail.push(point);
        }
        rolled
    }

    /// Collect points with `start <= timestamp <= end`, in chunk order and
    /// stored order within each chunk
    pub fn range(&self, range: &TimeRange) -> Vec<Point> {
        if range.is_empty() {
            return Vec::new();
        }
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.points().iter())
            .filter(|p| range.contains(p.timestamp))
            .copied()
            .collect()
    }

    /// Compact every full, uncompacted chunk. Returns how many were compacted.
    pub fn compact(&mut self) -> usize {
        self.chunks
            .iter_mut()
            .map(|chunk| chunk.compact())
            .filter(|&done| done)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn push_chunk(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_CAPACITY;
    use crate::types::tags;

    fn series() -> TimeSeries {
        TimeSeries::new("cpu", tags([("host", "a")]), CHUNK_CAPACITY)
    }

    #[test]
    fn test_new_series_has_one_empty_chunk() {
        let ts = series();
        assert_eq!(ts.chunks().len(), 1);
        assert_eq!(ts.chunks()[0].count(), 0);
        assert_eq!(ts.metric(), "cpu");
        assert_eq!(ts.tags().get("host").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_rollover_at_capacity() {
        let mut ts = series();
        for i in 0..=CHUNK_CAPACITY as i64 {
            ts.append(Point::new(i, i as f64));
        }

        assert_eq!(ts.chunks().len(), 2);
        assert_eq!(ts.chunks()[0].count(), CHUNK_CAPACITY);
        assert_eq!(ts.chunks()[1].count(), 1);
        assert_eq!(ts.point_count(), CHUNK_CAPACITY + 1);
    }

    #[test]
    fn test_rollover_after_compacted_tail() {
        let mut ts = TimeSeries::new("cpu", Tags::new(), 2);
        ts.append(Point::new(2, 2.0));
        assert!(!ts.append(Point::new(1, 1.0)));
        assert_eq!(ts.compact(), 1);

        assert!(ts.append(Point::new(3, 3.0)));
        assert_eq!(ts.chunks().len(), 2);
        assert_eq!(ts.chunks()[0].points()[0].timestamp, 1);
    }

    #[test]
    fn test_range_preserves_stored_order() {
        let mut ts = series();
        for ts_val in [3000, 1000, 2000] {
            ts.append(Point::new(ts_val, ts_val as f64));
        }

        let got: Vec<i64> = ts
            .range(&TimeRange::new(0, 5000))
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(got, vec![3000, 1000, 2000]);
        assert!(ts.range(&TimeRange::new(10, 5)).is_empty());
    }

    #[test]
    fn test_compact_skips_open_and_compacted() {
        let mut ts = TimeSeries::new("cpu", Tags::new(), 3);
        ts.push_chunk(Chunk::from_points(
            vec![Point::new(9, 0.0), Point::new(8, 0.0), Point::new(7, 0.0)],
            3,
        ));
        ts.append(Point::new(1, 0.0));

        // first chunk is open (empty), second full, third open
        assert_eq!(ts.compact(), 1);
        assert_eq!(ts.compact(), 0);
        assert!(!ts.chunks()[0].is_compacted());
        assert!(ts.chunks()[1].is_compacted());
    }
}
