//! Capacity-bounded point buffer

use crate::Point;

/// Append-only block of points within a series.
///
/// An open chunk holds points in arrival order. Once full it can be
/// compacted exactly once, which stable-sorts the points by timestamp and
/// seals the chunk for good.
#[derive(Debug, Clone)]
pub struct Chunk {
    points: Vec<Point>,
    capacity: usize,
    compacted: bool,
}

impl Chunk {
    /// Create an empty chunk, reserving room for `capacity` points
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            capacity,
            compacted: false,
        }
    }

    /// Number of points held
    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// Maximum number of points this chunk accepts
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the chunk has been sorted and flagged by compaction
    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    /// Whether the chunk holds `capacity` points
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.capacity
    }

    /// A sealed chunk never receives another append
    pub fn is_sealed(&self) -> bool {
        self.compacted || self.is_full()
    }

    /// Points in stored order
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Append a point. Callers must roll over to a new chunk when sealed.
    pub(crate) fn push(&mut self, point: Point) {
        debug_assert!(!self.is_sealed(), "append to a sealed chunk");
        self.points.push(point);
    }

    /// Sort a full, uncompacted chunk by timestamp and flag it compacted.
    ///
    /// Returns `true` if this call did the work. Open or already compacted
    /// chunks are left untouched.
    pub(crate) fn compact(&mut self) -> bool {
        if self.compacted || !self.is_full() {
            return false;
        }
        // stable: equal timestamps keep arrival order
        self.points.sort_by_key(|p| p.timestamp);
        self.compacted = true;
        true
    }

    #[cfg(test)]
    pub(crate) fn from_points(points: Vec<Point>, capacity: usize) -> Self {
        Self {
            points,
            capacity,
            compacted: false,
        }
    }
}
