//! Core types for tsdb-lite

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp as supplied by the caller; the engine attaches no unit to it
pub type Timestamp = i64;

/// Tag set of a series. Keys are unique; ordering is irrelevant.
pub type Tags = HashMap<String, String>;

/// A single sample with timestamp and value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Sample timestamp
    pub timestamp: Timestamp,
    /// Sample value
    pub value: f64,
}

impl Point {
    /// Create a new point
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(Timestamp, f64)> for Point {
    fn from((timestamp, value): (Timestamp, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// True when no timestamp can satisfy the range
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Build a tag set from string pairs
pub fn tags<K, V, I>(pairs: I) -> Tags
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
