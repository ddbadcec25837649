//! tsdb-lite Core - Sharded In-Memory Time-Series Storage Engine
//!
//! Points are grouped into series identified by a metric name and a tag
//! set. The engine is built from:
//!
//! - **Key codec**: canonical `metric{k=v,...}` keys
//! - **Shards**: a fixed array of independently locked key→series maps,
//!   routed by an xxh64 hash of the key
//! - **Chunks**: capacity-bounded, append-only point buffers per series
//! - **Compaction**: background in-place sort of full chunks
//! - **WAL (Write-Ahead Log)**: group-commit durability and replay
//!
//! ```rust,ignore
//! use tsdblite_core::{tags, Database, StorageConfig};
//!
//! let db = Database::open(StorageConfig::durable("data/wal"))?;
//! let cpu = tags([("host", "a")]);
//! db.create_series("cpu", &cpu)?;
//! db.append_point("cpu", &cpu, 1000, 1.0)?;
//! let points = db.get_range("cpu", &cpu, 0, 3000)?;
//! ```

pub mod compaction;
pub mod key;
pub mod metrics;
pub mod partition;
pub mod series;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{Result, TsdbError};
pub use key::canonical_key;
pub use storage::{Database, DatabaseStats, StorageConfig};
pub use types::*;

/// tsdb-lite version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    /// Points per chunk
    pub const CHUNK_CAPACITY: usize = 2048;

    /// Number of shards
    pub const SHARD_COUNT: usize = 32;

    /// Buffered WAL bytes that trigger a write (64KB)
    pub const WAL_BUFFER_THRESHOLD: usize = 64 * 1024;

    /// WAL group commit period
    pub const WAL_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

    /// WAL segment size (16MB)
    pub const WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;
}
