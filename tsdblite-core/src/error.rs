//! Error types for tsdb-lite

use thiserror::Error;

/// Result type alias for tsdb-lite operations
pub type Result<T> = std::result::Result<T, TsdbError>;

/// tsdb-lite error types
#[derive(Error, Debug)]
pub enum TsdbError {
    /// A series with this canonical key already exists
    #[error("Series already exists: {0}")]
    AlreadyExists(String),

    /// No series was created for this canonical key
    #[error("Series not found: {0}")]
    NotFound(String),

    /// The write-ahead log could not persist a request
    #[error("Durability failure: {0}")]
    Durability(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TsdbError {
    /// Check if error is retryable
    ///
    /// Nothing is retried inside the engine; this only tells the caller
    /// whether the failure came from the storage medium rather than from
    /// series existence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TsdbError::Io(_) | TsdbError::Durability(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TsdbError::Corruption(_) | TsdbError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TsdbError::Durability("sync failed".into()).is_retryable());
        assert!(!TsdbError::NotFound("cpu".into()).is_retryable());
        assert!(!TsdbError::AlreadyExists("cpu".into()).is_retryable());
        assert!(TsdbError::ChecksumMismatch { expected: 1, actual: 2 }.is_corruption());
        assert!(!TsdbError::InvalidFormat("short".into()).is_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = TsdbError::NotFound("mem".into());
        assert_eq!(err.to_string(), "Series not found: mem");
    }
}
