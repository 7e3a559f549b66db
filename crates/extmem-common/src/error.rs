//! Error types for extmem
//!
//! This module defines the common error type used throughout the workspace.

use thiserror::Error;

/// Common result type for extmem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for extmem
#[derive(Debug, Error)]
pub enum Error {
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    /// A `steal` found no free block even after reaping completed
    /// requests. In a correctly sized configuration this indicates a
    /// programming error (pool too small for the access pattern).
    #[error("block pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PoolExhausted { capacity: 0 };
        assert_eq!(err.to_string(), "block pool exhausted (capacity 0)");

        let err = Error::storage("bad block");
        assert_eq!(err.to_string(), "storage error: bad block");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(matches!(err, Error::DiskIo(_)));
    }
}
