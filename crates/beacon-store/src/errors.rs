//! Store error types.

use thiserror::Error;

/// Errors raised by a [`KeyValueStore`](crate::KeyValueStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The SQLite backend failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem setup failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the write (quota, read-only, …).
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        let err = StoreError::Rejected("quota exceeded".into());
        assert_eq!(err.to_string(), "write rejected: quota exceeded");
    }

    #[test]
    fn io_from_conversion() {
        let err: StoreError = std::io::Error::other("denied").into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
