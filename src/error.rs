//! Engine error types.

use crate::concurrency::timestamp::Timestamp;
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors surfaced by the MVCC engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MvccError {
    #[error("Invalid transaction: {0} is not active")]
    InvalidTransaction(TransactionId),

    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Version not found: no version satisfies the visibility rule")]
    VersionNotFound,

    #[error("Lock conflict: {tid} cannot lock key {key}")]
    LockConflict { tid: TransactionId, key: String },

    #[error("Serialization failure: {tid} read key {key} before a newer commit")]
    SerializationFailure { tid: TransactionId, key: String },

    #[error("Timestamp conflict: a version created at {0} already exists")]
    TimestampConflict(Timestamp),
}

impl MvccError {
    /// Whether the caller may retry the whole transaction after this error.
    ///
    /// The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockConflict { .. } | Self::SerializationFailure { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, MvccError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let tid = TransactionId::new(7);
        assert!(MvccError::LockConflict {
            tid,
            key: "k".into()
        }
        .is_retryable());
        assert!(MvccError::SerializationFailure {
            tid,
            key: "k".into()
        }
        .is_retryable());
        assert!(!MvccError::InvalidTransaction(tid).is_retryable());
        assert!(!MvccError::VersionNotFound.is_retryable());
        assert!(!MvccError::TimestampConflict(Timestamp::new(3)).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = MvccError::LockConflict {
            tid: TransactionId::new(2),
            key: "key1".into(),
        };
        assert_eq!(err.to_string(), "Lock conflict: Txn2 cannot lock key key1");

        let err = MvccError::KeyNotFound { key: "x".into() };
        assert_eq!(err.to_string(), "Key not found: x");
    }
}
