//! Transaction identifiers.

use crate::concurrency::timestamp::Timestamp;
use serde::Serialize;

/// A unique identifier for a transaction.
///
/// Ids are drawn from the same clock as read and write timestamps, so a
/// transaction's id is numerically equal to the timestamp it began at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<Timestamp> for TransactionId {
    fn from(ts: Timestamp) -> Self {
        Self(ts.value())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}
