//! Logical clock for MVCC.
//!
//! Every transaction id, read timestamp and write timestamp is drawn from a
//! single [`TimestampOracle`], which makes it the only source of ordering in
//! the engine.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A point on the logical clock. Also the value a [`TransactionId`] is built from.
///
/// [`TransactionId`]: crate::transaction::TransactionId
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ts{}", self.0)
    }
}

/// Shared clock handing out strictly increasing timestamps.
///
/// Clones share the same counter.
#[derive(Debug)]
pub struct TimestampOracle {
    /// Last value issued or advanced to.
    last_timestamp: Arc<AtomicU64>,
}

impl TimestampOracle {
    /// Creates a new oracle whose first issued timestamp is 1.
    pub fn new() -> Self {
        Self::with_start(0)
    }

    /// Creates an oracle whose first issued timestamp is `start + 1`.
    pub fn with_start(start: u64) -> Self {
        Self {
            last_timestamp: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Issues the next timestamp, strictly greater than any issued before.
    pub fn generate(&self) -> Timestamp {
        let ts = self.last_timestamp.fetch_add(1, Ordering::SeqCst) + 1;
        Timestamp::new(ts)
    }

    /// The last value issued or advanced to.
    pub fn current(&self) -> Timestamp {
        Timestamp::new(self.last_timestamp.load(Ordering::SeqCst))
    }

    /// Moves the clock forward by `amount` without issuing a timestamp.
    ///
    /// Returns the new current timestamp. The clock saturates at `u64::MAX`.
    pub fn advance(&self, amount: u64) -> Timestamp {
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ts| {
                Some(ts.saturating_add(amount))
            })
            .unwrap_or_else(|ts| ts);
        Timestamp::new(previous.saturating_add(amount))
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TimestampOracle {
    fn clone(&self) -> Self {
        Self {
            last_timestamp: Arc::clone(&self.last_timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::new(100);
        let ts2 = Timestamp::new(200);

        assert!(ts1 < ts2);
        assert_eq!(format!("{}", ts1), "ts100");
    }

    #[test]
    fn test_oracle_starts_at_one() {
        let oracle = TimestampOracle::new();

        assert_eq!(oracle.current().value(), 0);
        assert_eq!(oracle.generate().value(), 1);
        assert_eq!(oracle.generate().value(), 2);
        assert_eq!(oracle.current().value(), 2);
    }

    #[test]
    fn test_oracle_advance() {
        let oracle = TimestampOracle::with_start(10);

        assert_eq!(oracle.advance(5).value(), 15);
        assert_eq!(oracle.current().value(), 15);
        assert_eq!(oracle.generate().value(), 16);

        // Advancing by zero is a read.
        assert_eq!(oracle.advance(0).value(), 16);
    }

    #[test]
    fn test_oracle_advance_saturates() {
        let oracle = TimestampOracle::new();

        assert_eq!(oracle.advance(u64::MAX).value(), u64::MAX);
        assert_eq!(oracle.advance(1).value(), u64::MAX);
        assert_eq!(oracle.current().value(), u64::MAX);
    }

    #[test]
    fn test_oracle_concurrent() {
        let oracle = TimestampOracle::new();
        let num_threads = 8;
        let per_thread = 200;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let oracle = oracle.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..per_thread).map(|_| oracle.generate()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), num_threads * per_thread);
        assert_eq!(oracle.current().value(), (num_threads * per_thread) as u64);
    }
}
