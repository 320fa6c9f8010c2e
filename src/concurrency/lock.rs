//! Lock management for MVCC.
//!
//! Locks are per key and fail-fast: a request is granted or rejected on the
//! spot, there is no wait queue and therefore nothing to deadlock on.

use crate::error::{MvccError, Result};
use crate::transaction::TransactionId;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Lock modes supported by the system.
///
/// Ordered by strength, so `Write > Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LockMode {
    /// Shared lock for read operations.
    Read,
    /// Exclusive lock for write operations.
    Write,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another held by a
    /// different transaction.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }
}

/// Lock manager for the MVCC system.
///
/// The table maps each key to its holders. Check-and-grant for one key runs
/// under that key's shard lock, so two requests on the same key are always
/// decided one after the other.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, HashMap<TransactionId, LockMode>>,
}

impl LockManager {
    /// Creates a new lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a lock for a transaction, or fails immediately.
    ///
    /// A request that `tid` already satisfies keeps the stronger of the held
    /// and requested modes; a sole reader asking for `Write` is upgraded.
    pub fn acquire_lock(&self, tid: TransactionId, key: &str, mode: LockMode) -> Result<()> {
        let mut holders = self.locks.entry(key.to_owned()).or_default();

        let conflict = holders
            .iter()
            .any(|(holder, held)| *holder != tid && !held.is_compatible_with(&mode));
        if conflict {
            return Err(MvccError::LockConflict {
                tid,
                key: key.to_owned(),
            });
        }

        holders
            .entry(tid)
            .and_modify(|held| *held = (*held).max(mode))
            .or_insert(mode);
        Ok(())
    }

    /// Releases the lock `tid` holds on `key`, if any.
    pub fn release_lock(&self, tid: TransactionId, key: &str) {
        if let Some(mut holders) = self.locks.get_mut(key) {
            holders.remove(&tid);
        }
        self.locks.remove_if(key, |_, holders| holders.is_empty());
    }

    /// Releases all locks held by a transaction.
    pub fn release_all_locks(&self, tid: TransactionId) {
        self.locks.retain(|_, holders| {
            holders.remove(&tid);
            !holders.is_empty()
        });
    }

    /// Checks if a transaction holds a lock at least as strong as `mode`.
    pub fn has_lock(&self, tid: TransactionId, key: &str, mode: LockMode) -> bool {
        self.locks
            .get(key)
            .and_then(|holders| holders.get(&tid).copied())
            .is_some_and(|held| held >= mode)
    }

    /// Current holders of `key`, ordered by transaction id.
    pub fn holders(&self, key: &str) -> Vec<(TransactionId, LockMode)> {
        let mut holders: Vec<_> = self
            .locks
            .get(key)
            .map(|holders| holders.iter().map(|(tid, mode)| (*tid, *mode)).collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    /// Total number of granted locks across all keys.
    pub fn lock_count(&self) -> usize {
        self.locks.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn tid(v: u64) -> TransactionId {
        TransactionId::new(v)
    }

    #[test]
    fn test_lock_compatibility() {
        assert!(LockMode::Read.is_compatible_with(&LockMode::Read));
        assert!(!LockMode::Read.is_compatible_with(&LockMode::Write));
        assert!(!LockMode::Write.is_compatible_with(&LockMode::Read));
        assert!(!LockMode::Write.is_compatible_with(&LockMode::Write));
    }

    #[test]
    fn test_basic_lock_acquire_release() {
        let manager = LockManager::new();

        manager.acquire_lock(tid(1), "k", LockMode::Read).unwrap();
        assert!(manager.has_lock(tid(1), "k", LockMode::Read));
        assert!(!manager.has_lock(tid(1), "k", LockMode::Write));

        manager.release_lock(tid(1), "k");
        assert!(!manager.has_lock(tid(1), "k", LockMode::Read));
        assert_eq!(manager.lock_count(), 0);
    }

    #[test]
    fn test_multiple_read_locks() {
        let manager = LockManager::new();

        for t in 1..=3 {
            manager.acquire_lock(tid(t), "k", LockMode::Read).unwrap();
        }
        assert_eq!(manager.holders("k").len(), 3);

        // A writer is rejected while readers exist.
        let err = manager.acquire_lock(tid(4), "k", LockMode::Write).unwrap_err();
        assert_eq!(
            err,
            MvccError::LockConflict {
                tid: tid(4),
                key: "k".into()
            }
        );
    }

    #[test]
    fn test_write_lock_excludes_everyone() {
        let manager = LockManager::new();
        manager.acquire_lock(tid(1), "k", LockMode::Write).unwrap();

        assert!(manager.acquire_lock(tid(2), "k", LockMode::Read).is_err());
        assert!(manager.acquire_lock(tid(2), "k", LockMode::Write).is_err());
        assert_eq!(manager.holders("k"), vec![(tid(1), LockMode::Write)]);

        // Other keys are unaffected.
        assert!(manager.acquire_lock(tid(2), "other", LockMode::Write).is_ok());
    }

    #[test]
    fn test_reacquire_keeps_stronger_mode() {
        let manager = LockManager::new();

        manager.acquire_lock(tid(1), "k", LockMode::Write).unwrap();
        manager.acquire_lock(tid(1), "k", LockMode::Read).unwrap();
        assert!(manager.has_lock(tid(1), "k", LockMode::Write));
        assert!(manager.acquire_lock(tid(2), "k", LockMode::Read).is_err());

        // Sole reader upgrades.
        manager.acquire_lock(tid(3), "u", LockMode::Read).unwrap();
        manager.acquire_lock(tid(3), "u", LockMode::Write).unwrap();
        assert_eq!(manager.holders("u"), vec![(tid(3), LockMode::Write)]);

        // Shared reader cannot upgrade.
        manager.acquire_lock(tid(4), "s", LockMode::Read).unwrap();
        manager.acquire_lock(tid(5), "s", LockMode::Read).unwrap();
        assert!(manager.acquire_lock(tid(4), "s", LockMode::Write).is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let manager = LockManager::new();
        manager.acquire_lock(tid(1), "k", LockMode::Read).unwrap();
        manager.acquire_lock(tid(2), "k", LockMode::Read).unwrap();

        manager.release_lock(tid(1), "k");
        manager.release_lock(tid(1), "k");
        manager.release_lock(tid(9), "missing");
        assert_eq!(manager.holders("k"), vec![(tid(2), LockMode::Read)]);

        manager.release_lock(tid(2), "k");
        assert!(manager.holders("k").is_empty());
        assert!(manager.acquire_lock(tid(3), "k", LockMode::Write).is_ok());
    }

    #[test]
    fn test_release_all_locks() {
        let manager = LockManager::new();
        manager.acquire_lock(tid(1), "a", LockMode::Read).unwrap();
        manager.acquire_lock(tid(1), "b", LockMode::Write).unwrap();
        manager.acquire_lock(tid(2), "a", LockMode::Read).unwrap();
        assert_eq!(manager.lock_count(), 3);

        manager.release_all_locks(tid(1));
        assert_eq!(manager.lock_count(), 1);
        assert!(manager.holders("b").is_empty());
        assert!(manager.has_lock(tid(2), "a", LockMode::Read));
    }

    #[test]
    fn test_concurrent_writers_single_winner() {
        let manager = Arc::new(LockManager::new());
        let num_threads = 16;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (1..=num_threads as u64)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    manager.acquire_lock(tid(t), "hot", LockMode::Write).is_ok()
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 1);
        assert_eq!(manager.holders("hot").len(), 1);
    }
}
