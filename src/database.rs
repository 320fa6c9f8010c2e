//! The MVCC coordinator.
//!
//! [`Database`] owns the keyspace, the logical clock, the transaction
//! registry and the lock table, and drives every transaction through
//! begin, read, write, commit and rollback. Transactions are plain values
//! owned by the caller and passed in by `&mut`; the database never holds a
//! reference back to them.

use crate::concurrency::{
    IsolationLevel, LockManager, LockMode, Record, Timestamp, TimestampOracle, Version,
};
use crate::error::{MvccError, Result};
use crate::transaction::{Transaction, TransactionInfo, TransactionManager, TransactionState};
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Oldest read timestamp among active transactions at the start of the pass.
    pub watermark: Timestamp,
    /// Number of records visited.
    pub records_scanned: usize,
    /// Number of versions discarded.
    pub versions_removed: usize,
    /// Number of records left empty by rollbacks and removed from the keyspace.
    pub records_dropped: usize,
    /// Wall time spent.
    pub duration: Duration,
}

/// Point-in-time counters describing the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub active_transactions: usize,
    pub version_chains: usize,
    pub total_versions: usize,
    pub held_locks: usize,
    pub current_timestamp: Timestamp,
}

/// In-memory multi-version key-value store.
pub struct Database {
    /// Keyspace. The write lock is only taken to insert or drop a record.
    /// A record may be briefly empty after a rollback; it is then treated as
    /// absent.
    records: RwLock<HashMap<String, Arc<Record>>>,
    /// Source of all transaction ids and timestamps.
    clock: TimestampOracle,
    /// Serializes timestamp allocation with registration, and watermark
    /// computation with both.
    clock_lock: Mutex<()>,
    /// Held across validation and apply so commits are atomic with respect
    /// to each other.
    commit_lock: Mutex<()>,
    tx_manager: TransactionManager,
    lock_manager: LockManager,
}

impl Database {
    /// Creates an empty database whose first transaction begins at timestamp 1.
    pub fn new() -> Self {
        Self::with_start_timestamp(0)
    }

    /// Creates an empty database whose clock starts at `start`.
    pub fn with_start_timestamp(start: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock: TimestampOracle::with_start(start),
            clock_lock: Mutex::new(()),
            commit_lock: Mutex::new(()),
            tx_manager: TransactionManager::new(),
            lock_manager: LockManager::new(),
        }
    }

    /// Begins a new transaction.
    ///
    /// The transaction's id, read timestamp and write timestamp are all the
    /// freshly issued clock value.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Transaction {
        let _clock = self.clock_lock.lock();
        let ts = self.clock.generate();
        let tx = Transaction::new(ts, isolation_level);
        self.tx_manager.add_transaction(tx.info());
        debug!("{} began at {} ({})", tx.id(), ts, isolation_level);
        tx
    }

    /// Writes `value` to `key` as a pending version of `tx`.
    ///
    /// Non-serializable transactions take a write lock first and fail with
    /// [`MvccError::LockConflict`] if anyone else holds a lock on the key;
    /// the caller is expected to roll back. A second write to the same key
    /// replaces the transaction's pending value.
    pub fn write(&self, tx: &mut Transaction, key: &str, value: impl Into<String>) -> Result<()> {
        self.validate_transaction(tx)?;
        self.acquire_lock(tx, key, LockMode::Write)?;

        let value = value.into();
        let record = self.record_or_insert(key);
        if let Err(err) = record.insert_version(value.clone(), tx.write_ts(), tx.id()) {
            warn!("{} failed to write {}: {}", tx.id(), key, err);
            self.release_untracked(tx, key);
            return Err(err);
        }

        tx.write_set.insert(key.to_owned(), value);
        trace!("{} wrote {}", tx.id(), key);
        Ok(())
    }

    /// Reads `key` at the transaction's own isolation level.
    pub fn read(&self, tx: &mut Transaction, key: &str) -> Result<String> {
        let level = tx.isolation_level();
        self.read_with_isolation(tx, key, level)
    }

    /// Reads `key` resolving visibility at `level` and the transaction's
    /// read timestamp.
    ///
    /// Snapshot levels pin the key with a read lock (unless the transaction
    /// itself is serializable); dirty and read-committed reads are lock-free.
    /// The creation timestamp of the version returned is recorded in the
    /// read-set for commit validation.
    pub fn read_with_isolation(
        &self,
        tx: &mut Transaction,
        key: &str,
        level: IsolationLevel,
    ) -> Result<String> {
        self.validate_transaction(tx)?;
        if level.holds_read_locks() {
            self.acquire_lock(tx, key, LockMode::Read)?;
        }

        let resolved = self
            .live_record(key)
            .ok_or_else(|| MvccError::KeyNotFound {
                key: key.to_owned(),
            })
            .and_then(|record| record.get_version(tx.read_ts(), level));

        match resolved {
            Ok(version) => {
                trace!(
                    "{} read {} at {} ({}): version {}",
                    tx.id(),
                    key,
                    tx.read_ts(),
                    level,
                    version.created_at
                );
                tx.read_set.insert(key.to_owned(), version.created_at);
                Ok(version.value)
            }
            Err(err) => {
                self.release_untracked(tx, key);
                Err(err)
            }
        }
    }

    /// Commits a transaction in two phases.
    ///
    /// Validation fails with [`MvccError::SerializationFailure`] if any key
    /// in the read-set has a committed version newer than the one observed.
    /// On any validation failure the transaction is rolled back before the
    /// error is returned. Apply then marks every pending version committed
    /// and releases the transaction's locks.
    pub fn commit(&self, tx: &mut Transaction) -> Result<()> {
        self.validate_transaction(tx)?;
        let _commit = self.commit_lock.lock();

        if let Err(err) = self.prepare(tx) {
            debug!("{} failed validation: {}", tx.id(), err);
            self.undo(tx);
            return Err(err);
        }

        for key in tx.write_set.keys() {
            let record = self.record(key).ok_or(MvccError::VersionNotFound)?;
            record.commit_version(tx.id())?;
            self.lock_manager.release_lock(tx.id(), key);
        }
        for key in tx.read_set.keys() {
            self.lock_manager.release_lock(tx.id(), key);
        }

        self.finish(tx, TransactionState::Committed);
        Ok(())
    }

    /// Rolls back a transaction, discarding its pending versions and
    /// releasing its locks.
    ///
    /// Rolling back an already aborted transaction is a no-op; a committed
    /// one cannot be rolled back.
    pub fn rollback(&self, tx: &mut Transaction) -> Result<()> {
        match tx.state() {
            TransactionState::Committed => Err(MvccError::InvalidTransaction(tx.id())),
            TransactionState::Aborted => Ok(()),
            TransactionState::Active if self.tx_manager.is_active(tx.id()) => {
                self.undo(tx);
                Ok(())
            }
            TransactionState::Active => Err(MvccError::InvalidTransaction(tx.id())),
        }
    }

    /// Prunes every version chain against the current watermark.
    ///
    /// Safe to run while transactions are in flight: each chain is pruned
    /// under its own lock and only versions no active reader can resolve to
    /// are discarded.
    pub fn cleanup_old_versions(&self) -> GcStats {
        let started = Instant::now();
        let watermark = self.watermark();
        let records: Vec<Arc<Record>> = self.records.read().values().cloned().collect();

        let versions_removed = records
            .iter()
            .map(|record| record.cleanup_versions(watermark))
            .sum();
        let records_scanned = records.len();
        drop(records);

        let stats = GcStats {
            watermark,
            records_scanned,
            versions_removed,
            records_dropped: self.drop_empty_records(),
            duration: started.elapsed(),
        };
        debug!(
            "gc at {}: scanned {} records, removed {} versions and {} empty records in {:?}",
            stats.watermark,
            stats.records_scanned,
            stats.versions_removed,
            stats.records_dropped,
            stats.duration
        );
        stats
    }

    /// The oldest read timestamp among active transactions, or the current
    /// clock value when none are active.
    pub fn watermark(&self) -> Timestamp {
        let _clock = self.clock_lock.lock();
        self.tx_manager
            .oldest_read_timestamp()
            .unwrap_or_else(|| self.clock.current())
    }

    /// Moves the clock forward without beginning a transaction.
    pub fn advance_time(&self, amount: u64) -> Timestamp {
        let _clock = self.clock_lock.lock();
        self.clock.advance(amount)
    }

    pub fn current_timestamp(&self) -> Timestamp {
        self.clock.current()
    }

    /// Snapshot of every version of `key`, oldest first.
    pub fn versions(&self, key: &str) -> Option<Vec<Version>> {
        self.live_record(key).map(|record| record.versions())
    }

    /// Every active transaction, ordered by id.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        self.tx_manager.active_transactions()
    }

    /// All keys that have at least one version, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.version_count() > 0)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys `k` with `start <= k <= end`.
    pub fn count_range(&self, start: &str, end: &str) -> usize {
        self.records
            .read()
            .iter()
            .filter(|(key, record)| {
                key.as_str() >= start && key.as_str() <= end && record.version_count() > 0
            })
            .count()
    }

    pub fn stats(&self) -> DatabaseStats {
        let records = self.records.read();
        DatabaseStats {
            active_transactions: self.tx_manager.len(),
            version_chains: records.values().filter(|r| r.version_count() > 0).count(),
            total_versions: records.values().map(|r| r.version_count()).sum(),
            held_locks: self.lock_manager.lock_count(),
            current_timestamp: self.clock.current(),
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.tx_manager
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        if !tx.state().is_active() {
            return Err(MvccError::InvalidTransaction(tx.id()));
        }
        self.tx_manager.get_transaction(tx.id()).map(|_| ())
    }

    fn acquire_lock(&self, tx: &Transaction, key: &str, mode: LockMode) -> Result<()> {
        if tx.isolation_level().uses_locks() {
            self.lock_manager.acquire_lock(tx.id(), key, mode)?;
        }
        Ok(())
    }

    /// Drops a lock taken by a failed operation on a key the transaction
    /// has not otherwise touched.
    fn release_untracked(&self, tx: &Transaction, key: &str) {
        if !tx.touches(key) {
            self.lock_manager.release_lock(tx.id(), key);
        }
    }

    fn record(&self, key: &str) -> Option<Arc<Record>> {
        self.records.read().get(key).cloned()
    }

    fn live_record(&self, key: &str) -> Option<Arc<Record>> {
        self.record(key).filter(|record| record.version_count() > 0)
    }

    fn record_or_insert(&self, key: &str) -> Arc<Record> {
        if let Some(record) = self.record(key) {
            return record;
        }
        let mut records = self.records.write();
        Arc::clone(records.entry(key.to_owned()).or_default())
    }

    /// Removes the record for `key` if it is empty and nobody else holds it.
    fn drop_if_empty(&self, key: &str) {
        let mut records = self.records.write();
        let unused = records
            .get(key)
            .is_some_and(|record| Arc::strong_count(record) == 1 && record.version_count() == 0);
        if unused {
            records.remove(key);
        }
    }

    /// Removes every empty record nobody else holds. Returns how many went.
    fn drop_empty_records(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| Arc::strong_count(record) > 1 || record.version_count() > 0);
        before - records.len()
    }

    fn prepare(&self, tx: &Transaction) -> Result<()> {
        for (key, observed) in &tx.read_set {
            let stale = self
                .record(key)
                .is_some_and(|record| record.has_committed_after(*observed));
            if stale {
                return Err(MvccError::SerializationFailure {
                    tid: tx.id(),
                    key: key.clone(),
                });
            }
        }

        for key in tx.write_set.keys() {
            let pending = self
                .record(key)
                .is_some_and(|record| record.has_pending_version(tx.id()));
            if !pending {
                return Err(MvccError::VersionNotFound);
            }
        }
        Ok(())
    }

    fn undo(&self, tx: &mut Transaction) {
        for key in tx.write_set.keys() {
            if let Some(record) = self.record(key) {
                record.remove_version(tx.write_ts());
            }
        }
        self.lock_manager.release_all_locks(tx.id());
        for key in tx.write_set.keys() {
            self.drop_if_empty(key);
        }

        self.finish(tx, TransactionState::Aborted);
    }

    fn finish(&self, tx: &mut Transaction, state: TransactionState) {
        tx.finish(state);
        self.tx_manager.remove_transaction(tx.id());
        debug!(
            "{} {} after {:?} ({} reads, {} writes)",
            tx.id(),
            state,
            tx.duration(),
            tx.read_set.len(),
            tx.write_set.len()
        );
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
