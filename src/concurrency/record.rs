//! Keyspace entries.

use crate::concurrency::isolation::IsolationLevel;
use crate::concurrency::timestamp::Timestamp;
use crate::concurrency::version::{Version, VersionChain};
use crate::error::Result;
use crate::transaction::TransactionId;
use parking_lot::RwLock;

/// The version chain of one key, guarded by its own lock.
///
/// Every method takes the lock for the duration of a single chain operation
/// and never calls out to another component while holding it.
#[derive(Debug, Default)]
pub struct Record {
    chain: RwLock<VersionChain>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` as the pending version of `owner` at `ts`.
    pub fn insert_version(
        &self,
        value: impl Into<String>,
        ts: Timestamp,
        owner: TransactionId,
    ) -> Result<()> {
        self.chain
            .write()
            .write_version(Version::new(value, ts, owner))
    }

    /// Returns a copy of the version visible at `ts` under `level`.
    pub fn get_version(&self, ts: Timestamp, level: IsolationLevel) -> Result<Version> {
        self.chain.read().get_version(ts, level).cloned()
    }

    pub fn commit_version(&self, tid: TransactionId) -> Result<()> {
        self.chain.write().commit_version(tid)
    }

    pub fn has_pending_version(&self, tid: TransactionId) -> bool {
        self.chain.read().has_pending_version(tid)
    }

    pub fn has_committed_after(&self, ts: Timestamp) -> bool {
        self.chain.read().has_committed_after(ts)
    }

    pub fn remove_version(&self, ts: Timestamp) -> Option<Version> {
        self.chain.write().remove_version(ts)
    }

    pub fn cleanup_versions(&self, watermark: Timestamp) -> usize {
        self.chain.write().cleanup_versions(watermark)
    }

    /// Snapshot of every version, oldest first.
    pub fn versions(&self) -> Vec<Version> {
        self.chain.read().versions().to_vec()
    }

    pub fn version_count(&self) -> usize {
        self.chain.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_record_lifecycle() {
        let record = Record::new();
        let tid = TransactionId::new(1);

        record.insert_version("v1", Timestamp::new(1), tid).unwrap();
        assert!(record.has_pending_version(tid));
        assert!(record
            .get_version(Timestamp::new(1), IsolationLevel::ReadCommitted)
            .is_err());

        record.commit_version(tid).unwrap();
        let version = record
            .get_version(Timestamp::new(1), IsolationLevel::RepeatableRead)
            .unwrap();
        assert_eq!(version.value, "v1");
        assert!(version.committed);
        assert_eq!(record.version_count(), 1);
    }

    #[test]
    fn test_concurrent_inserts_stay_ordered() {
        let record = Arc::new(Record::new());
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let record = Arc::clone(&record);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..25u64 {
                        let ts = t + 1 + i * 4;
                        record
                            .insert_version(format!("v{}", ts), Timestamp::new(ts), TransactionId::new(ts))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let versions = record.versions();
        assert_eq!(versions.len(), 100);
        for pair in versions.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
            assert_eq!(pair[0].ended_at, Some(pair[1].created_at));
        }
        assert_eq!(versions[99].ended_at, None);
    }
}
