//! Version chains for MVCC.
//!
//! Every key owns a [`VersionChain`]: the history of values written to it,
//! ordered by creation timestamp, oldest first. The chain is a plain vector;
//! garbage collection truncates it from the front.

use crate::concurrency::isolation::IsolationLevel;
use crate::concurrency::timestamp::Timestamp;
use crate::error::{MvccError, Result};
use crate::transaction::TransactionId;
use serde::Serialize;

/// One value of a key, valid over `[created_at, ended_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    /// The stored value.
    pub value: String,
    /// The write timestamp of the transaction that created this version.
    pub created_at: Timestamp,
    /// Creation timestamp of the next version (None while this one is newest).
    pub ended_at: Option<Timestamp>,
    /// Whether the creating transaction has committed.
    pub committed: bool,
    /// The transaction that created this version.
    pub owner: TransactionId,
}

impl Version {
    /// Creates a new, uncommitted version.
    pub fn new(value: impl Into<String>, created_at: Timestamp, owner: TransactionId) -> Self {
        Self {
            value: value.into(),
            created_at,
            ended_at: None,
            committed: false,
            owner,
        }
    }

    /// Checks if this version was created by the given transaction.
    pub fn created_by(&self, tid: TransactionId) -> bool {
        self.owner == tid
    }
}

/// Ordered history of the versions of a single key.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: Vec<Version>,
}

impl VersionChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// The newest version, committed or not.
    pub fn newest(&self) -> Option<&Version> {
        self.versions.last()
    }

    fn position(&self, ts: Timestamp) -> std::result::Result<usize, usize> {
        self.versions.binary_search_by_key(&ts, |v| v.created_at)
    }

    /// Adds a version, closing the validity interval of its predecessor.
    ///
    /// A version newer than everything in the chain is appended. An older one
    /// (a writer whose timestamp predates the newest entry) is placed at its
    /// timestamp position and linked on both sides, so `created_at` stays
    /// strictly increasing along the chain.
    pub fn add_version(&mut self, mut version: Version) -> Result<()> {
        let pos = match self.position(version.created_at) {
            Ok(_) => return Err(MvccError::TimestampConflict(version.created_at)),
            Err(pos) => pos,
        };

        version.ended_at = self.versions.get(pos).map(|next| next.created_at);
        if pos > 0 {
            self.versions[pos - 1].ended_at = Some(version.created_at);
        }
        self.versions.insert(pos, version);
        Ok(())
    }

    /// Adds a version, or replaces the value of the owner's own pending
    /// version at the same timestamp.
    pub fn write_version(&mut self, version: Version) -> Result<()> {
        if let Ok(idx) = self.position(version.created_at) {
            let existing = &mut self.versions[idx];
            if existing.created_by(version.owner) && !existing.committed {
                existing.value = version.value;
                return Ok(());
            }
            return Err(MvccError::TimestampConflict(version.created_at));
        }
        self.add_version(version)
    }

    /// Resolves the version visible at `ts` under `level`.
    pub fn get_version(&self, ts: Timestamp, level: IsolationLevel) -> Result<&Version> {
        let mut newest_first = self.versions.iter().rev();
        let found = match level {
            IsolationLevel::ReadUncommitted => self.newest(),
            IsolationLevel::ReadCommitted => newest_first.find(|v| v.committed),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                newest_first.find(|v| v.committed && v.created_at <= ts)
            }
        };
        found.ok_or(MvccError::VersionNotFound)
    }

    /// Marks the pending version owned by `tid` as committed.
    pub fn commit_version(&mut self, tid: TransactionId) -> Result<()> {
        let version = self
            .versions
            .iter_mut()
            .find(|v| v.created_by(tid) && !v.committed)
            .ok_or(MvccError::VersionNotFound)?;
        version.committed = true;
        Ok(())
    }

    /// Whether `tid` has an uncommitted version in this chain.
    pub fn has_pending_version(&self, tid: TransactionId) -> bool {
        self.versions
            .iter()
            .any(|v| v.created_by(tid) && !v.committed)
    }

    /// Whether a committed version newer than `ts` exists.
    pub fn has_committed_after(&self, ts: Timestamp) -> bool {
        self.versions
            .iter()
            .rev()
            .take_while(|v| v.created_at > ts)
            .any(|v| v.committed)
    }

    /// Removes the version created at `ts`, re-linking its predecessor to
    /// its successor.
    pub fn remove_version(&mut self, ts: Timestamp) -> Option<Version> {
        let idx = self.position(ts).ok()?;
        let removed = self.versions.remove(idx);
        if idx > 0 {
            let successor = self.versions.get(idx).map(|next| next.created_at);
            self.versions[idx - 1].ended_at = successor;
        }
        Some(removed)
    }

    /// Discards versions no reader at or above `watermark` can see.
    ///
    /// The newest committed version created before the watermark is kept
    /// together with everything after it. If there is no such version the
    /// chain is left untouched. Returns the number of versions discarded.
    pub fn cleanup_versions(&mut self, watermark: Timestamp) -> usize {
        if self.versions.len() <= 1 {
            return 0;
        }

        match self
            .versions
            .iter()
            .rposition(|v| v.committed && v.created_at < watermark)
        {
            Some(keep) if keep > 0 => {
                self.versions.drain(..keep);
                keep
            }
            _ => 0,
        }
    }
}
