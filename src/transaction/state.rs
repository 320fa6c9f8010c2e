//! Transaction sessions and their lifecycle.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::id::TransactionId;
use crate::concurrency::isolation::IsolationLevel;
use crate::concurrency::timestamp::Timestamp;

/// Lifecycle of a transaction. `Active` is the only state that accepts
/// operations; the other two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Committed or aborted.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Registry entry for an active transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Same value as the transaction's timestamps.
    pub id: TransactionId,
    /// The snapshot timestamp reads resolve against.
    pub read_ts: Timestamp,
    /// The isolation level the transaction began with.
    pub isolation_level: IsolationLevel,
    /// When the transaction began.
    pub start_time: Instant,
}

/// A transaction session, owned by the caller.
///
/// The handle is passed into every `Database` operation. It carries the
/// read-set used for commit validation and the write-set used to commit or
/// undo pending versions. It stays inspectable after it finishes.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    read_ts: Timestamp,
    write_ts: Timestamp,
    isolation_level: IsolationLevel,
    pub(crate) read_set: BTreeMap<String, Timestamp>,
    pub(crate) write_set: BTreeMap<String, String>,
    state: TransactionState,
    start_time: Instant,
    end_time: Option<Instant>,
}

impl Transaction {
    /// Creates an active transaction that began at `ts`.
    pub(crate) fn new(ts: Timestamp, isolation_level: IsolationLevel) -> Self {
        Self {
            id: TransactionId::from(ts),
            read_ts: ts,
            write_ts: ts,
            isolation_level,
            read_set: BTreeMap::new(),
            write_set: BTreeMap::new(),
            state: TransactionState::Active,
            start_time: Instant::now(),
            end_time: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn write_ts(&self) -> Timestamp {
        self.write_ts
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Keys read so far, with the creation timestamp of the version observed.
    pub fn read_set(&self) -> &BTreeMap<String, Timestamp> {
        &self.read_set
    }

    /// Keys written so far, with their pending values.
    pub fn write_set(&self) -> &BTreeMap<String, String> {
        &self.write_set
    }

    /// Whether this transaction has read or written `key`.
    pub fn touches(&self, key: &str) -> bool {
        self.read_set.contains_key(key) || self.write_set.contains_key(key)
    }

    /// Time from begin to finish, or to now while still active.
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// The registry entry describing this transaction.
    pub fn info(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.id,
            read_ts: self.read_ts,
            isolation_level: self.isolation_level,
            start_time: self.start_time,
        }
    }

    pub(crate) fn finish(&mut self, state: TransactionState) {
        debug_assert!(state.is_finished());
        self.state = state;
        self.end_time = Some(Instant::now());
    }
}
