//! Isolation levels and the locking policy attached to each.

use serde::Serialize;
use std::str::FromStr;

/// Isolation levels supported by the MVCC system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IsolationLevel {
    /// Read Uncommitted: sees the newest version, committed or not.
    ReadUncommitted,
    /// Read Committed: sees the newest committed version at the time of each read.
    ReadCommitted,
    /// Repeatable Read: all reads see the snapshot at the transaction's read timestamp.
    RepeatableRead,
    /// Serializable: snapshot reads, lock-free, validated at commit.
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first.
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Whether reads at this level resolve against the transaction's read timestamp.
    pub fn uses_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    /// Whether transactions at this level go through the lock manager.
    ///
    /// Serializable transactions skip locking and rely on commit-time
    /// read-set validation alone.
    pub fn uses_locks(&self) -> bool {
        !matches!(self, IsolationLevel::Serializable)
    }

    /// Whether a read at this level must hold a read lock until the
    /// transaction ends.
    ///
    /// Only snapshot reads pin the key. Dirty and read-committed reads never
    /// wait on, or collide with, a writer's lock.
    pub fn holds_read_locks(&self) -> bool {
        self.uses_snapshot()
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "read-uncommitted" | "ru" => Ok(Self::ReadUncommitted),
            "read-committed" | "rc" => Ok(Self::ReadCommitted),
            "repeatable-read" | "rr" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}
