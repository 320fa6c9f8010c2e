//! Concurrency control module.
//!
//! This module implements the building blocks of the MVCC engine:
//! - A logical clock issuing transaction and version timestamps
//! - Per-key version chains with isolation-level visibility
//! - Fail-fast read/write locks

pub mod isolation;
pub mod lock;
pub mod record;
pub mod timestamp;
pub mod version;

pub use isolation::IsolationLevel;
pub use lock::{LockManager, LockMode};
pub use record::Record;
pub use timestamp::{Timestamp, TimestampOracle};
pub use version::{Version, VersionChain};
