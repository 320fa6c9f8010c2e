pub mod concurrency;
pub mod database;
pub mod error;
pub mod transaction;

pub use concurrency::{IsolationLevel, LockMode, Timestamp, Version};
pub use database::{Database, DatabaseStats, GcStats};
pub use error::{MvccError, Result};
pub use transaction::{Transaction, TransactionId, TransactionInfo, TransactionState};
