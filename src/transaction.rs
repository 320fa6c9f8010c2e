//! Transaction management module.
//!
//! This module provides:
//! - Transaction identifiers drawn from the MVCC clock
//! - The caller-owned transaction session (read-set, write-set, state)
//! - The registry of active transactions

pub mod id;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use id::TransactionId;
pub use manager::TransactionManager;
pub use state::{Transaction, TransactionInfo, TransactionState};
