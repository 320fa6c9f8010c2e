//! Registry of active transactions.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::id::TransactionId;
use super::state::TransactionInfo;
use crate::concurrency::timestamp::Timestamp;
use crate::error::{MvccError, Result};

/// Tracks which transactions are still active.
///
/// An id is present exactly while its transaction is active; this registry
/// is what the watermark for garbage collection is computed from.
#[derive(Debug, Default)]
pub struct TransactionManager {
    transactions: RwLock<HashMap<TransactionId, TransactionInfo>>,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active transaction.
    pub fn add_transaction(&self, info: TransactionInfo) {
        self.transactions.write().insert(info.id, info);
    }

    /// Deregisters a transaction. Returns its entry if it was registered.
    pub fn remove_transaction(&self, id: TransactionId) -> Option<TransactionInfo> {
        self.transactions.write().remove(&id)
    }

    /// Looks up an active transaction.
    pub fn get_transaction(&self, id: TransactionId) -> Result<TransactionInfo> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or(MvccError::InvalidTransaction(id))
    }

    /// Checks if a transaction is registered as active.
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.transactions.read().contains_key(&id)
    }

    /// Returns every active transaction, ordered by id.
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        let mut active: Vec<_> = self.transactions.read().values().cloned().collect();
        active.sort_by_key(|info| info.id);
        active
    }

    /// The smallest read timestamp among active transactions.
    pub fn oldest_read_timestamp(&self) -> Option<Timestamp> {
        self.transactions
            .read()
            .values()
            .map(|info| info.read_ts)
            .min()
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::isolation::IsolationLevel;
    use crate::transaction::Transaction;
    use std::sync::Arc;
    use std::thread;

    fn info(ts: u64) -> TransactionInfo {
        Transaction::new(Timestamp::new(ts), IsolationLevel::RepeatableRead).info()
    }

    #[test]
    fn test_add_get_remove() {
        let manager = TransactionManager::new();
        manager.add_transaction(info(1));
        manager.add_transaction(info(2));

        assert_eq!(manager.len(), 2);
        assert_eq!(
            manager.get_transaction(TransactionId::new(1)).unwrap().read_ts,
            Timestamp::new(1)
        );

        assert!(manager.remove_transaction(TransactionId::new(1)).is_some());
        assert!(manager.remove_transaction(TransactionId::new(1)).is_none());
        assert!(!manager.is_active(TransactionId::new(1)));
        assert!(manager.is_active(TransactionId::new(2)));
    }

    #[test]
    fn test_transaction_manager_not_found() {
        let manager = TransactionManager::new();
        let fake_id = TransactionId::new(999);

        assert_eq!(
            manager.get_transaction(fake_id),
            Err(MvccError::InvalidTransaction(fake_id))
        );
    }

    #[test]
    fn test_oldest_read_timestamp() {
        let manager = TransactionManager::new();
        assert_eq!(manager.oldest_read_timestamp(), None);

        manager.add_transaction(info(7));
        manager.add_transaction(info(3));
        manager.add_transaction(info(9));
        assert_eq!(manager.oldest_read_timestamp(), Some(Timestamp::new(3)));

        manager.remove_transaction(TransactionId::new(3));
        assert_eq!(manager.oldest_read_timestamp(), Some(Timestamp::new(7)));
    }

    #[test]
    fn test_active_transactions_sorted() {
        let manager = TransactionManager::new();
        for ts in [5, 1, 3] {
            manager.add_transaction(info(ts));
        }

        let ids: Vec<_> = manager
            .active_transactions()
            .iter()
            .map(|info| info.id.value())
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_transaction_manager_thread_safety() {
        let manager = Arc::new(TransactionManager::new());

        let handles: Vec<_> = (0..10u64)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..10u64 {
                        manager.add_transaction(info(t * 10 + i + 1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(manager.len(), 100);
        assert_eq!(manager.oldest_read_timestamp(), Some(Timestamp::new(1)));
    }
}
