use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use iequip_core::{AggregateRoot, TransactionId};
use iequip_lending::Transaction;

use crate::error::StoreError;

/// Storage boundary for transaction records.
///
/// The engine is the only writer. `update` is version-checked so a write based
/// on a stale read is refused rather than silently overwriting.
pub trait TransactionStore: Send + Sync {
    fn insert(&self, transaction: Transaction) -> Result<(), StoreError>;
    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;
    fn update(&self, transaction: Transaction, expected_version: u64) -> Result<(), StoreError>;
    fn remove(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;
    /// All records in id order.
    fn list(&self) -> Result<Vec<Transaction>, StoreError>;
}

impl<S> TransactionStore for Arc<S>
where
    S: TransactionStore + ?Sized,
{
    fn insert(&self, transaction: Transaction) -> Result<(), StoreError> {
        (**self).insert(transaction)
    }

    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).get(id)
    }

    fn update(&self, transaction: Transaction, expected_version: u64) -> Result<(), StoreError> {
        (**self).update(transaction, expected_version)
    }

    fn remove(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).remove(id)
    }

    fn list(&self) -> Result<Vec<Transaction>, StoreError> {
        (**self).list()
    }
}

/// In-memory transaction store for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    inner: RwLock<BTreeMap<TransactionId, Transaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn insert(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let id = transaction.id_typed();
        if map.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        map.insert(id, transaction);
        Ok(())
    }

    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(&id).cloned())
    }

    fn update(&self, transaction: Transaction, expected_version: u64) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let id = transaction.id_typed();
        let current = map.get_mut(&id).ok_or(StoreError::Missing(id))?;
        if current.version() != expected_version {
            return Err(StoreError::VersionMismatch {
                id,
                expected: expected_version,
                found: current.version(),
            });
        }
        *current = transaction;
        Ok(())
    }

    fn remove(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(map.remove(&id))
    }

    fn list(&self) -> Result<Vec<Transaction>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }
}
