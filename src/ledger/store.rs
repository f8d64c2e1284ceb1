//! Persistent store boundary for bridge transactions

use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeStatus, BridgeTransaction};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// CRUD over transaction records with a compare-and-set status update
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record; fails if the ID already exists
    async fn insert(&self, tx: &BridgeTransaction) -> BridgeResult<()>;

    async fn get(&self, tx_id: &str) -> BridgeResult<Option<BridgeTransaction>>;

    /// Replace the record only if its stored status is still `expected` and
    /// its stored version is the one `updated` was derived from
    async fn compare_and_set(
        &self,
        expected: BridgeStatus,
        updated: &BridgeTransaction,
    ) -> BridgeResult<bool>;

    /// Records created at or after `cutoff`
    async fn list_since(&self, cutoff: DateTime<Utc>) -> BridgeResult<Vec<BridgeTransaction>>;

    async fn health_check(&self) -> BridgeResult<()>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<String, BridgeTransaction>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: &BridgeTransaction) -> BridgeResult<()> {
        match self.records.entry(tx.id.clone()) {
            Entry::Occupied(_) => Err(BridgeError::Store(format!(
                "Transaction {} already exists",
                tx.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, tx_id: &str) -> BridgeResult<Option<BridgeTransaction>> {
        Ok(self.records.get(tx_id).map(|r| r.clone()))
    }

    async fn compare_and_set(
        &self,
        expected: BridgeStatus,
        updated: &BridgeTransaction,
    ) -> BridgeResult<bool> {
        let Some(mut record) = self.records.get_mut(&updated.id) else {
            return Err(BridgeError::TransactionNotFound {
                tx_id: updated.id.clone(),
            });
        };

        if record.status != expected || record.version + 1 != updated.version {
            return Ok(false);
        }
        *record = updated.clone();
        Ok(true)
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> BridgeResult<Vec<BridgeTransaction>> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.created_at >= cutoff)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn health_check(&self) -> BridgeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::sample_transaction;

    fn advanced(tx: &BridgeTransaction, to: BridgeStatus) -> BridgeTransaction {
        let mut next = tx.clone();
        next.status = to;
        next.version += 1;
        next
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_status() {
        let store = InMemoryStore::new();
        let tx = sample_transaction("tx-1");
        store.insert(&tx).await.unwrap();

        let pending = advanced(&tx, BridgeStatus::BridgePending);
        assert!(!store
            .compare_and_set(BridgeStatus::BridgePending, &pending)
            .await
            .unwrap());
        assert!(store
            .compare_and_set(BridgeStatus::Initiated, &pending)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stale_snapshot_cannot_overwrite_newer_record() {
        let store = InMemoryStore::new();
        let tx = sample_transaction("tx-1");
        store.insert(&tx).await.unwrap();

        let pending = advanced(&tx, BridgeStatus::BridgePending);
        assert!(store
            .compare_and_set(BridgeStatus::Initiated, &pending)
            .await
            .unwrap());
        // Stale writer derived from the first BRIDGE_PENDING snapshot
        let stale = advanced(&pending, BridgeStatus::Failed);

        let failed = advanced(&pending, BridgeStatus::Failed);
        assert!(store
            .compare_and_set(BridgeStatus::BridgePending, &failed)
            .await
            .unwrap());
        let mut retried = advanced(&failed, BridgeStatus::BridgePending);
        retried.retry_count = 1;
        assert!(store
            .compare_and_set(BridgeStatus::Failed, &retried)
            .await
            .unwrap());

        // Same status as the stale snapshot saw, but a newer version
        assert!(!store
            .compare_and_set(BridgeStatus::BridgePending, &stale)
            .await
            .unwrap());
        let stored = store.get("tx-1").await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeStatus::BridgePending);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.version, 3);
    }
}
