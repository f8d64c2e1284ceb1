//! Canonical record of bridge transactions
//!
//! Handles:
//! - Record creation with the initial audit entry
//! - Status transitions checked against the status graph
//! - Compare-and-set writes so concurrent callers cannot both win
//! - Historical queries for analytics

mod postgres;
mod store;

pub use postgres::PostgresStore;
pub use store::{InMemoryStore, TransactionStore};

#[cfg(test)]
pub use store::MockTransactionStore;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeStatus, BridgeTransaction, StatusChange};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Owns transaction records and enforces valid transitions
pub struct BridgeLedger {
    store: Arc<dyn TransactionStore>,
}

impl BridgeLedger {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Persist a freshly initiated transaction
    pub async fn create(&self, mut tx: BridgeTransaction) -> BridgeResult<BridgeTransaction> {
        if tx.status != BridgeStatus::Initiated {
            return Err(BridgeError::InvalidStateTransition {
                from: "none".to_string(),
                to: tx.status.to_string(),
            });
        }

        tx.history = vec![StatusChange {
            from: None,
            to: BridgeStatus::Initiated,
            at: tx.created_at,
            reason: None,
        }];
        self.store.insert(&tx).await?;
        Ok(tx)
    }

    pub async fn get(&self, tx_id: &str) -> BridgeResult<BridgeTransaction> {
        self.store
            .get(tx_id)
            .await?
            .ok_or_else(|| BridgeError::TransactionNotFound {
                tx_id: tx_id.to_string(),
            })
    }

    /// Move `tx_id` to `to` if its current status is one of `allowed_from`.
    ///
    /// Returns `None` when the transaction was not in an eligible status or
    /// another writer changed it first.
    pub async fn transition<F>(
        &self,
        tx_id: &str,
        allowed_from: &[BridgeStatus],
        to: BridgeStatus,
        reason: Option<String>,
        mutate: F,
    ) -> BridgeResult<Option<BridgeTransaction>>
    where
        F: FnOnce(&mut BridgeTransaction),
    {
        let current = self.get(tx_id).await?;
        let from = current.status;
        if !allowed_from.contains(&from) || !from.can_transition_to(to) {
            debug!(tx_id, "Rejected transition {} -> {}", from, to);
            return Ok(None);
        }

        let now = Utc::now();
        let mut updated = current;
        updated.status = to;
        updated.version += 1;
        updated.updated_at = now;
        match to {
            BridgeStatus::SourceConfirmed => {
                // A retried transfer keeps its original source confirmation
                updated.source_confirmed_at.get_or_insert(now);
            }
            BridgeStatus::Completed => {
                updated.destination_confirmed_at = Some(now);
                updated.completed_at = Some(now);
            }
            _ => {}
        }
        mutate(&mut updated);
        updated.history.push(StatusChange {
            from: Some(from),
            to,
            at: now,
            reason,
        });

        if self.store.compare_and_set(from, &updated).await? {
            debug!(tx_id, "Transition {} -> {}", from, to);
            Ok(Some(updated))
        } else {
            debug!(tx_id, "Lost compare-and-set for {} -> {}", from, to);
            Ok(None)
        }
    }

    /// Records created at or after `cutoff`
    pub async fn history_since(&self, cutoff: DateTime<Utc>) -> BridgeResult<Vec<BridgeTransaction>> {
        self.store.list_since(cutoff).await
    }

    pub async fn health_check(&self) -> BridgeResult<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_transaction(id: &str) -> BridgeTransaction {
        let now = Utc::now();
        BridgeTransaction {
            id: id.to_string(),
            source_chain: 1,
            destination_chain: 137,
            token: "USDC".to_string(),
            source_amount: 1_000,
            destination_amount: 990,
            bridge_fee: 10,
            estimated_yield: 1,
            actual_yield: None,
            sender: "0xsender".to_string(),
            recipient: "0xrecipient".to_string(),
            payment_id: None,
            status: BridgeStatus::Initiated,
            destination_tx_hash: None,
            failure_reason: None,
            retry_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            source_confirmed_at: None,
            destination_confirmed_at: None,
            completed_at: None,
            history: Vec::new(),
        }
    }

    fn ledger() -> BridgeLedger {
        BridgeLedger::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_records_initial_history() {
        let ledger = ledger();
        let tx = ledger.create(sample_transaction("tx-1")).await.unwrap();

        assert_eq!(tx.history.len(), 1);
        assert_eq!(tx.history[0].to, BridgeStatus::Initiated);
        assert!(ledger.create(sample_transaction("tx-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_rejects_edges_outside_graph() {
        let ledger = ledger();
        ledger.create(sample_transaction("tx-1")).await.unwrap();

        let skipped = ledger
            .transition(
                "tx-1",
                &[BridgeStatus::Initiated],
                BridgeStatus::Completed,
                None,
                |_| {},
            )
            .await
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(ledger.get("tx-1").await.unwrap().status, BridgeStatus::Initiated);
    }

    #[tokio::test]
    async fn test_transition_appends_history_and_stamps_times() {
        let ledger = ledger();
        ledger.create(sample_transaction("tx-1")).await.unwrap();

        for (from, to) in [
            (BridgeStatus::Initiated, BridgeStatus::BridgePending),
            (BridgeStatus::BridgePending, BridgeStatus::SourceConfirmed),
            (BridgeStatus::SourceConfirmed, BridgeStatus::Completed),
        ] {
            ledger
                .transition("tx-1", &[from], to, None, |_| {})
                .await
                .unwrap()
                .unwrap();
        }

        let tx = ledger.get("tx-1").await.unwrap();
        let path: Vec<_> = tx.history.iter().map(|h| h.to).collect();
        assert_eq!(
            path,
            vec![
                BridgeStatus::Initiated,
                BridgeStatus::BridgePending,
                BridgeStatus::SourceConfirmed,
                BridgeStatus::Completed
            ]
        );
        assert!(tx.source_confirmed_at.is_some());
        assert!(tx.completed_at.is_some());
        assert_eq!(tx.version, 3);
    }

    #[tokio::test]
    async fn test_only_one_concurrent_transition_wins() {
        let ledger = Arc::new(ledger());
        ledger.create(sample_transaction("tx-1")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .transition(
                            "tx-1",
                            &[BridgeStatus::Initiated, BridgeStatus::BridgePending],
                            BridgeStatus::Failed,
                            Some("cancelled".to_string()),
                            |_| {},
                        )
                        .await
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let ledger = ledger();
        assert!(matches!(
            ledger.get("missing").await,
            Err(BridgeError::TransactionNotFound { .. })
        ));
    }
}
