//! Live status fan-out to transaction subscribers
//!
//! Each subscriber gets its own unbounded channel, so updates for one
//! transaction arrive in the order they were published. A broadcast
//! firehose carries every update for operational consumers.

use crate::metrics;
use crate::types::BridgeStatus;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// A status change pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub tx_id: String,
    pub from: Option<BridgeStatus>,
    pub status: BridgeStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Subscription counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    /// Distinct transactions with at least one subscriber
    pub total_transactions: usize,
    pub total_subscribers: usize,
}

type Subscribers = HashMap<String, mpsc::UnboundedSender<StatusUpdate>>;

/// Maps transaction IDs to interested subscribers
pub struct SubscriptionHub {
    subscribers: DashMap<String, Subscribers>,
    firehose: broadcast::Sender<StatusUpdate>,
}

impl SubscriptionHub {
    pub fn new(firehose_capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(firehose_capacity);
        Self {
            subscribers: DashMap::new(),
            firehose,
        }
    }

    /// Register interest in `tx_id`. A repeated subscription replaces the earlier channel.
    pub fn subscribe(
        &self,
        tx_id: &str,
        subscriber_id: &str,
    ) -> mpsc::UnboundedReceiver<StatusUpdate> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .entry(tx_id.to_string())
            .or_default()
            .insert(subscriber_id.to_string(), sender);

        debug!(tx_id, subscriber_id, "Subscribed");
        self.refresh_gauge();
        receiver
    }

    /// Remove a subscription. Returns false if it did not exist.
    pub fn unsubscribe(&self, tx_id: &str, subscriber_id: &str) -> bool {
        let removed = match self.subscribers.get_mut(tx_id) {
            Some(mut subs) => subs.remove(subscriber_id).is_some(),
            None => false,
        };
        self.subscribers.remove_if(tx_id, |_, subs| subs.is_empty());

        if removed {
            debug!(tx_id, subscriber_id, "Unsubscribed");
            self.refresh_gauge();
        }
        removed
    }

    pub fn subscriber_count(&self, tx_id: &str) -> usize {
        self.subscribers.get(tx_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Counts live subscriptions, dropping any whose receiver has gone away
    pub fn stats(&self) -> SubscriptionStats {
        self.prune_closed();
        let mut stats = SubscriptionStats::default();
        for entry in self.subscribers.iter() {
            if !entry.value().is_empty() {
                stats.total_transactions += 1;
                stats.total_subscribers += entry.value().len();
            }
        }
        stats
    }

    /// Receive every published update
    pub fn subscribe_all(&self) -> broadcast::Receiver<StatusUpdate> {
        self.firehose.subscribe()
    }

    /// Deliver `update` to a snapshot of the transaction's current subscribers.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, update: &StatusUpdate) -> usize {
        let snapshot: Vec<(String, mpsc::UnboundedSender<StatusUpdate>)> = self
            .subscribers
            .get(&update.tx_id)
            .map(|subs| subs.iter().map(|(id, s)| (id.clone(), s.clone())).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (subscriber_id, sender) in snapshot {
            if sender.send(update.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(subscriber_id);
            }
        }

        if !closed.is_empty() {
            if let Some(mut subs) = self.subscribers.get_mut(&update.tx_id) {
                for subscriber_id in &closed {
                    subs.remove(subscriber_id);
                }
            }
            debug!(tx_id = %update.tx_id, "Pruned {} closed subscribers", closed.len());
        }

        // Nothing left to notify once a transaction has settled with no audience
        if update.status.is_terminal() || !closed.is_empty() {
            self.subscribers
                .remove_if(&update.tx_id, |_, subs| subs.is_empty());
        }

        // No firehose receivers is fine
        let _ = self.firehose.send(update.clone());

        if !closed.is_empty() {
            self.refresh_gauge();
        }
        delivered
    }

    /// Drop senders whose receivers were dropped without unsubscribing.
    /// Subscribers to a settled transaction may never see another publish.
    fn prune_closed(&self) {
        self.subscribers.retain(|_, subs| {
            subs.retain(|_, sender| !sender.is_closed());
            !subs.is_empty()
        });
    }

    fn refresh_gauge(&self) {
        metrics::record_subscribers(self.stats().total_subscribers);
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(tx_id: &str, status: BridgeStatus) -> StatusUpdate {
        StatusUpdate {
            tx_id: tx_id.to_string(),
            from: None,
            status,
            at: Utc::now(),
            reason: None,
        }
    }

    #[test]
    fn test_subscribe_then_unsubscribe_restores_baseline() {
        let hub = SubscriptionHub::default();
        let baseline = hub.stats();
        assert_eq!(baseline, SubscriptionStats::default());

        let _rx = hub.subscribe("tx-1", "alice");
        assert_eq!(
            hub.stats(),
            SubscriptionStats {
                total_transactions: 1,
                total_subscribers: 1
            }
        );

        assert!(hub.unsubscribe("tx-1", "alice"));
        assert_eq!(hub.stats(), baseline);
        assert!(!hub.unsubscribe("tx-1", "alice"));
    }

    #[test]
    fn test_stats_count_transactions_and_registrations() {
        let hub = SubscriptionHub::default();
        let _a = hub.subscribe("tx-1", "alice");
        let _b = hub.subscribe("tx-1", "bob");
        let _c = hub.subscribe("tx-2", "alice");

        let stats = hub.stats();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.total_subscribers, 3);
        assert_eq!(hub.subscriber_count("tx-1"), 2);
    }

    #[tokio::test]
    async fn test_publish_preserves_order_per_transaction() {
        let hub = SubscriptionHub::default();
        let mut rx = hub.subscribe("tx-1", "alice");

        for status in [
            BridgeStatus::BridgePending,
            BridgeStatus::SourceConfirmed,
            BridgeStatus::Completed,
        ] {
            assert_eq!(hub.publish(&update("tx-1", status)), 1);
        }

        assert_eq!(rx.recv().await.unwrap().status, BridgeStatus::BridgePending);
        assert_eq!(rx.recv().await.unwrap().status, BridgeStatus::SourceConfirmed);
        assert_eq!(rx.recv().await.unwrap().status, BridgeStatus::Completed);
    }

    #[tokio::test]
    async fn test_closed_receivers_are_pruned() {
        let hub = SubscriptionHub::default();
        let rx = hub.subscribe("tx-1", "alice");
        drop(rx);

        assert_eq!(hub.publish(&update("tx-1", BridgeStatus::BridgePending)), 0);
        assert_eq!(hub.stats(), SubscriptionStats::default());
    }

    #[test]
    fn test_dropped_receiver_without_publish_is_pruned() {
        let hub = SubscriptionHub::default();
        hub.publish(&update("tx-1", BridgeStatus::Completed));

        let rx = hub.subscribe("tx-1", "alice");
        let _kept = hub.subscribe("tx-2", "bob");
        drop(rx);

        assert_eq!(
            hub.stats(),
            SubscriptionStats {
                total_transactions: 1,
                total_subscribers: 1
            }
        );
        assert_eq!(hub.subscriber_count("tx-1"), 0);
    }

    #[tokio::test]
    async fn test_firehose_sees_every_transaction() {
        let hub = SubscriptionHub::default();
        let mut all = hub.subscribe_all();

        hub.publish(&update("tx-1", BridgeStatus::BridgePending));
        hub.publish(&update("tx-2", BridgeStatus::Failed));

        assert_eq!(all.recv().await.unwrap().tx_id, "tx-1");
        assert_eq!(all.recv().await.unwrap().tx_id, "tx-2");
    }
}
