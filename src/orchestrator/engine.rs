//! Bridge orchestration engine driving transactions through their lifecycle

use super::yields::{accrued_yield, FixedYieldSource, YieldSource};
use crate::chain::{ChainRegistry, FeeSchedule, SettlementOutcome};
use crate::config::Settings;
use crate::consensus::{ConsensusCoordinator, ConsensusResult, LocalValidatorClient, Validator};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{BridgeLedger, TransactionStore};
use crate::liquidity::{LiquidityAvailability, LiquidityPool, LiquidityRegistry, PoolKey};
use crate::metrics;
use crate::monitoring::{
    Analytics, HealthReport, HealthStatus, MonitoringAggregator, MonitoringSnapshot, TimeRange,
};
use crate::subscription::{StatusUpdate, SubscriptionHub, SubscriptionStats};
use crate::types::{BridgeStatus, BridgeTransaction, TransferDetails};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller input for a new transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub amount: u128,
    pub token: String,
    pub sender: String,
    pub recipient: String,
    pub payment_id: Option<String>,
}

/// Fee, time and yield quote for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEstimate {
    pub fee: u128,
    pub estimated_time_secs: u64,
    pub estimated_yield: u128,
}

/// Ledger record plus live context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusReport {
    pub transaction: BridgeTransaction,
    pub consensus: Option<ConsensusResult>,
    pub subscriber_count: usize,
}

/// Collaborators the orchestrator drives
pub struct OrchestratorParts {
    pub ledger: Arc<BridgeLedger>,
    pub liquidity: Arc<LiquidityRegistry>,
    pub consensus: Arc<ConsensusCoordinator>,
    pub chains: Arc<ChainRegistry>,
    pub schedule: Arc<FeeSchedule>,
    pub yields: Arc<dyn YieldSource>,
    pub monitoring: Arc<MonitoringAggregator>,
    pub settlement_timeout: Duration,
}

/// Coordinates liquidity, consensus, settlement and notification per transaction
pub struct BridgeOrchestrator {
    ledger: Arc<BridgeLedger>,
    liquidity: Arc<LiquidityRegistry>,
    consensus: Arc<ConsensusCoordinator>,
    chains: Arc<ChainRegistry>,
    schedule: Arc<FeeSchedule>,
    yields: Arc<dyn YieldSource>,
    hub: Arc<SubscriptionHub>,
    monitoring: Arc<MonitoringAggregator>,
    settlement_timeout: Duration,
    /// One lock per transaction being driven
    tx_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BridgeOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            ledger: parts.ledger,
            liquidity: parts.liquidity,
            consensus: parts.consensus,
            chains: parts.chains,
            schedule: parts.schedule,
            yields: parts.yields,
            hub: Arc::new(SubscriptionHub::default()),
            monitoring: parts.monitoring,
            settlement_timeout: parts.settlement_timeout,
            tx_locks: DashMap::new(),
        }
    }

    /// Wire every component from configuration on top of `store`
    pub fn from_settings(settings: &Settings, store: Arc<dyn TransactionStore>) -> Self {
        let schedule = Arc::new(FeeSchedule::from_config(&settings.bridge, &settings.routes));
        let liquidity = Arc::new(LiquidityRegistry::from_config(
            &settings.pools,
            settings.liquidity.target_utilization,
            schedule.clone(),
        ));

        let validators: Vec<Validator> = settings.validators.iter().map(Validator::from).collect();
        info!("Loaded {} validators", validators.len());
        let consensus = Arc::new(ConsensusCoordinator::new(
            validators,
            Arc::new(LocalValidatorClient::new(&settings.validators)),
            settings.consensus.quorum,
            Duration::from_millis(settings.consensus.timeout_ms),
        ));

        Self::new(OrchestratorParts {
            ledger: Arc::new(BridgeLedger::new(store)),
            liquidity,
            consensus,
            chains: Arc::new(ChainRegistry::from_settings(settings)),
            schedule,
            yields: Arc::new(FixedYieldSource::from_config(&settings.yields)),
            monitoring: Arc::new(MonitoringAggregator::new()),
            settlement_timeout: Duration::from_millis(settings.bridge.settlement_timeout_ms),
        })
    }

    pub fn monitoring(&self) -> Arc<MonitoringAggregator> {
        self.monitoring.clone()
    }

    pub fn liquidity(&self) -> Arc<LiquidityRegistry> {
        self.liquidity.clone()
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionHub> {
        self.hub.clone()
    }

    /// Validate, reserve liquidity and record a new transfer in `INITIATED`
    pub async fn initiate(&self, request: InitiateRequest) -> BridgeResult<BridgeTransaction> {
        self.validate(&request)?;

        let token = request.token.trim().to_ascii_uppercase();
        let fee = self.bridge_fee(request.source_chain, request.destination_chain, request.amount);
        if fee >= request.amount {
            return Err(BridgeError::Validation(format!(
                "Bridge fee {} exceeds amount {}",
                fee, request.amount
            )));
        }

        let tx_id = Uuid::new_v4().to_string();
        let key = PoolKey::new(request.source_chain, request.destination_chain, &token);
        self.liquidity
            .reserve(&key, &tx_id, request.amount)
            .await
            .map_err(BridgeError::InsufficientLiquidity)?;

        let estimated_secs = self
            .schedule
            .estimated_secs(request.source_chain, request.destination_chain);
        let now = Utc::now();
        let tx = BridgeTransaction {
            id: tx_id.clone(),
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            estimated_yield: accrued_yield(
                request.amount,
                self.yields.apy_bps(Some(&token)),
                estimated_secs,
            ),
            token,
            source_amount: request.amount,
            destination_amount: request.amount - fee,
            bridge_fee: fee,
            actual_yield: None,
            sender: request.sender,
            recipient: request.recipient,
            payment_id: request.payment_id,
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
        };

        let tx = match self.ledger.create(tx).await {
            Ok(tx) => tx,
            Err(e) => {
                self.liquidity.release(&key, &tx_id).await;
                return Err(e);
            }
        };

        info!(
            tx_id = %tx.id,
            "Initiated bridge of {} {} from chain {} to chain {} (fee {})",
            tx.source_amount, tx.token, tx.source_chain, tx.destination_chain, tx.bridge_fee
        );
        metrics::record_initiated(tx.source_chain, tx.destination_chain);
        self.announce(&tx).await;
        Ok(tx)
    }

    fn validate(&self, request: &InitiateRequest) -> BridgeResult<()> {
        if request.amount == 0 {
            return Err(BridgeError::Validation("Amount must be positive".to_string()));
        }
        if request.source_chain == request.destination_chain {
            return Err(BridgeError::Validation(
                "Source and destination chains must differ".to_string(),
            ));
        }
        for chain_id in [request.source_chain, request.destination_chain] {
            if !self.chains.is_supported(chain_id) {
                return Err(BridgeError::UnsupportedChain { chain_id });
            }
        }
        if request.token.trim().is_empty() {
            return Err(BridgeError::Validation("Token is required".to_string()));
        }
        if request.sender.trim().is_empty() || request.recipient.trim().is_empty() {
            return Err(BridgeError::Validation(
                "Sender and recipient addresses are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Protocol fee plus the destination network fee
    fn bridge_fee(&self, source_chain: u64, destination_chain: u64, amount: u128) -> u128 {
        let network_fee = self
            .chains
            .get_adapter(destination_chain)
            .map(|adapter| adapter.estimate_fee(amount))
            .unwrap_or(0);
        self.schedule
            .protocol_fee(source_chain, destination_chain, amount)
            .saturating_add(network_fee)
    }

    /// Drive a transaction as far as it can go.
    ///
    /// Concurrent calls for the same ID run one after another; a terminal
    /// transaction is returned unchanged.
    pub async fn process(&self, tx_id: &str) -> BridgeResult<BridgeTransaction> {
        let lock = self.tx_lock(tx_id);
        let result = {
            let _guard = lock.lock().await;
            self.drive(tx_id).await
        };
        self.unlock(tx_id, lock);
        result
    }

    async fn drive(&self, tx_id: &str) -> BridgeResult<BridgeTransaction> {
        let mut tx = self.ledger.get(tx_id).await?;

        loop {
            let next = match tx.status {
                BridgeStatus::Completed | BridgeStatus::Failed | BridgeStatus::Refunded => {
                    debug!(tx_id, "Already terminal ({}), nothing to do", tx.status);
                    return Ok(tx);
                }
                BridgeStatus::Initiated => {
                    self.advance(
                        tx_id,
                        &[BridgeStatus::Initiated],
                        BridgeStatus::BridgePending,
                        None,
                        |_| {},
                    )
                    .await?
                }
                BridgeStatus::BridgePending => self.run_consensus(&tx).await?,
                BridgeStatus::SourceConfirmed => return self.settle(&tx).await,
            };

            tx = match next {
                Some(updated) => updated,
                // Someone else moved it first, report what is there now
                None => return self.ledger.get(tx_id).await,
            };
        }
    }

    async fn run_consensus(
        &self,
        tx: &BridgeTransaction,
    ) -> BridgeResult<Option<BridgeTransaction>> {
        let result = self
            .consensus
            .request_consensus(&tx.id, &TransferDetails::from(tx))
            .await;

        if result.consensus_reached {
            return self
                .advance(
                    &tx.id,
                    &[BridgeStatus::BridgePending],
                    BridgeStatus::SourceConfirmed,
                    None,
                    |_| {},
                )
                .await;
        }

        let reason = format!(
            "Consensus not reached: {}/{} validators",
            result.actual_validators, result.required_validators
        );
        let error = BridgeError::ConsensusNotReached {
            tx_id: tx.id.clone(),
            responded: result.actual_validators,
            required: result.required_validators,
        };
        self.fail(tx, BridgeStatus::BridgePending, reason, error)
            .await
            .map(Some)
    }

    async fn settle(&self, tx: &BridgeTransaction) -> BridgeResult<BridgeTransaction> {
        let adapter = self.chains.get_adapter(tx.destination_chain)?;

        let outcome = match timeout(self.settlement_timeout, adapter.confirm_settlement(tx)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(
                    tx_id = %tx.id,
                    "Settlement on chain {} unavailable, will resume later: {}",
                    tx.destination_chain, e
                );
                return Err(e);
            }
            Err(_) => {
                let reason = format!(
                    "Settlement on chain {} timed out after {:?}",
                    tx.destination_chain, self.settlement_timeout
                );
                let error = BridgeError::Timeout {
                    operation: format!("settlement of {}", tx.id),
                };
                return self
                    .fail(tx, BridgeStatus::SourceConfirmed, reason, error)
                    .await;
            }
        };

        let tx_hash = match outcome {
            SettlementOutcome::Confirmed { tx_hash } => tx_hash,
            SettlementOutcome::Rejected { reason } => {
                let error = BridgeError::SettlementFailed {
                    tx_id: tx.id.clone(),
                    reason: reason.clone(),
                };
                return self
                    .fail(tx, BridgeStatus::SourceConfirmed, reason, error)
                    .await;
            }
        };

        let apy_bps = self.yields.apy_bps(Some(&tx.token));
        let completed = self
            .advance(
                &tx.id,
                &[BridgeStatus::SourceConfirmed],
                BridgeStatus::Completed,
                None,
                |record| {
                    record.actual_yield = Some(accrued_yield(
                        record.source_amount,
                        apy_bps,
                        record.elapsed_ms() / 1000,
                    ));
                    record.destination_tx_hash = Some(tx_hash);
                },
            )
            .await?;

        match completed {
            Some(completed) => {
                self.liquidity
                    .consume(&pool_key(&completed), &completed.id, completed.destination_amount)
                    .await;
                info!(
                    tx_id = %completed.id,
                    "Bridge completed in {} ms", completed.elapsed_ms()
                );
                Ok(completed)
            }
            None => self.ledger.get(&tx.id).await,
        }
    }

    /// Move to `FAILED`, release the hold and surface `error`.
    ///
    /// If another writer got there first the current record is returned instead.
    async fn fail(
        &self,
        tx: &BridgeTransaction,
        from: BridgeStatus,
        reason: String,
        error: BridgeError,
    ) -> BridgeResult<BridgeTransaction> {
        warn!(tx_id = %tx.id, "Bridge failed: {}", reason);
        let failure_reason = reason.clone();
        let failed = self
            .advance(&tx.id, &[from], BridgeStatus::Failed, Some(reason), |record| {
                record.failure_reason = Some(failure_reason);
            })
            .await?;

        match failed {
            Some(_) => {
                self.liquidity.release(&pool_key(tx), &tx.id).await;
                Err(error)
            }
            None => self.ledger.get(&tx.id).await,
        }
    }

    /// Abort a transaction that has not been confirmed on the source side
    pub async fn cancel(&self, tx_id: &str) -> BridgeResult<bool> {
        let tx = self.ledger.get(tx_id).await?;
        if !tx.status.is_cancellable() {
            debug!(tx_id, "Cannot cancel in status {}", tx.status);
            return Ok(false);
        }

        let cancelled = self
            .advance(
                tx_id,
                &[BridgeStatus::Initiated, BridgeStatus::BridgePending],
                BridgeStatus::Failed,
                Some("Cancelled".to_string()),
                |record| record.failure_reason = Some("Cancelled".to_string()),
            )
            .await?;

        match cancelled {
            Some(tx) => {
                self.liquidity.release(&pool_key(&tx), tx_id).await;
                info!(tx_id, "Bridge cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send a failed transaction back through consensus
    pub async fn retry(&self, tx_id: &str) -> BridgeResult<bool> {
        let lock = self.tx_lock(tx_id);
        let result = {
            let _guard = lock.lock().await;
            self.retry_locked(tx_id).await
        };
        self.unlock(tx_id, lock);
        result
    }

    async fn retry_locked(&self, tx_id: &str) -> BridgeResult<bool> {
        let tx = self.ledger.get(tx_id).await?;
        if tx.status != BridgeStatus::Failed {
            debug!(tx_id, "Cannot retry in status {}", tx.status);
            return Ok(false);
        }

        let key = pool_key(&tx);
        if let Err(availability) = self.liquidity.reserve(&key, tx_id, tx.source_amount).await {
            warn!(
                tx_id,
                "Retry refused, liquidity unavailable: {}",
                availability.reason.as_deref().unwrap_or("unknown")
            );
            return Ok(false);
        }
        self.consensus.invalidate(tx_id);

        let retried = self
            .advance(
                tx_id,
                &[BridgeStatus::Failed],
                BridgeStatus::BridgePending,
                Some("Retry".to_string()),
                |record| {
                    record.retry_count += 1;
                    record.failure_reason = None;
                    record.destination_tx_hash = None;
                },
            )
            .await;

        match retried {
            Ok(Some(tx)) => {
                info!(tx_id, "Retry {} scheduled", tx.retry_count);
                Ok(true)
            }
            Ok(None) => {
                self.liquidity.release(&key, tx_id).await;
                Ok(false)
            }
            Err(e) => {
                self.liquidity.release(&key, tx_id).await;
                Err(e)
            }
        }
    }

    /// Close out a failed transaction after its funds went back to the sender
    pub async fn refund(&self, tx_id: &str) -> BridgeResult<bool> {
        let lock = self.tx_lock(tx_id);
        let result = {
            let _guard = lock.lock().await;
            self.advance(
                tx_id,
                &[BridgeStatus::Failed],
                BridgeStatus::Refunded,
                Some("Refunded on source chain".to_string()),
                |_| {},
            )
            .await
        };
        self.unlock(tx_id, lock);

        let refunded = result?.is_some();
        if refunded {
            info!(tx_id, "Bridge refunded");
        }
        Ok(refunded)
    }

    /// Quote a route. Unknown pairs use the default fee and time.
    pub fn estimate(&self, source_chain: u64, destination_chain: u64, amount: u128) -> BridgeEstimate {
        let estimated_time_secs = self.schedule.estimated_secs(source_chain, destination_chain);
        BridgeEstimate {
            fee: self.bridge_fee(source_chain, destination_chain, amount),
            estimated_time_secs,
            estimated_yield: accrued_yield(amount, self.yields.apy_bps(None), estimated_time_secs),
        }
    }

    pub async fn get_status(&self, tx_id: &str) -> BridgeResult<TransactionStatusReport> {
        let transaction = self.ledger.get(tx_id).await?;
        Ok(TransactionStatusReport {
            consensus: self.consensus.cached_result(tx_id),
            subscriber_count: self.hub.subscriber_count(tx_id),
            transaction,
        })
    }

    pub async fn check_liquidity(
        &self,
        source_chain: u64,
        destination_chain: u64,
        amount: u128,
        token: &str,
    ) -> LiquidityAvailability {
        self.liquidity
            .check_availability(source_chain, destination_chain, amount, token)
            .await
    }

    pub async fn list_pools(&self) -> Vec<LiquidityPool> {
        self.liquidity.list_pools().await
    }

    /// Include or exclude a validator from later consensus rounds.
    ///
    /// Returns false for an unknown validator ID.
    pub async fn set_validator_active(&self, validator_id: &str, active: bool) -> bool {
        self.consensus.set_active(validator_id, active).await
    }

    /// Receive status updates for an existing transaction
    pub async fn subscribe(
        &self,
        tx_id: &str,
        subscriber_id: &str,
    ) -> BridgeResult<mpsc::UnboundedReceiver<StatusUpdate>> {
        self.ledger.get(tx_id).await?;
        Ok(self.hub.subscribe(tx_id, subscriber_id))
    }

    pub fn unsubscribe(&self, tx_id: &str, subscriber_id: &str) -> bool {
        self.hub.unsubscribe(tx_id, subscriber_id)
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.hub.stats()
    }

    pub async fn analytics(&self, range: TimeRange) -> BridgeResult<Analytics> {
        let records = self.ledger.history_since(range.cutoff(Utc::now())).await?;
        Ok(self.monitoring.analytics(range, &records))
    }

    pub async fn metrics(&self) -> MonitoringSnapshot {
        self.monitoring.metrics().await
    }

    /// Aggregator health, downgraded when the store is unreachable
    pub async fn health(&self) -> HealthReport {
        let mut report = self.monitoring.health().await;
        if let Err(e) = self.ledger.health_check().await {
            warn!("Transaction store health check failed: {}", e);
            report.status = HealthStatus::Unhealthy;
        }
        report
    }

    /// Apply a ledger transition and fan out the result
    async fn advance<F>(
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
        let updated = self
            .ledger
            .transition(tx_id, allowed_from, to, reason, mutate)
            .await?;
        if let Some(tx) = &updated {
            self.announce(tx).await;
        }
        Ok(updated)
    }

    /// Publish the latest history entry and record terminal outcomes.
    ///
    /// An outcome is recorded when a transaction leaves the in-flight statuses,
    /// so closing out a failure with a refund is not counted again.
    async fn announce(&self, tx: &BridgeTransaction) {
        let Some(change) = tx.history.last() else {
            return;
        };
        let delivered = self.hub.publish(&StatusUpdate {
            tx_id: tx.id.clone(),
            from: change.from,
            status: change.to,
            at: change.at,
            reason: change.reason.clone(),
        });
        debug!(tx_id = %tx.id, status = %tx.status, "Notified {} subscribers", delivered);

        let from_terminal = change.from.is_some_and(|from| from.is_terminal());
        if tx.status.is_terminal() && !from_terminal {
            let success = tx.status == BridgeStatus::Completed;
            if success {
                metrics::record_completed(tx.destination_chain);
            } else {
                metrics::record_failed(tx.destination_chain);
            }
            self.monitoring
                .record_transaction(success, tx.elapsed_ms(), tx.source_amount)
                .await;
        }
    }

    fn tx_lock(&self, tx_id: &str) -> Arc<Mutex<()>> {
        self.tx_locks
            .entry(tx_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn unlock(&self, tx_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        // Only drop the entry when nobody else holds or waits on it
        self.tx_locks
            .remove_if(tx_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn pool_key(tx: &BridgeTransaction) -> PoolKey {
    PoolKey::new(tx.source_chain, tx.destination_chain, &tx.token)
}
