//! Quorum counting over a semi-trusted validator set

use super::validator::{transfer_digest, Attestation, Validator, ValidatorClient};
use crate::config::QuorumPolicy;
use crate::metrics;
use crate::types::TransferDetails;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of one solicitation round for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub tx_id: String,
    pub attestations: Vec<Attestation>,
    pub required_validators: usize,
    pub actual_validators: usize,
    pub consensus_reached: bool,
    pub timestamp: DateTime<Utc>,
}

/// Solicits attestations and decides quorum
pub struct ConsensusCoordinator {
    validators: RwLock<Vec<Validator>>,
    client: Arc<dyn ValidatorClient>,
    policy: QuorumPolicy,
    timeout: Duration,
    /// Recorded results, one per transaction until invalidated
    cache: DashMap<String, ConsensusResult>,
    rounds: AtomicU64,
}

impl ConsensusCoordinator {
    pub fn new(
        validators: Vec<Validator>,
        client: Arc<dyn ValidatorClient>,
        policy: QuorumPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            validators: RwLock::new(validators),
            client,
            policy,
            timeout,
            cache: DashMap::new(),
            rounds: AtomicU64::new(0),
        }
    }

    /// Toggle whether a validator counts toward quorum
    pub async fn set_active(&self, validator_id: &str, active: bool) -> bool {
        let mut validators = self.validators.write().await;
        match validators.iter_mut().find(|v| v.id == validator_id) {
            Some(validator) => {
                validator.is_active = active;
                info!("Validator {} active: {}", validator_id, active);
                true
            }
            None => false,
        }
    }

    pub async fn list_active_validators(&self) -> Vec<Validator> {
        self.validators
            .read()
            .await
            .iter()
            .filter(|v| v.is_active)
            .cloned()
            .collect()
    }

    /// Ask every active validator to attest `details` and count the answers.
    ///
    /// Returns the cached result if this transaction already has one.
    pub async fn request_consensus(
        &self,
        tx_id: &str,
        details: &TransferDetails,
    ) -> ConsensusResult {
        if let Some(cached) = self.cached_result(tx_id) {
            debug!(tx_id, "Returning cached consensus result");
            return cached;
        }

        self.rounds.fetch_add(1, Ordering::Relaxed);
        let active = self.list_active_validators().await;
        let required = self.policy.required(active.len());
        let digest = transfer_digest(tx_id, details);

        let requests = active.iter().map(|validator| {
            let client = self.client.clone();
            async move {
                let response = timeout(self.timeout, client.attest(validator, tx_id, &digest)).await;
                (validator, response)
            }
        });

        let mut attestations = Vec::new();
        for (validator, response) in join_all(requests).await {
            match response {
                Ok(Ok(attestation)) if attestation.validator_id == validator.id => {
                    attestations.push(attestation);
                }
                Ok(Ok(attestation)) => {
                    warn!(
                        tx_id,
                        "Validator {} answered with mismatched id {}",
                        validator.id,
                        attestation.validator_id
                    );
                }
                Ok(Err(e)) => {
                    warn!(tx_id, "Validator {} refused attestation: {}", validator.id, e);
                }
                Err(_) => {
                    warn!(
                        tx_id,
                        "Validator {} did not respond within {:?}", validator.id, self.timeout
                    );
                }
            }
        }

        let actual = attestations.len();
        let result = ConsensusResult {
            tx_id: tx_id.to_string(),
            attestations,
            required_validators: required,
            actual_validators: actual,
            consensus_reached: actual >= required,
            timestamp: Utc::now(),
        };

        info!(
            tx_id,
            "Consensus {}: {}/{} validators (active set {})",
            if result.consensus_reached { "reached" } else { "not reached" },
            actual,
            required,
            active.len()
        );
        metrics::record_consensus_round(result.consensus_reached);

        self.cache.insert(tx_id.to_string(), result.clone());
        result
    }

    pub fn cached_result(&self, tx_id: &str) -> Option<ConsensusResult> {
        self.cache.get(tx_id).map(|r| r.clone())
    }

    /// Discard the cached result so the next request solicits afresh
    pub fn invalidate(&self, tx_id: &str) -> bool {
        self.cache.remove(tx_id).is_some()
    }

    /// Number of solicitation rounds actually sent to validators
    pub fn rounds_issued(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }
}
