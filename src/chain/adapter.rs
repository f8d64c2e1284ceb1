//! Destination-chain settlement adapters

use super::ChainFamily;
use crate::error::BridgeResult;
use crate::types::BridgeTransaction;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::time::Duration;
use tracing::debug;

/// Result of asking a chain to settle a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Confirmed { tx_hash: String },
    Rejected { reason: String },
}

/// Capability every destination chain exposes to the orchestrator.
///
/// An `Err` means the chain could not be reached; the orchestrator keeps the
/// transaction where it was so `process` can be called again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementAdapter: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Submit the payout and wait for it to be confirmed
    async fn confirm_settlement(&self, tx: &BridgeTransaction) -> BridgeResult<SettlementOutcome>;

    /// Destination network fee charged on top of the protocol fee
    fn estimate_fee(&self, amount: u128) -> u128;
}

/// Adapter that confirms after the family's finality delay without touching a network
pub struct LoopbackAdapter {
    chain_id: u64,
    family: ChainFamily,
    network_fee: u128,
    delay: Duration,
}

impl LoopbackAdapter {
    pub fn new(chain_id: u64, network_fee: u128, delay: Duration) -> Self {
        Self {
            chain_id,
            family: ChainFamily::from_chain_id(chain_id),
            network_fee,
            delay,
        }
    }
}

#[async_trait]
impl SettlementAdapter for LoopbackAdapter {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn confirm_settlement(&self, tx: &BridgeTransaction) -> BridgeResult<SettlementOutcome> {
        debug!(
            tx_id = %tx.id,
            "Settling on chain {} ({:?}) after {:?}",
            self.chain_id, self.family, self.delay
        );
        tokio::time::sleep(self.delay).await;

        let mut hasher = Keccak256::new();
        hasher.update(tx.id.as_bytes());
        hasher.update(self.chain_id.to_be_bytes());
        hasher.update(tx.destination_amount.to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        Ok(SettlementOutcome::Confirmed { tx_hash })
    }

    fn estimate_fee(&self, _amount: u128) -> u128 {
        self.network_fee
    }
}
