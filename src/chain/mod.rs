//! Chain module - per-chain settlement dispatch
//!
//! This module provides:
//! - Settlement adapters selected by destination chain ID
//! - Chain family classification and finality times
//! - The fee and time schedule per chain pair

pub mod adapter;
pub mod fees;
pub mod finality;

pub use adapter::{LoopbackAdapter, SettlementAdapter, SettlementOutcome};
pub use fees::{apply_bps, FeeSchedule, RouteTerms};
pub use finality::ChainFamily;

#[cfg(test)]
pub use adapter::MockSettlementAdapter;

use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settlement adapters indexed by chain ID
pub struct ChainRegistry {
    adapters: DashMap<u64, Arc<dyn SettlementAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    /// Register a loopback adapter for every enabled chain
    pub fn from_settings(settings: &Settings) -> Self {
        let registry = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            let family = ChainFamily::from_chain_id(chain_config.chain_id);
            let delay = Duration::from_secs(
                chain_config
                    .confirmation_secs
                    .unwrap_or_else(|| family.finality_secs()),
            );

            info!(
                "Initializing chain {} (ID: {}, family: {:?}, finality: {:?})",
                name, chain_config.chain_id, family, delay
            );

            registry.register(Arc::new(LoopbackAdapter::new(
                chain_config.chain_id,
                chain_config.network_fee,
                delay,
            )));
        }

        registry
    }

    pub fn register(&self, adapter: Arc<dyn SettlementAdapter>) {
        self.adapters.insert(adapter.chain_id(), adapter);
    }

    /// Get the adapter for a specific chain
    pub fn get_adapter(&self, chain_id: u64) -> BridgeResult<Arc<dyn SettlementAdapter>> {
        self.adapters
            .get(&chain_id)
            .map(|a| a.clone())
            .ok_or(BridgeError::UnsupportedChain { chain_id })
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.adapters.contains_key(&chain_id)
    }

    /// Get all supported chain IDs
    pub fn supported_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.adapters.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_chain_is_unsupported() {
        let registry = ChainRegistry::new();
        registry.register(Arc::new(LoopbackAdapter::new(1, 0, Duration::ZERO)));

        assert!(registry.is_supported(1));
        assert!(matches!(
            registry.get_adapter(137),
            Err(BridgeError::UnsupportedChain { chain_id: 137 })
        ));
        assert_eq!(registry.supported_chains(), vec![1]);
    }
}
