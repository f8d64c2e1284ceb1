//! Chain families and their settlement finality
//!
//! Different chains have different finality models:
//! - Ethereum: Probabilistic (32 blocks for practical finality, ~6 min)
//! - Polygon: Probabilistic (128 blocks)
//! - Arbitrum/Optimism/Base: L1 finality, we use soft finality
//! - Avalanche: Instant finality (1 block)

use serde::{Deserialize, Serialize};

/// Closed set of chain families the bridge knows how to settle on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Avalanche,
    Other,
}

impl ChainFamily {
    /// Classify a chain ID
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 | 11155111 | 5 => ChainFamily::Ethereum,
            137 | 80001 | 80002 => ChainFamily::Polygon,
            42161 | 421614 => ChainFamily::Arbitrum,
            10 | 11155420 => ChainFamily::Optimism,
            8453 | 84532 => ChainFamily::Base,
            43114 | 43113 => ChainFamily::Avalanche,
            _ => ChainFamily::Other,
        }
    }

    /// Recommended confirmation blocks before a settlement counts as final
    pub fn confirmation_blocks(&self) -> u64 {
        match self {
            ChainFamily::Ethereum => 32,
            ChainFamily::Polygon => 128,
            ChainFamily::Arbitrum | ChainFamily::Optimism | ChainFamily::Base => 64,
            ChainFamily::Avalanche => 1,
            // Default conservative
            ChainFamily::Other => 64,
        }
    }

    /// Approximate block time in milliseconds
    pub fn block_time_ms(&self) -> u64 {
        match self {
            ChainFamily::Ethereum => 12_000,
            ChainFamily::Polygon => 2_000,
            ChainFamily::Arbitrum => 250,
            ChainFamily::Optimism | ChainFamily::Base => 2_000,
            ChainFamily::Avalanche => 2_000,
            ChainFamily::Other => 12_000,
        }
    }

    /// Expected seconds until a settlement on this family is final
    pub fn finality_secs(&self) -> u64 {
        (self.confirmation_blocks() * self.block_time_ms()).div_ceil(1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_classification() {
        assert_eq!(ChainFamily::from_chain_id(1), ChainFamily::Ethereum);
        assert_eq!(ChainFamily::from_chain_id(137), ChainFamily::Polygon);
        assert_eq!(ChainFamily::from_chain_id(43114), ChainFamily::Avalanche);
        assert_eq!(ChainFamily::from_chain_id(999_999), ChainFamily::Other);
    }

    #[test]
    fn test_finality_times() {
        assert_eq!(ChainFamily::Ethereum.finality_secs(), 384);
        assert_eq!(ChainFamily::Avalanche.finality_secs(), 2);
        assert_eq!(ChainFamily::Arbitrum.finality_secs(), 16);
    }
}
