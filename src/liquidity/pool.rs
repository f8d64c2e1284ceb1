//! Pool records and availability answers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a liquidity pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub token: String,
}

impl PoolKey {
    pub fn new(source_chain: u64, destination_chain: u64, token: &str) -> Self {
        Self {
            source_chain,
            destination_chain,
            token: token.to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}",
            self.source_chain, self.destination_chain, self.token
        )
    }
}

/// Liquidity for one chain pair and token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub key: PoolKey,
    /// Funds locked on the source chain by completed transfers
    pub source_balance: u128,
    /// Funds available to pay out on the destination chain
    pub destination_balance: u128,
    /// In-flight holds: tx_id -> amount
    pub reservations: HashMap<String, u128>,
    pub active: bool,
}

impl LiquidityPool {
    pub fn new(key: PoolKey, source_balance: u128, destination_balance: u128) -> Self {
        Self {
            key,
            source_balance,
            destination_balance,
            reservations: HashMap::new(),
            active: true,
        }
    }

    /// Sum of in-flight reservations
    pub fn reserved(&self) -> u128 {
        self.reservations.values().sum()
    }

    /// Capacity still available for new reservations
    pub fn reservable(&self) -> u128 {
        self.destination_balance.saturating_sub(self.reserved())
    }

}

/// Answer to an availability query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityAvailability {
    pub available: bool,
    pub reason: Option<String>,
    pub suggested_amount: u128,
    /// Seconds until in-flight reservations are expected to free enough capacity
    pub estimated_wait_time: Option<u64>,
}

impl LiquidityAvailability {
    pub fn available(amount: u128) -> Self {
        Self {
            available: true,
            reason: None,
            suggested_amount: amount,
            estimated_wait_time: None,
        }
    }

    pub fn unavailable(reason: &str, suggested_amount: u128, estimated_wait_time: Option<u64>) -> Self {
        Self {
            available: false,
            reason: Some(reason.to_string()),
            suggested_amount,
            estimated_wait_time,
        }
    }
}
