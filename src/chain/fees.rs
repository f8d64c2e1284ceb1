//! Fee and settlement-time schedule per chain pair

use crate::config::{BridgeConfig, RouteConfig};

use std::collections::HashMap;

/// Fee and time parameters for one route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTerms {
    pub fee_bps: u32,
    pub estimated_secs: u64,
}

/// Lookup table of route terms with a fallback for unknown pairs
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    routes: HashMap<(u64, u64), RouteTerms>,
    fallback: RouteTerms,
}

impl FeeSchedule {
    pub fn new(default_fee_bps: u32, default_estimate_secs: u64) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: RouteTerms {
                fee_bps: default_fee_bps,
                estimated_secs: default_estimate_secs,
            },
        }
    }

    /// Build the schedule from configuration
    pub fn from_config(bridge: &BridgeConfig, routes: &[RouteConfig]) -> Self {
        let mut schedule = Self::new(bridge.default_fee_bps, bridge.default_estimate_secs);
        for route in routes {
            schedule.insert(
                route.source_chain,
                route.destination_chain,
                RouteTerms {
                    fee_bps: route.fee_bps,
                    estimated_secs: route.estimated_secs,
                },
            );
        }
        schedule
    }

    pub fn insert(&mut self, source_chain: u64, destination_chain: u64, terms: RouteTerms) {
        self.routes.insert((source_chain, destination_chain), terms);
    }

    /// Terms for a route, falling back to the defaults when the pair is unknown
    pub fn terms(&self, source_chain: u64, destination_chain: u64) -> RouteTerms {
        self.routes
            .get(&(source_chain, destination_chain))
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn is_known(&self, source_chain: u64, destination_chain: u64) -> bool {
        self.routes.contains_key(&(source_chain, destination_chain))
    }

    /// Percentage part of the bridge fee for `amount`
    pub fn protocol_fee(&self, source_chain: u64, destination_chain: u64, amount: u128) -> u128 {
        apply_bps(amount, self.terms(source_chain, destination_chain).fee_bps)
    }

    pub fn estimated_secs(&self, source_chain: u64, destination_chain: u64) -> u64 {
        self.terms(source_chain, destination_chain).estimated_secs
    }
}

/// `amount * bps / 10_000` without overflowing on large amounts
pub fn apply_bps(amount: u128, bps: u32) -> u128 {
    let bps = bps as u128;
    amount / 10_000 * bps + amount % 10_000 * bps / 10_000
}
