//! Liquidity pools backing destination-side settlement
//!
//! This module provides:
//! - One pool per (source chain, destination chain, token) triple
//! - Availability queries with a suggested amount when capacity is short
//! - Atomic check-and-reserve under each pool's own lock
//! - Scheduled rebalancing toward a target utilization

pub mod pool;
pub mod registry;

pub use pool::{LiquidityAvailability, LiquidityPool, PoolKey};
pub use registry::{LiquidityRegistry, RebalanceReport};

/// Reason reported when no active pool serves a chain pair
pub const NO_ACTIVE_POOL: &str = "No active liquidity pool found";

/// Reason reported when the requested amount exceeds reservable capacity
pub const INSUFFICIENT_LIQUIDITY: &str = "Insufficient liquidity";
