//! Registry of liquidity pools with per-pool locking

use super::pool::{LiquidityAvailability, LiquidityPool, PoolKey};
use super::{INSUFFICIENT_LIQUIDITY, NO_ACTIVE_POOL};
use crate::chain::{apply_bps, FeeSchedule};
use crate::config::PoolConfig;
use crate::metrics;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one rebalancing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub pools_checked: usize,
    pub pools_rebalanced: usize,
    pub total_moved: u128,
}

/// Tracks liquidity per chain pair and token.
///
/// Every pool sits behind its own mutex so reservations on different pools
/// never contend with each other.
pub struct LiquidityRegistry {
    pools: DashMap<PoolKey, Arc<Mutex<LiquidityPool>>>,
    /// Target destination share of pool funds, in basis points
    target_bps: u32,
    schedule: Arc<FeeSchedule>,
}

impl LiquidityRegistry {
    pub fn new(target_utilization: f64, schedule: Arc<FeeSchedule>) -> Self {
        Self {
            pools: DashMap::new(),
            target_bps: (target_utilization.clamp(0.0, 1.0) * 10_000.0).round() as u32,
            schedule,
        }
    }

    /// Build the registry and seed pools from configuration
    pub fn from_config(
        pools: &[PoolConfig],
        target_utilization: f64,
        schedule: Arc<FeeSchedule>,
    ) -> Self {
        let registry = Self::new(target_utilization, schedule);
        for pool in pools {
            let mut record = LiquidityPool::new(
                PoolKey::new(pool.source_chain, pool.destination_chain, &pool.token),
                pool.source_balance,
                pool.destination_balance,
            );
            record.active = pool.active;
            registry.register_pool(record);
        }
        registry
    }

    /// Add or replace a pool
    pub fn register_pool(&self, pool: LiquidityPool) {
        info!(
            "Registered pool {} (destination balance {}, active: {})",
            pool.key, pool.destination_balance, pool.active
        );
        metrics::record_pool_reservable(&pool.key, pool.reservable());
        self.pools
            .insert(pool.key.clone(), Arc::new(Mutex::new(pool)));
    }

    fn pool(&self, key: &PoolKey) -> Option<Arc<Mutex<LiquidityPool>>> {
        self.pools.get(key).map(|p| p.clone())
    }

    /// Check whether `amount` of `token` can currently be bridged
    pub async fn check_availability(
        &self,
        source_chain: u64,
        destination_chain: u64,
        amount: u128,
        token: &str,
    ) -> LiquidityAvailability {
        let key = PoolKey::new(source_chain, destination_chain, token);
        let Some(pool) = self.pool(&key) else {
            return LiquidityAvailability::unavailable(NO_ACTIVE_POOL, 0, None);
        };

        let pool = pool.lock().await;
        self.evaluate(&pool, amount)
    }

    fn evaluate(&self, pool: &LiquidityPool, amount: u128) -> LiquidityAvailability {
        if !pool.active {
            return LiquidityAvailability::unavailable(NO_ACTIVE_POOL, 0, None);
        }

        let reservable = pool.reservable();
        if amount <= reservable {
            return LiquidityAvailability::available(amount);
        }

        // Capacity held by in-flight transfers comes back once they settle
        let wait = (amount <= pool.destination_balance).then(|| {
            self.schedule
                .estimated_secs(pool.key.source_chain, pool.key.destination_chain)
        });
        LiquidityAvailability::unavailable(INSUFFICIENT_LIQUIDITY, reservable, wait)
    }

    /// Snapshot of all pools
    pub async fn list_pools(&self) -> Vec<LiquidityPool> {
        let handles: Vec<_> = self.pools.iter().map(|e| e.value().clone()).collect();

        let mut pools = Vec::with_capacity(handles.len());
        for handle in handles {
            pools.push(handle.lock().await.clone());
        }
        pools.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        pools
    }

    /// Atomically check capacity and hold `amount` for `tx_id`
    pub(crate) async fn reserve(
        &self,
        key: &PoolKey,
        tx_id: &str,
        amount: u128,
    ) -> Result<(), LiquidityAvailability> {
        let Some(pool) = self.pool(key) else {
            return Err(LiquidityAvailability::unavailable(NO_ACTIVE_POOL, 0, None));
        };

        let mut pool = pool.lock().await;
        if pool.reservations.contains_key(tx_id) {
            return Ok(());
        }

        let availability = self.evaluate(&pool, amount);
        if !availability.available {
            return Err(availability);
        }

        pool.reservations.insert(tx_id.to_string(), amount);
        debug!(tx_id, "Reserved {} on pool {}", amount, key);
        metrics::record_pool_reservable(key, pool.reservable());
        Ok(())
    }

    /// Drop the hold for `tx_id`. Returns false if there was none.
    pub(crate) async fn release(&self, key: &PoolKey, tx_id: &str) -> bool {
        let Some(pool) = self.pool(key) else {
            return false;
        };

        let mut pool = pool.lock().await;
        match pool.reservations.remove(tx_id) {
            Some(amount) => {
                debug!(tx_id, "Released {} on pool {}", amount, key);
                metrics::record_pool_reservable(key, pool.reservable());
                true
            }
            None => false,
        }
    }

    /// Settle the hold for `tx_id`: the payout leaves the destination side and
    /// the locked amount joins the source side. Returns false if there was no hold.
    pub(crate) async fn consume(&self, key: &PoolKey, tx_id: &str, payout: u128) -> bool {
        let Some(pool) = self.pool(key) else {
            return false;
        };

        let mut pool = pool.lock().await;
        let Some(reserved) = pool.reservations.remove(tx_id) else {
            warn!(tx_id, "No reservation to consume on pool {}", key);
            return false;
        };

        let payout = payout.min(reserved);
        pool.destination_balance = pool.destination_balance.saturating_sub(payout);
        pool.source_balance = pool.source_balance.saturating_add(reserved);
        debug!(
            tx_id,
            "Consumed reservation {} (payout {}) on pool {}", reserved, payout, key
        );
        metrics::record_pool_reservable(key, pool.reservable());
        true
    }

    /// Amount currently held for `tx_id`
    pub async fn reservation(&self, key: &PoolKey, tx_id: &str) -> Option<u128> {
        let pool = self.pool(key)?;
        let pool = pool.lock().await;
        pool.reservations.get(tx_id).copied()
    }

    /// Move source-side funds to the destination side until each pool's
    /// destination share reaches the target. Running it twice moves nothing the second time.
    pub async fn optimize_allocation(&self) -> RebalanceReport {
        let handles: Vec<_> = self.pools.iter().map(|e| e.value().clone()).collect();
        let mut report = RebalanceReport::default();

        for handle in handles {
            let mut pool = handle.lock().await;
            report.pools_checked += 1;
            if !pool.active {
                continue;
            }

            let total = pool.source_balance.saturating_add(pool.destination_balance);
            let target = apply_bps(total, self.target_bps);
            if pool.destination_balance >= target {
                continue;
            }

            let moved = (target - pool.destination_balance).min(pool.source_balance);
            if moved == 0 {
                continue;
            }

            pool.source_balance -= moved;
            pool.destination_balance += moved;
            report.pools_rebalanced += 1;
            report.total_moved += moved;

            info!("Rebalanced pool {}: moved {} to destination side", pool.key, moved);
            metrics::record_pool_reservable(&pool.key, pool.reservable());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_pool(destination_balance: u128) -> (LiquidityRegistry, PoolKey) {
        let registry = LiquidityRegistry::new(0.5, Arc::new(FeeSchedule::new(10, 300)));
        let key = PoolKey::new(1, 137, "USDC");
        registry.register_pool(LiquidityPool::new(key.clone(), 0, destination_balance));
        (registry, key)
    }

    #[tokio::test]
    async fn test_missing_pool_is_reported() {
        let (registry, _) = registry_with_pool(1_000);
        let availability = registry.check_availability(137, 1, 10, "USDC").await;

        assert!(!availability.available);
        assert_eq!(availability.reason.as_deref(), Some(NO_ACTIVE_POOL));
    }

    #[tokio::test]
    async fn test_inactive_pool_is_reported_as_missing() {
        let registry = LiquidityRegistry::new(0.5, Arc::new(FeeSchedule::new(10, 300)));
        let mut pool = LiquidityPool::new(PoolKey::new(1, 137, "USDC"), 0, 1_000);
        pool.active = false;
        registry.register_pool(pool);

        let availability = registry.check_availability(1, 137, 10, "usdc").await;
        assert_eq!(availability.reason.as_deref(), Some(NO_ACTIVE_POOL));
    }

    #[tokio::test]
    async fn test_over_capacity_suggests_reservable_amount() {
        let (registry, key) = registry_with_pool(1_000);
        registry.reserve(&key, "tx-a", 400).await.unwrap();

        let availability = registry.check_availability(1, 137, 900, "USDC").await;
        assert!(!availability.available);
        assert_eq!(availability.reason.as_deref(), Some(INSUFFICIENT_LIQUIDITY));
        assert_eq!(availability.suggested_amount, 600);
        // Fits once tx-a settles
        assert_eq!(availability.estimated_wait_time, Some(300));

        let beyond = registry.check_availability(1, 137, 5_000, "USDC").await;
        assert!(beyond.suggested_amount <= 1_000);
        assert_eq!(beyond.estimated_wait_time, None);
    }

    #[tokio::test]
    async fn test_release_is_exactly_once() {
        let (registry, key) = registry_with_pool(1_000);
        registry.reserve(&key, "tx-a", 400).await.unwrap();
        assert_eq!(registry.reservation(&key, "tx-a").await, Some(400));

        assert!(registry.release(&key, "tx-a").await);
        assert!(!registry.release(&key, "tx-a").await);
        assert!(!registry.consume(&key, "tx-a", 400).await);

        let pools = registry.list_pools().await;
        assert_eq!(pools[0].reservable(), 1_000);
        assert_eq!(pools[0].destination_balance, 1_000);
    }

    #[tokio::test]
    async fn test_consume_moves_balances() {
        let (registry, key) = registry_with_pool(1_000);
        registry.reserve(&key, "tx-a", 400).await.unwrap();

        assert!(registry.consume(&key, "tx-a", 390).await);
        let pool = &registry.list_pools().await[0];
        assert_eq!(pool.destination_balance, 610);
        assert_eq!(pool.source_balance, 400);
        assert!(pool.reservations.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_exceed_capacity() {
        let (registry, key) = registry_with_pool(1_000);
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let registry = registry.clone();
                let key = key.clone();
                tokio::spawn(async move { registry.reserve(&key, &format!("tx-{}", i), 300).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        assert_eq!(registry.list_pools().await[0].reserved(), 900);
    }

    #[tokio::test]
    async fn test_optimize_allocation_is_idempotent() {
        let registry = LiquidityRegistry::new(0.5, Arc::new(FeeSchedule::new(10, 300)));
        registry.register_pool(LiquidityPool::new(PoolKey::new(1, 137, "USDC"), 800, 200));

        let first = registry.optimize_allocation().await;
        assert_eq!(first.pools_rebalanced, 1);
        assert_eq!(first.total_moved, 300);

        let pool = &registry.list_pools().await[0];
        assert_eq!(pool.destination_balance, 500);
        assert_eq!(pool.source_balance, 500);

        let second = registry.optimize_allocation().await;
        assert_eq!(second.pools_rebalanced, 0);
        assert_eq!(second.total_moved, 0);
    }
}
