//! Outcome aggregation, health and analytics
//!
//! The aggregator counts terminal outcomes while it is active. Analytics are
//! computed from historical transaction records handed in by the caller.

use crate::metrics;
use crate::types::{BridgeStatus, BridgeTransaction};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// Analytics window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
}

impl TimeRange {
    pub fn duration(&self) -> ChronoDuration {
        match self {
            TimeRange::Day => ChronoDuration::days(1),
            TimeRange::Week => ChronoDuration::weeks(1),
            TimeRange::Month => ChronoDuration::days(30),
        }
    }

    /// Start of the window ending at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(TimeRange::Day),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            other => Err(format!("Unknown time range: {}", other)),
        }
    }
}

/// Aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub total_duration_ms: u64,
    pub total_volume: u128,
    pub average_duration_ms: u64,
    pub success_rate: f64,
}

/// Aggregates over historical records in a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub success_rate: f64,
    pub total_volume: u128,
    pub total_fees: u128,
}

impl Analytics {
    /// Aggregate records created at or after `cutoff`
    pub fn from_records(records: &[BridgeTransaction], cutoff: DateTime<Utc>) -> Self {
        let mut analytics = Analytics::default();
        for tx in records.iter().filter(|tx| tx.created_at >= cutoff) {
            analytics.total_transactions += 1;
            match tx.status {
                BridgeStatus::Completed => analytics.successful_transactions += 1,
                BridgeStatus::Failed | BridgeStatus::Refunded => {
                    analytics.failed_transactions += 1
                }
                _ => {}
            }
            analytics.total_volume += tx.source_amount;
            analytics.total_fees += tx.bridge_fee;
        }
        analytics.success_rate =
            success_rate(analytics.successful_transactions, analytics.total_transactions);
        analytics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub active: bool,
    pub total_transactions: u64,
    pub success_rate: f64,
    pub uptime_secs: u64,
}

impl HealthReport {
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    total_duration_ms: u64,
    total_volume: u128,
}

/// Records terminal outcomes and answers health queries
pub struct MonitoringAggregator {
    counters: RwLock<Counters>,
    active: AtomicBool,
    /// When the current collection window opened
    window_started: RwLock<Option<Instant>>,
}

impl MonitoringAggregator {
    /// Create a stopped aggregator
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            active: AtomicBool::new(false),
            window_started: RwLock::new(None),
        }
    }

    /// Open the collection window. Counters carry over from earlier windows.
    pub async fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            *self.window_started.write().await = Some(Instant::now());
            info!("Monitoring started");
        }
    }

    /// Close the collection window
    pub async fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            *self.window_started.write().await = None;
            info!("Monitoring stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Count one terminal outcome. Ignored while the aggregator is stopped.
    pub async fn record_transaction(&self, success: bool, duration_ms: u64, volume: u128) {
        if !self.is_active() {
            debug!("Monitoring stopped, dropping outcome record");
            return;
        }

        let mut counters = self.counters.write().await;
        counters.total += 1;
        if success {
            counters.successful += 1;
        } else {
            counters.failed += 1;
        }
        counters.total_duration_ms = counters.total_duration_ms.saturating_add(duration_ms);
        counters.total_volume = counters.total_volume.saturating_add(volume);

        metrics::record_latency(success, duration_ms as f64 / 1000.0);
    }

    pub async fn metrics(&self) -> MonitoringSnapshot {
        let counters = self.counters.read().await;
        MonitoringSnapshot {
            total_transactions: counters.total,
            successful_transactions: counters.successful,
            failed_transactions: counters.failed,
            total_duration_ms: counters.total_duration_ms,
            total_volume: counters.total_volume,
            average_duration_ms: counters
                .total_duration_ms
                .checked_div(counters.total)
                .unwrap_or(0),
            success_rate: success_rate(counters.successful, counters.total),
        }
    }

    /// Aggregate `records` over the window ending now
    pub fn analytics(&self, range: TimeRange, records: &[BridgeTransaction]) -> Analytics {
        Analytics::from_records(records, range.cutoff(Utc::now()))
    }

    pub async fn health(&self) -> HealthReport {
        let snapshot = self.metrics().await;
        let active = self.is_active();
        let uptime_secs = self
            .window_started
            .read()
            .await
            .map(|started| started.elapsed().as_secs())
            .unwrap_or(0);

        let status = if !active {
            HealthStatus::Degraded
        } else if snapshot.total_transactions == 0 || snapshot.success_rate >= 0.95 {
            HealthStatus::Healthy
        } else if snapshot.success_rate >= 0.80 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            active,
            total_transactions: snapshot.total_transactions,
            success_rate: snapshot.success_rate,
            uptime_secs,
        }
    }

    /// Log a summary every `every` until the aggregator is stopped
    pub fn spawn_reporter(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if !self.is_active() {
                    break;
                }

                let snapshot = self.metrics().await;
                info!(
                    total = snapshot.total_transactions,
                    successful = snapshot.successful_transactions,
                    failed = snapshot.failed_transactions,
                    avg_ms = snapshot.average_duration_ms,
                    "Bridge activity summary"
                );
            }
            debug!("Monitoring reporter exited");
        })
    }
}

impl Default for MonitoringAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::sample_transaction;

    fn historical(id: &str, status: BridgeStatus, volume: u128, fee: u128) -> BridgeTransaction {
        let mut tx = sample_transaction(id);
        tx.status = status;
        tx.source_amount = volume;
        tx.bridge_fee = fee;
        tx
    }

    #[test]
    fn test_daily_analytics_over_fixed_history() {
        let records = vec![
            historical("a", BridgeStatus::Completed, 1000, 10),
            historical("b", BridgeStatus::Completed, 2000, 20),
            historical("c", BridgeStatus::Failed, 500, 5),
        ];

        let aggregator = MonitoringAggregator::new();
        let analytics = aggregator.analytics(TimeRange::Day, &records);

        assert_eq!(analytics.total_transactions, 3);
        assert_eq!(analytics.successful_transactions, 2);
        assert_eq!(analytics.failed_transactions, 1);
        assert!((analytics.success_rate - 0.667).abs() < 0.001);
        assert_eq!(analytics.total_volume, 3500);
        assert_eq!(analytics.total_fees, 35);
    }

    #[test]
    fn test_analytics_window_excludes_old_records() {
        let mut old = historical("old", BridgeStatus::Completed, 1000, 10);
        old.created_at = Utc::now() - ChronoDuration::days(3);
        let records = vec![old, historical("new", BridgeStatus::Failed, 500, 5)];

        let day = Analytics::from_records(&records, TimeRange::Day.cutoff(Utc::now()));
        assert_eq!(day.total_transactions, 1);
        assert_eq!(day.success_rate, 0.0);

        let week = Analytics::from_records(&records, TimeRange::Week.cutoff(Utc::now()));
        assert_eq!(week.total_transactions, 2);
    }

    #[test]
    fn test_empty_analytics_has_zero_success_rate() {
        let analytics = Analytics::from_records(&[], TimeRange::Month.cutoff(Utc::now()));
        assert_eq!(analytics, Analytics::default());
        assert_eq!("WEEK".parse::<TimeRange>().unwrap(), TimeRange::Week);
    }

    #[tokio::test]
    async fn test_metrics_persist_across_stop_and_start() {
        let aggregator = MonitoringAggregator::new();
        aggregator.record_transaction(true, 100, 1_000).await;
        assert_eq!(aggregator.metrics().await.total_transactions, 0);

        aggregator.start().await;
        aggregator.record_transaction(true, 100, 1_000).await;
        aggregator.record_transaction(false, 300, 500).await;
        aggregator.stop().await;
        aggregator.start().await;

        let snapshot = aggregator.metrics().await;
        assert_eq!(snapshot.total_transactions, 2);
        assert_eq!(snapshot.successful_transactions, 1);
        assert_eq!(snapshot.failed_transactions, 1);
        assert_eq!(snapshot.average_duration_ms, 200);
        assert_eq!(snapshot.total_volume, 1_500);
        assert!((snapshot.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_health_degrades_with_failures() {
        let aggregator = MonitoringAggregator::new();
        assert_eq!(aggregator.health().await.status, HealthStatus::Degraded);

        aggregator.start().await;
        assert_eq!(aggregator.health().await.status, HealthStatus::Healthy);

        aggregator.record_transaction(false, 10, 1).await;
        let report = aggregator.health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_serving());
    }

    #[tokio::test]
    async fn test_reporter_exits_after_stop() {
        let aggregator = Arc::new(MonitoringAggregator::new());
        aggregator.start().await;
        let handle = aggregator.clone().spawn_reporter(Duration::from_millis(10));

        aggregator.stop().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reporter should exit")
            .unwrap();
    }
}
