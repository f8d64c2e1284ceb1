//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Bridge transaction outcomes and latency
//! - Validator consensus rounds
//! - Reservable pool liquidity
//! - Live subscriber counts

use crate::error::{BridgeError, BridgeResult};
use crate::liquidity::PoolKey;
use crate::monitoring::MonitoringAggregator;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_INITIATED: CounterVec = register_counter_vec!(
        "bridge_transactions_initiated_total",
        "Total bridge transactions initiated",
        &["source_chain", "destination_chain"]
    ).unwrap();

    pub static ref TX_COMPLETED: CounterVec = register_counter_vec!(
        "bridge_transactions_completed_total",
        "Total bridge transactions completed",
        &["destination_chain"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "bridge_transactions_failed_total",
        "Total bridge transactions failed or refunded",
        &["destination_chain"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_transaction_latency_seconds",
        "Time from initiation to terminal status",
        &["outcome"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    // Consensus metrics
    pub static ref CONSENSUS_ROUNDS: CounterVec = register_counter_vec!(
        "bridge_consensus_rounds_total",
        "Validator consensus rounds by outcome",
        &["outcome"]
    ).unwrap();

    // Liquidity metrics
    pub static ref POOL_RESERVABLE: GaugeVec = register_gauge_vec!(
        "bridge_pool_reservable",
        "Reservable liquidity per pool",
        &["pool"]
    ).unwrap();

    // Subscription metrics
    pub static ref SUBSCRIBERS: Gauge = register_gauge!(
        "bridge_subscribers",
        "Live status subscriptions"
    ).unwrap();
}

/// Prometheus and health exposition server
pub struct MetricsServer {
    port: u16,
    monitoring: Arc<MonitoringAggregator>,
}

impl MetricsServer {
    pub fn new(port: u16, monitoring: Arc<MonitoringAggregator>) -> Self {
        Self { port, monitoring }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.monitoring.clone())
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| BridgeError::Internal(format!("Metrics server error: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    (
        StatusCode::OK,
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}

async fn health_handler(State(monitoring): State<Arc<MonitoringAggregator>>) -> impl IntoResponse {
    let report = monitoring.health().await;
    let status = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

// Helper functions to record metrics

pub fn record_initiated(source_chain: u64, destination_chain: u64) {
    TX_INITIATED
        .with_label_values(&[&source_chain.to_string(), &destination_chain.to_string()])
        .inc();
}

pub fn record_completed(destination_chain: u64) {
    TX_COMPLETED
        .with_label_values(&[&destination_chain.to_string()])
        .inc();
}

pub fn record_failed(destination_chain: u64) {
    TX_FAILED
        .with_label_values(&[&destination_chain.to_string()])
        .inc();
}

pub fn record_latency(success: bool, latency_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    TX_LATENCY.with_label_values(&[outcome]).observe(latency_secs);
}

pub fn record_consensus_round(reached: bool) {
    let outcome = if reached { "reached" } else { "not_reached" };
    CONSENSUS_ROUNDS.with_label_values(&[outcome]).inc();
}

pub fn record_pool_reservable(pool: &PoolKey, reservable: u128) {
    POOL_RESERVABLE
        .with_label_values(&[&pool.to_string()])
        .set(reservable as f64);
}

pub fn record_subscribers(count: usize) {
    SUBSCRIBERS.set(count as f64);
}
