//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submission and broadcast failures
//! - Pending-window pressure
//! - Stuck-nonce replacements
//! - Receipt wait latency

use crate::error::{SchedulerError, SchedulerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, CounterVec, Encoder, GaugeVec,
    Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "evm_tx_scheduler_transactions_submitted_total",
        "Total transactions accepted by the node",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_BROADCAST_FAILED: CounterVec = register_counter_vec!(
        "evm_tx_scheduler_broadcast_failures_total",
        "Total raw transaction broadcasts rejected or lost",
        &["chain_id"]
    ).unwrap();

    pub static ref WINDOW_REJECTIONS: CounterVec = register_counter_vec!(
        "evm_tx_scheduler_window_rejections_total",
        "Total sends rejected because the pending window was full",
        &["chain_id"]
    ).unwrap();

    pub static ref PENDING_TRANSACTIONS: GaugeVec = register_gauge_vec!(
        "evm_tx_scheduler_pending_transactions",
        "Sent but unconfirmed transactions",
        &["chain_id"]
    ).unwrap();

    pub static ref STUCK_REPLACEMENTS: CounterVec = register_counter_vec!(
        "evm_tx_scheduler_stuck_replacements_total",
        "Stuck-nonce replacement attempts by outcome",
        &["chain_id", "outcome"]
    ).unwrap();

    pub static ref RECEIPT_LATENCY: Histogram = register_histogram!(
        "evm_tx_scheduler_receipt_wait_seconds",
        "Time spent waiting for transaction receipts",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SchedulerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SchedulerError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SchedulerError::Config(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of all registered metrics
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

// Helper functions to record metrics

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_broadcast_failure(chain_id: u64) {
    TX_BROADCAST_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_window_rejection(chain_id: u64) {
    WINDOW_REJECTIONS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_pending(chain_id: u64, pending: u64) {
    PENDING_TRANSACTIONS
        .with_label_values(&[&chain_id.to_string()])
        .set(pending as f64);
}

pub fn record_replacement(chain_id: u64, outcome: &str) {
    STUCK_REPLACEMENTS
        .with_label_values(&[&chain_id.to_string(), outcome])
        .inc();
}

pub fn record_receipt_latency(latency_secs: f64) {
    RECEIPT_LATENCY.observe(latency_secs);
}
