//! Waits for a transaction receipt with timeout

use super::normalize::Receipt;
use crate::chain::RpcTransport;
use crate::error::{SchedulerError, SchedulerResult};

use ethers::types::H256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Polls the node for a receipt until it appears or the timeout elapses
#[derive(Clone)]
pub struct ReceiptWaiter {
    transport: Arc<dyn RpcTransport>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(transport: Arc<dyn RpcTransport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    /// Wait for the receipt of `tx_hash`, normalized
    pub async fn wait(&self, tx_hash: H256, max_wait: Duration) -> SchedulerResult<Receipt> {
        let started = Instant::now();

        let receipt = timeout(max_wait, self.poll(tx_hash))
            .await
            .map_err(|_| SchedulerError::ReceiptTimeout {
                tx_hash,
                timeout: max_wait,
            })??;

        crate::metrics::record_receipt_latency(started.elapsed().as_secs_f64());
        debug!(
            tx_hash = ?tx_hash,
            block = receipt.block_number,
            status = receipt.status,
            "Received receipt"
        );
        Ok(receipt)
    }

    async fn poll(&self, tx_hash: H256) -> SchedulerResult<Receipt> {
        loop {
            match self.transport.get_transaction_receipt(tx_hash).await {
                Ok(Some(raw)) => return Receipt::from_raw(&raw),
                Ok(None) => {}
                Err(e) if e.is_node_rejection() => return Err(e.into()),
                Err(e) => {
                    // Connection hiccups are retried until the deadline
                    warn!(tx_hash = ?tx_hash, error = %e, "Error checking receipt");
                }
            }

            sleep(self.poll_interval).await;
        }
    }
}
