//! Ethers HTTP transport with multi-RPC support and automatic failover

use super::{BlockFees, BlockTag, RpcTransport};
use crate::error::TransportError;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, H256, U256};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-endpoint HTTP transport
pub struct HttpTransport {
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl HttpTransport {
    /// Create a transport over the given RPC endpoints
    pub fn new(rpc_urls: &[String]) -> Result<Self, TransportError> {
        let mut http_providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!(url = %url, "Added HTTP provider");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to create provider");
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TransportError::Connection(
                "No valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(provider = next, "RPC failover");
    }

    /// Retry an idempotent read across all providers. Node rejections are
    /// returned immediately; only connection-level failures trigger failover.
    async fn read_with_failover<T, F, Fut>(&self, op: F) -> Result<T, TransportError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = map_provider_error(e);
                    if err.is_node_rejection() {
                        return Err(err);
                    }
                    warn!(error = %err, "RPC read failed");
                    last_error = Some(err);
                    self.failover();
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::Connection("All providers failed".to_string())))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, TransportError> {
        let count = self
            .read_with_failover(|provider| async move {
                provider
                    .get_transaction_count(address, Some(BlockId::Number(tag.into())))
                    .await
            })
            .await?;

        to_u64(count, "transaction count")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, TransportError> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(map_provider_error)?;

        Ok(*pending)
    }

    async fn send_raw_transaction_sync(&self, raw: Bytes) -> Result<Value, TransportError> {
        self.http()
            .request::<_, Value>("realtime_sendRawTransaction", [raw])
            .await
            .map_err(map_provider_error)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, TransportError> {
        self.read_with_failover(|provider| async move { provider.call(tx, None).await })
            .await
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<Value>, TransportError> {
        self.read_with_failover(|provider| async move {
            provider
                .request::<_, Option<Value>>("eth_getTransactionReceipt", [hash])
                .await
        })
        .await
    }

    async fn get_block(&self, tag: BlockTag) -> Result<BlockFees, TransportError> {
        let block = self
            .read_with_failover(|provider| async move {
                provider.get_block(BlockId::Number(tag.into())).await
            })
            .await?
            .ok_or_else(|| TransportError::Malformed(format!("No {:?} block", tag)))?;

        Ok(BlockFees {
            number: block.number.map(|n| n.as_u64()),
            base_fee_per_gas: block.base_fee_per_gas,
        })
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        let chain_id = self
            .read_with_failover(|provider| async move { provider.get_chainid().await })
            .await?;

        to_u64(chain_id, "chain id")
    }
}

fn to_u64(value: U256, what: &str) -> Result<u64, TransportError> {
    if value > U256::from(u64::MAX) {
        return Err(TransportError::Malformed(format!(
            "{} {} does not fit in 64 bits",
            what, value
        )));
    }
    Ok(value.as_u64())
}

/// Translate an ethers provider error, keeping JSON-RPC error objects intact
fn map_provider_error(err: ProviderError) -> TransportError {
    if let Some(resp) = err.as_error_response() {
        let data = resp
            .data
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Bytes>().ok());

        return TransportError::Rpc {
            code: resp.code,
            message: resp.message.clone(),
            data,
        };
    }

    match err {
        ProviderError::SerdeJson(e) => TransportError::Malformed(e.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}
