//! Chain module - the capabilities the scheduler consumes from the outside world
//!
//! This module provides:
//! - The `RpcTransport` trait every node connection implements
//! - The `TxSigner` trait for transaction signing
//! - An ethers HTTP transport with automatic failover
//! - A `LocalWallet` signer adapter

pub mod provider;
pub mod signer;

pub use provider::HttpTransport;
pub use signer::{SignedTx, TxSigner, WalletSigner};

use crate::error::TransportError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, H256, U256};
use serde_json::Value;

/// The signing account a scheduler is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub chain_id: u64,
}

/// Block tag used when querying account state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Pending,
}

impl From<BlockTag> for BlockNumber {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockNumber::Latest,
            BlockTag::Pending => BlockNumber::Pending,
        }
    }
}

/// Fee data of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFees {
    pub number: Option<u64>,
    pub base_fee_per_gas: Option<U256>,
}

/// JSON-RPC capabilities of a node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Number of transactions sent from `address` as of `tag`
    async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, TransportError>;

    /// Submit a signed raw transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, TransportError>;

    /// Submit a signed raw transaction and return its receipt once mined, in
    /// one round trip. Nodes without a realtime endpoint answer
    /// "method not found".
    async fn send_raw_transaction_sync(&self, raw: Bytes) -> Result<Value, TransportError> {
        let _ = raw;
        Err(TransportError::Rpc {
            code: -32601,
            message: "realtime_sendRawTransaction is not supported".to_string(),
            data: None,
        })
    }

    /// Execute a read-only call against the latest state
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, TransportError>;

    /// Raw receipt JSON, `None` while the transaction is unmined
    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<Value>, TransportError>;

    async fn get_block(&self, tag: BlockTag) -> Result<BlockFees, TransportError>;

    async fn chain_id(&self) -> Result<u64, TransportError>;
}
