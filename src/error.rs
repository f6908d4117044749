//! Error types for the transaction scheduler

use crate::contract::errors::{ContractRevert, Selector};

use ethers::types::{Bytes, H256};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an RPC transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The node answered with a JSON-RPC error object
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Revert data carried by a JSON-RPC error, if any
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            TransportError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Leading 4 bytes of the revert data
    pub fn revert_selector(&self) -> Option<Selector> {
        self.revert_data()
            .and_then(|data| Selector::from_revert_data(data))
    }

    /// The node does not implement the requested method
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, TransportError::Rpc { code: -32601, .. })
    }

    /// Whether the node itself rejected the request (as opposed to the request
    /// never reaching it, or the reply getting lost)
    pub fn is_node_rejection(&self) -> bool {
        matches!(self, TransportError::Rpc { .. })
    }
}

/// Main error type for the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Pending window full: {pending}/{window} transactions unconfirmed")]
    ResourceExhausted { pending: u64, window: u64 },

    #[error("Broadcast failed: {0}")]
    Broadcast(#[source] TransportError),

    #[error(transparent)]
    Contract(#[from] ContractRevert),

    #[error("Timed out after {timeout:?} waiting for receipt of {tx_hash:?}")]
    ReceiptTimeout { tx_hash: H256, timeout: Duration },

    #[error("Transaction reverted in block {block_number}: {call}")]
    ContractReverted {
        tx_hash: H256,
        block_number: u64,
        /// Formatted call, tagged with the transaction hash
        call: String,
    },

    #[error("Transaction has not been sent; call send() first")]
    UnsentTransaction,

    #[error("Scheduler not started")]
    NotStarted,

    #[error("Replacement of stuck nonce {nonce} failed after {attempts} attempts")]
    StuckNonceReplacement { nonce: u64, attempts: u32 },

    #[error("Nonce override {nonce} outside replaceable range [{confirmed}, {sent})")]
    InvalidNonceOverride { nonce: u64, confirmed: u64, sent: u64 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::ResourceExhausted { .. } | SchedulerError::ReceiptTimeout { .. } => true,
            SchedulerError::Transport(e) => !e.is_node_rejection(),
            _ => false,
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
