//! EVM Transaction Scheduler - nonce-ordered submission for one signing account
//!
//! Keeps strict nonce ordering under concurrent senders, bounds the number of
//! unconfirmed transactions in flight, repairs stuck nonces in the background
//! and turns receipts back into typed results.

pub mod chain;
pub mod config;
pub mod contract;
pub mod error;
pub mod metrics;
pub mod receipt;
pub mod tx;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{Account, BlockFees, BlockTag, RpcTransport, SignedTx, TxSigner};
pub use config::{SchedulerConfig, Settings, TxDefaults, TxOverrides};
pub use contract::{
    ContractCall, DecodedEvent, ErrorMapper, EventDecoder, Outcome, Selector, TypedOperation,
};
pub use error::{SchedulerError, SchedulerResult, TransportError};
pub use receipt::{normalize, Receipt, ReceiptLog};
pub use tx::{NonceScheduler, Submission, TxStatus};
