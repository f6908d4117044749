//! Transaction signing capability

use crate::error::{SchedulerError, SchedulerResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256};

/// A signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: H256,
}

/// Signs transactions on behalf of one account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_transaction(&self, tx: &TypedTransaction) -> SchedulerResult<SignedTx>;
}

/// Signer backed by an in-process private key
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Load the key from the named environment variable
    pub fn from_env(var: &str) -> SchedulerResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| SchedulerError::Signing(format!("{} is not set", var)))?;

        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| SchedulerError::Signing(format!("Invalid private key: {}", e)))?;

        Ok(Self::new(wallet))
    }
}

#[async_trait]
impl TxSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> SchedulerResult<SignedTx> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SchedulerError::Signing(e.to_string()))?;

        Ok(SignedTx {
            raw: tx.rlp_signed(&signature),
            hash: tx.hash(&signature),
        })
    }
}
