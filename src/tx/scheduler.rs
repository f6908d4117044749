//! Nonce scheduler for a single signing account
//!
//! Owns the account's nonce counters and the bounded pending window, builds
//! and broadcasts transactions for typed operations, and runs the stuck
//! monitor in the background while started.

use super::broadcast::{nonce_unused, Broadcaster};
use super::monitor::StuckMonitor;
use super::nonce::{NonceLane, NonceState, PendingTransaction};
use crate::chain::{Account, BlockTag, RpcTransport, TxSigner};
use crate::config::{SchedulerConfig, TxDefaults, TxOverrides};
use crate::contract::{ContractCall, ErrorMapper, TypedOperation};
use crate::error::{SchedulerError, SchedulerResult};
use crate::receipt::{Receipt, ReceiptWaiter};

use ethers::abi::Token;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A transaction accepted by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub nonce: u64,
    pub tx_hash: H256,
}

/// Serializes nonce assignment for one account
pub struct NonceScheduler {
    account: Address,
    transport: Arc<dyn RpcTransport>,
    broadcaster: Broadcaster,
    waiter: ReceiptWaiter,
    lane: Arc<NonceLane>,
    config: SchedulerConfig,
    tx_defaults: TxDefaults,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl NonceScheduler {
    /// Create a scheduler bound to the signer's account
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn TxSigner>,
        config: SchedulerConfig,
        tx_defaults: TxDefaults,
        error_mapper: ErrorMapper,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        tx_defaults.validate()?;

        let account = signer.address();
        let waiter = ReceiptWaiter::new(transport.clone(), config.receipt_poll_interval());
        let broadcaster = Broadcaster::new(transport.clone(), signer, Arc::new(error_mapper));

        Ok(Self {
            account,
            transport,
            broadcaster,
            waiter,
            lane: Arc::new(NonceLane::new()),
            config,
            tx_defaults,
            monitor: Mutex::new(None),
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Seed the nonce counters from the node and start the stuck monitor
    pub async fn start(&self) -> SchedulerResult<Account> {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            warn!(account = ?self.account, "Scheduler already started");
            let state = self.lane.snapshot().await;
            return Ok(Account {
                address: self.account,
                chain_id: state.chain_id.unwrap_or_default(),
            });
        }

        let (confirmed, chain_id) = futures::try_join!(
            self.transport
                .get_transaction_count(self.account, BlockTag::Latest),
            self.transport.chain_id(),
        )?;

        self.lane.init(confirmed, chain_id).await;

        let stuck_monitor = StuckMonitor::new(
            self.account,
            self.transport.clone(),
            self.broadcaster.clone(),
            self.lane.clone(),
            &self.config,
        )?;
        *monitor = Some(tokio::spawn(stuck_monitor.run()));

        info!(
            account = ?self.account,
            chain_id,
            nonce = confirmed,
            window = self.config.max_pending_window,
            "Nonce scheduler started"
        );

        Ok(Account {
            address: self.account,
            chain_id,
        })
    }

    /// Cancel the stuck monitor. In-flight sends are left to finish.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(handle) = self.monitor.lock().await.take() else {
            debug!("Scheduler not running");
            return Ok(());
        };

        handle.abort();
        let _ = handle.await;

        match self
            .transport
            .get_transaction_count(self.account, BlockTag::Latest)
            .await
        {
            Ok(latest) => {
                self.lane.observe_latest(latest).await;
            }
            Err(e) => warn!(error = %e, "Failed to re-sync nonce on stop"),
        }

        let pending = self.lane.pending_count().await;
        if pending > 0 {
            warn!(pending, "Scheduler stopped with unconfirmed transactions");
        }

        info!(account = ?self.account, "Nonce scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    /// Sent but unconfirmed transactions
    pub async fn get_pending_count(&self) -> u64 {
        self.lane.pending_count().await
    }

    pub async fn nonce_state(&self) -> NonceState {
        self.lane.snapshot().await
    }

    pub fn pending_transaction(&self, nonce: u64) -> Option<PendingTransaction> {
        self.lane.transaction(nonce)
    }

    /// Send `op` and return its transaction hash. The submission is recorded
    /// on `op`, so `op.retrieve()` can wait for it afterwards.
    pub async fn send<T, E>(&self, op: &mut TypedOperation<T, E>) -> SchedulerResult<H256> {
        let submission = self.submit(op.contract_call(), op.overrides()).await?;
        op.record_submission(submission);
        Ok(submission.tx_hash)
    }

    /// Take over transactions the node already holds in its mempool for this
    /// account, e.g. from a previous run. Their nonces count against the
    /// pending window, and the stuck monitor replaces them if the node drops
    /// them.
    pub async fn adopt_pending(&self) -> SchedulerResult<u64> {
        let pending = self
            .transport
            .get_transaction_count(self.account, BlockTag::Pending)
            .await?;

        let adopted = self.lane.adopt(pending).await;
        if let Some(chain_id) = self.lane.snapshot().await.chain_id {
            crate::metrics::record_pending(chain_id, self.lane.pending_count().await);
        }
        Ok(adopted)
    }

    /// Assign a nonce to `call`, sign and broadcast it
    pub async fn submit(
        &self,
        call: &ContractCall,
        overrides: &TxOverrides,
    ) -> SchedulerResult<Submission> {
        self.dispatch(call, overrides, false)
            .await
            .map(|(submission, _)| submission)
    }

    /// Like `submit`, but through the node's realtime endpoint. The receipt
    /// is returned when the node supports it.
    pub async fn submit_sync(
        &self,
        call: &ContractCall,
        overrides: &TxOverrides,
    ) -> SchedulerResult<(Submission, Option<Receipt>)> {
        self.dispatch(call, overrides, true).await
    }

    async fn dispatch(
        &self,
        call: &ContractCall,
        overrides: &TxOverrides,
        realtime: bool,
    ) -> SchedulerResult<(Submission, Option<Receipt>)> {
        let params = overrides.resolve(&self.tx_defaults)?;
        let data = call.calldata()?;

        let reservation = match overrides.nonce {
            Some(nonce) => self.lane.reserve_existing(nonce).await?,
            None => match self.lane.reserve(self.config.max_pending_window).await {
                Ok(reservation) => reservation,
                Err(SchedulerError::ResourceExhausted { pending, window }) => {
                    warn!(pending, window, call = %call, "Pending window full, rejecting send");
                    if let Some(chain_id) = self.lane.snapshot().await.chain_id {
                        crate::metrics::record_window_rejection(chain_id);
                    }
                    return Err(SchedulerError::ResourceExhausted { pending, window });
                }
                Err(e) => return Err(e),
            },
        };
        let nonce = reservation.nonce;

        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.account)
            .to(call.address())
            .data(data)
            .value(params.value)
            .gas(params.gas)
            .max_fee_per_gas(params.max_fee_per_gas)
            .max_priority_fee_per_gas(params.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(reservation.chain_id)
            .into();

        let result = if realtime {
            self.broadcaster.broadcast_sync(&tx, Some(call)).await
        } else {
            self.broadcaster
                .broadcast(&tx, Some(call))
                .await
                .map(|signed| (signed, None))
        };

        match result {
            Ok((signed, receipt)) => {
                self.lane.record_sent(nonce, signed.hash, signed.raw);

                crate::metrics::record_tx_submitted(reservation.chain_id);
                crate::metrics::record_pending(
                    reservation.chain_id,
                    self.lane.pending_count().await,
                );
                info!(
                    nonce,
                    tx_hash = ?signed.hash,
                    replacement = reservation.replacement,
                    mined = receipt.is_some(),
                    call = %call,
                    "Transaction sent"
                );

                let submission = Submission {
                    nonce,
                    tx_hash: signed.hash,
                };
                Ok((submission, receipt))
            }
            Err(e) => {
                crate::metrics::record_broadcast_failure(reservation.chain_id);
                if !reservation.replacement && nonce_unused(&e) {
                    self.lane.release(nonce).await;
                }
                Err(e)
            }
        }
    }

    /// Execute `call` read-only and decode its return values
    pub async fn call(&self, call: &ContractCall) -> SchedulerResult<Vec<Token>> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.account)
            .to(call.address())
            .data(call.calldata()?)
            .into();

        let output = self.transport.call(&tx).await.map_err(|e| {
            self.broadcaster
                .error_mapper()
                .map(e, call, SchedulerError::Transport)
        })?;

        call.decode_output(&output)
    }

    /// Wait for a receipt using the configured timeout
    pub async fn wait_for_receipt(&self, tx_hash: H256) -> SchedulerResult<Receipt> {
        self.waiter
            .wait(tx_hash, self.config.receipt_timeout())
            .await
    }

    /// Record that the transaction at `nonce` has been mined
    pub async fn confirm(&self, nonce: u64) {
        self.lane.confirm(nonce).await;
    }
}
