//! Stuck-transaction monitor
//!
//! Polls the account's "latest" and "pending" transaction counts. When both
//! stay below the locally assigned nonce for several consecutive ticks, the
//! lowest unmined nonce is evicted with a zero-value self-transfer paying an
//! escalating fee.

use super::broadcast::Broadcaster;
use super::gas::FeeBumper;
use super::nonce::NonceLane;
use crate::chain::{BlockTag, RpcTransport};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a single monitor tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing outstanding, or the node is making progress
    Idle,
    /// Nonce counts unchanged, not yet long enough to act
    Watching { nonce: u64, unchanged_ticks: u32 },
    Replaced {
        nonce: u64,
        attempt: u32,
        tx_hash: H256,
        max_fee_per_gas: U256,
    },
    /// The replacement broadcast failed; retried after the next stall period
    ReplacementFailed { nonce: u64, attempt: u32 },
    /// Attempt limit reached for this nonce
    GaveUp { nonce: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Replacement {
    nonce: u64,
    attempts: u32,
    exhausted: bool,
}

/// Background task guarding one account's nonce lane
pub struct StuckMonitor {
    account: Address,
    transport: Arc<dyn RpcTransport>,
    broadcaster: Broadcaster,
    lane: Arc<NonceLane>,
    bumper: FeeBumper,
    poll_interval: Duration,
    stuck_after_n_polls: u32,
    max_replacement_attempts: u32,
    replacement_gas_limit: u64,
    default_base_fee: U256,
    /// Last observed (latest, pending) pair
    last_observation: Option<(u64, u64)>,
    unchanged_ticks: u32,
    replacement: Option<Replacement>,
}

impl StuckMonitor {
    pub fn new(
        account: Address,
        transport: Arc<dyn RpcTransport>,
        broadcaster: Broadcaster,
        lane: Arc<NonceLane>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            account,
            transport,
            broadcaster,
            lane,
            bumper: FeeBumper::new(config.bump_multiplier)?,
            poll_interval: config.poll_interval(),
            stuck_after_n_polls: config.stuck_after_n_polls,
            max_replacement_attempts: config.max_replacement_attempts,
            replacement_gas_limit: config.replacement_gas_limit,
            default_base_fee: U256::from(config.default_base_fee),
            last_observation: None,
            unchanged_ticks: 0,
            replacement: None,
        })
    }

    /// Tick forever. Failures are logged; the loop only ends when the task
    /// is aborted.
    pub async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(
            account = ?self.account,
            poll_interval = ?self.poll_interval,
            stuck_after = self.stuck_after_n_polls,
            "Stuck monitor running"
        );

        loop {
            ticker.tick().await;

            match self.tick().await {
                Ok(outcome) => debug!(?outcome, "Stuck monitor tick"),
                Err(e) => warn!(error = %e, "Stuck monitor tick failed"),
            }
        }
    }

    /// Poll the node once and act on a stall
    pub async fn tick(&mut self) -> SchedulerResult<TickOutcome> {
        let (latest, pending) = futures::try_join!(
            self.transport
                .get_transaction_count(self.account, BlockTag::Latest),
            self.transport
                .get_transaction_count(self.account, BlockTag::Pending),
        )?;

        self.lane.observe_latest(latest).await;
        let state = self.lane.snapshot().await;
        let chain_id = state.chain_id.ok_or(SchedulerError::NotStarted)?;
        crate::metrics::record_pending(chain_id, state.pending_count());

        if let Some(replacement) = self.replacement {
            if latest > replacement.nonce {
                info!(
                    nonce = replacement.nonce,
                    attempts = replacement.attempts,
                    "Stuck nonce cleared"
                );
                self.replacement = None;
            }
        }

        let observation = (latest, pending);
        if latest >= state.last_sent || pending >= state.last_sent {
            self.last_observation = Some(observation);
            self.unchanged_ticks = 0;
            return Ok(TickOutcome::Idle);
        }

        if self.last_observation == Some(observation) {
            self.unchanged_ticks += 1;
        } else {
            self.last_observation = Some(observation);
            self.unchanged_ticks = 1;
        }

        if self.unchanged_ticks < self.stuck_after_n_polls {
            return Ok(TickOutcome::Watching {
                nonce: latest,
                unchanged_ticks: self.unchanged_ticks,
            });
        }

        // Another full stall period must pass before the next attempt
        self.unchanged_ticks = 0;
        self.replace(latest, chain_id).await
    }

    async fn replace(&mut self, nonce: u64, chain_id: u64) -> SchedulerResult<TickOutcome> {
        let attempt = match self.replacement {
            Some(r) if r.nonce == nonce && r.exhausted => {
                return Ok(TickOutcome::GaveUp { nonce });
            }
            Some(r) if r.nonce == nonce => r.attempts + 1,
            _ => 1,
        };

        if attempt > self.max_replacement_attempts {
            let attempts = attempt - 1;
            let err = SchedulerError::StuckNonceReplacement { nonce, attempts };
            error!(nonce, attempts, error = %err, "Giving up on stuck nonce");
            crate::metrics::record_replacement(chain_id, "exhausted");

            self.replacement = Some(Replacement {
                nonce,
                attempts,
                exhausted: true,
            });
            return Ok(TickOutcome::GaveUp { nonce });
        }

        let base_fee = self
            .transport
            .get_block(BlockTag::Latest)
            .await?
            .base_fee_per_gas
            .unwrap_or(self.default_base_fee);
        let fees = self.bumper.replacement_fees(base_fee, attempt);

        self.lane.mark_stuck(nonce);
        self.replacement = Some(Replacement {
            nonce,
            attempts: attempt,
            exhausted: false,
        });

        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.account)
            .to(self.account)
            .value(U256::zero())
            .gas(self.replacement_gas_limit)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(chain_id)
            .into();

        warn!(
            nonce,
            attempt,
            max_fee_per_gas = %fees.max_fee_per_gas,
            "Replacing stuck nonce with self-transfer"
        );

        match self.broadcaster.broadcast(&tx, None).await {
            Ok(signed) => {
                self.lane.record_replacement(nonce, signed.hash, signed.raw);
                crate::metrics::record_replacement(chain_id, "sent");

                Ok(TickOutcome::Replaced {
                    nonce,
                    attempt,
                    tx_hash: signed.hash,
                    max_fee_per_gas: fees.max_fee_per_gas,
                })
            }
            Err(e) => {
                warn!(nonce, attempt, error = %e, "Replacement broadcast failed");
                crate::metrics::record_replacement(chain_id, "failed");

                Ok(TickOutcome::ReplacementFailed { nonce, attempt })
            }
        }
    }
}
