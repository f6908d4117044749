//! Nonce management for a single signing account
//!
//! Handles:
//! - Local nonce tracking with a bounded pending window
//! - Release of nonces that never reached the node
//! - Per-nonce transaction records for the stuck monitor

use crate::error::{SchedulerError, SchedulerResult};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::{Bytes, H256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifecycle of a nonce once it has been handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Sent,
    StuckDetected,
    Replaced,
    Confirmed,
}

/// A transaction occupying a nonce slot
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    pub nonce: u64,
    pub tx_hash: H256,
    pub raw: Bytes,
    pub submitted_at: DateTime<Utc>,
    pub status: TxStatus,
}

/// Nonce counters. `last_confirmed <= last_sent` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NonceState {
    /// Confirmed transaction count ("latest" nonce)
    pub last_confirmed: u64,
    /// Next nonce to hand out
    pub last_sent: u64,
    pub chain_id: Option<u64>,
}

impl NonceState {
    pub fn pending_count(&self) -> u64 {
        self.last_sent - self.last_confirmed
    }
}

/// A nonce handed out for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub nonce: u64,
    pub chain_id: u64,
    /// Re-uses an already sent nonce instead of allocating a new one
    pub replacement: bool,
}

/// Shared nonce state of one account
#[derive(Debug, Default)]
pub struct NonceLane {
    state: Mutex<NonceState>,
    /// Pending transactions: nonce -> record
    pending: DashMap<u64, PendingTransaction>,
}

impl NonceLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the counters from the confirmed on-chain count
    pub async fn init(&self, confirmed: u64, chain_id: u64) {
        let mut state = self.state.lock().await;
        state.last_confirmed = confirmed;
        state.last_sent = confirmed;
        state.chain_id = Some(chain_id);
        self.pending.clear();

        debug!(nonce = confirmed, chain_id, "Initialized nonce lane");
    }

    pub async fn snapshot(&self) -> NonceState {
        *self.state.lock().await
    }

    pub async fn pending_count(&self) -> u64 {
        self.state.lock().await.pending_count()
    }

    /// Allocate the next nonce unless `window` transactions are already
    /// unconfirmed. Check and increment happen under one lock.
    pub async fn reserve(&self, window: u64) -> SchedulerResult<Reservation> {
        let mut state = self.state.lock().await;
        let chain_id = state.chain_id.ok_or(SchedulerError::NotStarted)?;

        let pending = state.pending_count();
        if pending >= window {
            return Err(SchedulerError::ResourceExhausted { pending, window });
        }

        let nonce = state.last_sent;
        state.last_sent += 1;

        debug!(nonce, pending = pending + 1, "Allocated nonce");
        Ok(Reservation {
            nonce,
            chain_id,
            replacement: false,
        })
    }

    /// Validate an explicit same-nonce replacement
    pub async fn reserve_existing(&self, nonce: u64) -> SchedulerResult<Reservation> {
        let state = self.state.lock().await;
        let chain_id = state.chain_id.ok_or(SchedulerError::NotStarted)?;

        if nonce < state.last_confirmed || nonce >= state.last_sent {
            return Err(SchedulerError::InvalidNonceOverride {
                nonce,
                confirmed: state.last_confirmed,
                sent: state.last_sent,
            });
        }

        Ok(Reservation {
            nonce,
            chain_id,
            replacement: true,
        })
    }

    /// Return a nonce that never reached the node. Only the most recently
    /// allocated nonce can be handed back; anything lower stays a gap.
    pub async fn release(&self, nonce: u64) -> bool {
        let mut state = self.state.lock().await;

        if state.last_sent == nonce + 1 && nonce >= state.last_confirmed {
            state.last_sent = nonce;
            debug!(nonce, "Released nonce");
            true
        } else {
            warn!(
                nonce,
                last_sent = state.last_sent,
                "Cannot release nonce, leaving gap for the stuck monitor"
            );
            false
        }
    }

    /// Record a broadcast transaction for its nonce
    pub fn record_sent(&self, nonce: u64, tx_hash: H256, raw: Bytes) {
        self.pending.insert(
            nonce,
            PendingTransaction {
                nonce,
                tx_hash,
                raw,
                submitted_at: Utc::now(),
                status: TxStatus::Sent,
            },
        );
    }

    pub fn mark_stuck(&self, nonce: u64) {
        if let Some(mut record) = self.pending.get_mut(&nonce) {
            if record.status == TxStatus::Sent {
                record.status = TxStatus::StuckDetected;
            }
        }
    }

    /// Record that the slot was taken over by a replacement transaction
    pub fn record_replacement(&self, nonce: u64, tx_hash: H256, raw: Bytes) {
        self.pending.insert(
            nonce,
            PendingTransaction {
                nonce,
                tx_hash,
                raw,
                submitted_at: Utc::now(),
                status: TxStatus::Replaced,
            },
        );
    }

    pub fn transaction(&self, nonce: u64) -> Option<PendingTransaction> {
        self.pending.get(&nonce).map(|r| r.value().clone())
    }

    /// A receipt was observed for `nonce`: everything below it is mined too
    pub async fn confirm(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        let confirmed = (nonce + 1).min(state.last_sent);

        if confirmed > state.last_confirmed {
            state.last_confirmed = confirmed;
        }
        drop(state);

        self.drop_confirmed_below(confirmed);
    }

    /// Apply a polled "latest" transaction count
    pub async fn observe_latest(&self, latest: u64) -> u64 {
        let mut state = self.state.lock().await;

        if latest > state.last_sent {
            warn!(
                latest,
                last_sent = state.last_sent,
                "Account nonce advanced beyond local state, transactions were sent elsewhere"
            );
            state.last_sent = latest;
        }
        if latest > state.last_confirmed {
            state.last_confirmed = latest;
        }
        let confirmed = state.last_confirmed;
        drop(state);

        self.drop_confirmed_below(confirmed);
        confirmed
    }

    /// Take over nonces below `pending` that were sent before this lane was
    /// seeded, e.g. by a previous run still sitting in the mempool. Returns
    /// how many were adopted.
    pub async fn adopt(&self, pending: u64) -> u64 {
        let mut state = self.state.lock().await;
        if pending <= state.last_sent {
            return 0;
        }

        let adopted = pending - state.last_sent;
        info!(
            from = state.last_sent,
            to = pending,
            "Adopting transactions already in the mempool"
        );
        state.last_sent = pending;
        adopted
    }

    fn drop_confirmed_below(&self, confirmed: u64) {
        let mined: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| *entry.key() < confirmed)
            .map(|entry| *entry.key())
            .collect();

        for nonce in mined {
            if let Some((_, record)) = self.pending.remove(&nonce) {
                if record.status == TxStatus::Sent {
                    debug!(nonce, tx_hash = ?record.tx_hash, "Nonce confirmed");
                } else {
                    info!(
                        nonce,
                        tx_hash = ?record.tx_hash,
                        previous = ?record.status,
                        "Nonce confirmed after recovery"
                    );
                }
            }
        }
    }
}
