//! Typed contract operations
//!
//! A `TypedOperation` couples a prepared contract call with optional
//! transaction overrides and an optional event binding. Reads go through
//! `call()`; writes go through `send()` and `retrieve()`.

use super::call::ContractCall;
use super::events::{DecodedEvent, EventBinding, EventDecoder};
use crate::config::TxOverrides;
use crate::error::{SchedulerError, SchedulerResult};
use crate::receipt::Receipt;
use crate::tx::{NonceScheduler, Submission};

use ethers::abi::{Detokenize, Event};
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::debug;

/// Result of a completed operation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    /// Decoded return value of a read
    Value(T),
    /// The bound event, decoded
    Event(E),
    /// Mined successfully, but the bound event was not emitted
    NoEvent,
    /// Mined successfully; no event was bound
    Mined(Receipt),
}

impl<T, E> Outcome<T, E> {
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn event(self) -> Option<E> {
        match self {
            Outcome::Event(e) => Some(e),
            _ => None,
        }
    }
}

/// A prepared contract call scheduled through a `NonceScheduler`
pub struct TypedOperation<T, E = DecodedEvent> {
    scheduler: Arc<NonceScheduler>,
    call: ContractCall,
    overrides: TxOverrides,
    binding: Option<EventBinding<E>>,
    result: Option<T>,
    submission: Option<Submission>,
}

impl<T> TypedOperation<T, DecodedEvent> {
    pub fn new(scheduler: Arc<NonceScheduler>, call: ContractCall) -> Self {
        Self {
            scheduler,
            call,
            overrides: TxOverrides::default(),
            binding: None,
            result: None,
            submission: None,
        }
    }

    /// Return the raw decoded arguments of `event` from `retrieve()`
    pub fn with_event(mut self, event: Event) -> Self {
        self.binding = Some(EventBinding::raw(event));
        self
    }
}

impl<T, E> TypedOperation<T, E> {
    /// Decode `event` with `decoder` in `retrieve()`
    pub fn with_event_decoder<D>(self, event: Event, decoder: D) -> TypedOperation<T, D::Output>
    where
        D: EventDecoder + 'static,
    {
        TypedOperation {
            scheduler: self.scheduler,
            call: self.call,
            overrides: self.overrides,
            binding: Some(EventBinding::new(event, decoder)),
            result: self.result,
            submission: self.submission,
        }
    }

    /// Only match the bound event when `address` emitted it
    pub fn with_event_emitter(mut self, address: Address) -> Self {
        self.binding = self.binding.map(|binding| binding.emitted_by(address));
        self
    }

    pub fn with_overrides(mut self, overrides: TxOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn contract_call(&self) -> &ContractCall {
        &self.call
    }

    pub fn overrides(&self) -> &TxOverrides {
        &self.overrides
    }

    pub fn tx_hash(&self) -> Option<H256> {
        self.submission.map(|s| s.tx_hash)
    }

    /// Submit the transaction without waiting for it to be mined
    pub async fn send(&mut self) -> SchedulerResult<H256> {
        let submission = self.scheduler.submit(&self.call, &self.overrides).await?;
        self.record_submission(submission);
        Ok(submission.tx_hash)
    }

    pub(crate) fn record_submission(&mut self, submission: Submission) {
        self.submission = Some(submission);
    }

    /// Wait for the sent transaction and extract the bound event
    async fn retrieve_mined(&self) -> SchedulerResult<Outcome<T, E>> {
        let submission = self.submission.ok_or(SchedulerError::UnsentTransaction)?;
        let receipt = self.scheduler.wait_for_receipt(submission.tx_hash).await?;
        self.complete(submission, receipt).await
    }

    async fn complete(
        &self,
        submission: Submission,
        receipt: Receipt,
    ) -> SchedulerResult<Outcome<T, E>> {
        // Mined, reverted or not, the nonce is used up
        self.scheduler.confirm(submission.nonce).await;

        if !receipt.is_success() {
            return Err(SchedulerError::ContractReverted {
                tx_hash: submission.tx_hash,
                block_number: receipt.block_number,
                call: self.call.describe(Some(submission.tx_hash)),
            });
        }

        match &self.binding {
            None => Ok(Outcome::Mined(receipt)),
            Some(binding) => match binding.extract(&receipt)? {
                Some(event) => Ok(Outcome::Event(event)),
                None => Ok(Outcome::NoEvent),
            },
        }
    }
}

impl<T: Clone, E> TypedOperation<T, E> {
    /// The cached `call()` result for a read, otherwise the outcome of the
    /// sent transaction
    pub async fn retrieve(&self) -> SchedulerResult<Outcome<T, E>> {
        if let Some(value) = &self.result {
            return Ok(Outcome::Value(value.clone()));
        }
        self.retrieve_mined().await
    }

    /// `send()` followed by `retrieve()`. With `realtime_send` configured the
    /// node returns the receipt with the submission.
    pub async fn send_wait(&mut self) -> SchedulerResult<Outcome<T, E>> {
        if !self.scheduler.config().realtime_send {
            self.send().await?;
            return self.retrieve_mined().await;
        }

        let (submission, receipt) = self
            .scheduler
            .submit_sync(&self.call, &self.overrides)
            .await?;
        self.record_submission(submission);

        match receipt {
            Some(receipt) => self.complete(submission, receipt).await,
            None => self.retrieve_mined().await,
        }
    }
}

impl<T: Detokenize + Clone, E> TypedOperation<T, E> {
    /// Execute read-only; consumes no nonce
    pub async fn call(&mut self) -> SchedulerResult<T> {
        let tokens = self.scheduler.call(&self.call).await?;
        let value = T::from_tokens(tokens).map_err(|e| {
            SchedulerError::Decode(format!("Cannot convert {} output: {}", self.call, e))
        })?;

        debug!(call = %self.call, "Read call completed");
        self.result = Some(value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, TxDefaults};
    use crate::contract::call::tests::transfer_call;
    use crate::contract::events::tests::{transfer_event, transfer_log};
    use crate::contract::ErrorMapper;
    use crate::receipt::ReceiptLog;
    use crate::testing::{FakeNode, RecordingSigner};
    use ethers::abi::Token;
    use ethers::types::{Bytes, U256};

    async fn started(node: Arc<FakeNode>) -> Arc<NonceScheduler> {
        started_with(node, false).await
    }

    async fn started_with(node: Arc<FakeNode>, realtime_send: bool) -> Arc<NonceScheduler> {
        let scheduler = Arc::new(
            NonceScheduler::new(
                node,
                Arc::new(RecordingSigner::new()),
                SchedulerConfig {
                    receipt_poll_interval_ms: 1,
                    realtime_send,
                    ..Default::default()
                },
                TxDefaults::default(),
                ErrorMapper::clob(),
            )
            .unwrap(),
        );
        scheduler.start().await.unwrap();
        scheduler
    }

    fn transfer_logs(value: u64) -> Vec<ReceiptLog> {
        vec![transfer_log(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            value,
        )]
    }

    #[tokio::test]
    async fn test_call_caches_result_for_retrieve() {
        let node = Arc::new(FakeNode::new(0));
        let scheduler = started(node.clone()).await;

        let mut word = vec![0u8; 32];
        word[31] = 1;
        node.set_call_result(Ok(Bytes::from(word)));

        let mut op: TypedOperation<bool> = TypedOperation::new(scheduler.clone(), transfer_call(1));
        assert!(op.call().await.unwrap());
        assert_eq!(op.retrieve().await.unwrap(), Outcome::Value(true));
        assert_eq!(scheduler.nonce_state().await.last_sent, 0);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_before_send_fails() {
        let scheduler = started(Arc::new(FakeNode::new(0))).await;
        let op: TypedOperation<bool> = TypedOperation::new(scheduler.clone(), transfer_call(1));

        assert!(matches!(
            op.retrieve().await,
            Err(SchedulerError::UnsentTransaction)
        ));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_wait_decodes_bound_event() {
        let node = Arc::new(FakeNode::new(4));
        node.auto_mine(1, transfer_logs(1000));
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(1000))
            .with_event_decoder(transfer_event(), |event: &DecodedEvent| {
                event
                    .arg("value")
                    .and_then(|t| t.clone().into_uint())
                    .ok_or_else(|| SchedulerError::Decode("missing value".to_string()))
            });

        let outcome = op.send_wait().await.unwrap();
        assert_eq!(outcome, Outcome::Event(U256::from(1000u64)));
        assert!(op.tx_hash().is_some());

        // The receipt confirms nonce 4
        let state = scheduler.nonce_state().await;
        assert_eq!(state.last_confirmed, 5);
        assert_eq!(scheduler.get_pending_count().await, 0);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_event_without_decoder() {
        let node = Arc::new(FakeNode::new(0));
        node.auto_mine(1, transfer_logs(7));
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(7))
            .with_event(transfer_event());
        let event = op.send_wait().await.unwrap().event().unwrap();

        assert_eq!(event.arg("value"), Some(&Token::Uint(U256::from(7u64))));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_event_is_not_an_error() {
        let node = Arc::new(FakeNode::new(0));
        node.auto_mine(1, Vec::new());
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(7))
            .with_event(transfer_event());
        assert_eq!(op.send_wait().await.unwrap(), Outcome::NoEvent);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbound_write_returns_receipt() {
        let node = Arc::new(FakeNode::new(0));
        node.auto_mine(1, Vec::new());
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(7));
        let hash = op.send().await.unwrap();

        match op.retrieve().await.unwrap() {
            Outcome::Mined(receipt) => {
                assert_eq!(receipt.transaction_hash, hash);
                assert!(receipt.is_success());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reverted_transaction() {
        let node = Arc::new(FakeNode::new(0));
        node.auto_mine(0, transfer_logs(7));
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(7))
            .with_event(transfer_event());
        let err = op.send_wait().await.unwrap_err();

        match err {
            SchedulerError::ContractReverted { tx_hash, call, .. } => {
                assert_eq!(Some(tx_hash), op.tx_hash());
                assert!(call.contains("transfer(to: 0xbbbb"));
                assert!(call.contains("amount: 7)"));
                assert!(call.contains(&format!("tx_hash: {:?}", tx_hash)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // A reverted transaction still consumed its nonce
        assert_eq!(scheduler.nonce_state().await.last_confirmed, 1);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_overrides_reach_the_transaction() {
        let node = Arc::new(FakeNode::new(0));
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(7))
            .with_overrides(TxOverrides::default().gas(50_000));
        op.send().await.unwrap();

        assert_eq!(op.overrides().gas, Some(50_000));
        assert_eq!(scheduler.get_pending_count().await, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_send_then_retrieve() {
        let node = Arc::new(FakeNode::new(9));
        node.auto_mine(1, transfer_logs(5));
        let scheduler = started(node).await;
        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(5))
            .with_event(transfer_event());

        let hash = scheduler.send(&mut op).await.unwrap();
        assert_eq!(scheduler.nonce_state().await.last_sent, 10);
        assert_eq!(op.tx_hash(), Some(hash));

        let event = op.retrieve().await.unwrap().event().unwrap();
        assert_eq!(event.arg("value"), Some(&Token::Uint(U256::from(5u64))));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_emitter_filter() {
        let node = Arc::new(FakeNode::new(0));
        node.auto_mine(1, transfer_logs(5));
        let scheduler = started(node).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(5))
            .with_event(transfer_event())
            .with_event_emitter(Address::repeat_byte(0x01));
        assert_eq!(op.send_wait().await.unwrap(), Outcome::NoEvent);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_realtime_send_wait_uses_returned_receipt() {
        let node = Arc::new(FakeNode::new(3));
        node.enable_realtime();
        node.auto_mine(1, transfer_logs(11));
        let scheduler = started_with(node.clone(), true).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(11))
            .with_event(transfer_event());
        let event = op.send_wait().await.unwrap().event().unwrap();

        assert_eq!(event.arg("value"), Some(&Token::Uint(U256::from(11u64))));
        assert_eq!(node.received().len(), 1);
        assert_eq!(scheduler.nonce_state().await.last_confirmed, 4);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_realtime_send_wait_falls_back_to_polling() {
        let node = Arc::new(FakeNode::new(3));
        node.auto_mine(1, Vec::new());
        let scheduler = started_with(node.clone(), true).await;

        let mut op = TypedOperation::<bool>::new(scheduler.clone(), transfer_call(11));
        match op.send_wait().await.unwrap() {
            Outcome::Mined(receipt) => assert_eq!(Some(receipt.transaction_hash), op.tx_hash()),
            other => panic!("unexpected outcome {:?}", other),
        }
        scheduler.stop().await.unwrap();
    }
}
