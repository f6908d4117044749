//! In-memory node and signer used by scheduler, monitor and operation tests

use crate::chain::{BlockFees, BlockTag, RpcTransport, SignedTx, TxSigner};
use crate::error::{SchedulerError, SchedulerResult, TransportError};
use crate::receipt::ReceiptLog;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const CHAIN_ID: u64 = 31337;

#[derive(Default)]
struct NodeState {
    latest: u64,
    pending: u64,
    base_fee: Option<U256>,
    block_number: u64,
    received: Vec<Bytes>,
    receipts: HashMap<H256, Value>,
    send_errors: VecDeque<TransportError>,
    call_result: Option<Result<Bytes, TransportError>>,
    auto_mine: Option<(u64, Vec<ReceiptLog>)>,
    realtime: bool,
}

/// Scriptable node: nonce counts, receipts and failures are set by the test
pub struct FakeNode {
    state: Mutex<NodeState>,
}

impl FakeNode {
    pub fn new(confirmed: u64) -> Self {
        Self {
            state: Mutex::new(NodeState {
                latest: confirmed,
                pending: confirmed,
                block_number: 100,
                ..Default::default()
            }),
        }
    }

    pub fn set_nonces(&self, latest: u64, pending: u64) {
        let mut state = self.state.lock().unwrap();
        state.latest = latest;
        state.pending = pending;
    }

    pub fn set_base_fee(&self, base_fee: Option<U256>) {
        self.state.lock().unwrap().base_fee = base_fee;
    }

    pub fn fail_next_send(&self, err: TransportError) {
        self.state.lock().unwrap().send_errors.push_back(err);
    }

    pub fn set_call_result(&self, result: Result<Bytes, TransportError>) {
        self.state.lock().unwrap().call_result = Some(result);
    }

    /// Mine every accepted transaction immediately with `status` and `logs`
    pub fn auto_mine(&self, status: u64, logs: Vec<ReceiptLog>) {
        self.state.lock().unwrap().auto_mine = Some((status, logs));
    }

    /// Serve `realtime_sendRawTransaction`, mining each transaction on receipt
    pub fn enable_realtime(&self) {
        self.state.lock().unwrap().realtime = true;
    }

    pub fn mine(&self, hash: H256, status: u64, logs: &[ReceiptLog]) {
        let mut state = self.state.lock().unwrap();
        state.block_number += 1;
        let receipt = receipt_json(hash, state.block_number, status, logs);
        state.receipts.insert(hash, receipt);
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().received.clone()
    }
}

fn receipt_json(hash: H256, block_number: u64, status: u64, logs: &[ReceiptLog]) -> Value {
    json!({
        "transactionHash": format!("{:?}", hash),
        "blockHash": format!("{:?}", H256::from_low_u64_be(block_number)),
        "blockNumber": format!("{:#x}", block_number),
        "gasUsed": "0x5208",
        "status": format!("{:#x}", status),
        "type": "0x2",
        "logs": logs
            .iter()
            .map(|log| serde_json::to_value(log).unwrap())
            .collect::<Vec<_>>(),
    })
}

#[async_trait]
impl RpcTransport for FakeNode {
    async fn get_transaction_count(
        &self,
        _address: Address,
        tag: BlockTag,
    ) -> Result<u64, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(match tag {
            BlockTag::Latest => state.latest,
            BlockTag::Pending => state.pending,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }

        let hash = H256::from(ethers::utils::keccak256(raw.as_ref()));
        state.received.push(raw);

        if let Some((status, logs)) = state.auto_mine.clone() {
            state.block_number += 1;
            let receipt = receipt_json(hash, state.block_number, status, &logs);
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn send_raw_transaction_sync(&self, raw: Bytes) -> Result<Value, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.realtime {
            return Err(TransportError::Rpc {
                code: -32601,
                message: "method not found".to_string(),
                data: None,
            });
        }
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }

        let hash = H256::from(ethers::utils::keccak256(raw.as_ref()));
        state.received.push(raw);
        state.block_number += 1;

        let (status, logs) = state.auto_mine.clone().unwrap_or((1, Vec::new()));
        let receipt = receipt_json(hash, state.block_number, status, &logs);
        state.receipts.insert(hash, receipt.clone());
        Ok(receipt)
    }

    async fn call(&self, _tx: &TypedTransaction) -> Result<Bytes, TransportError> {
        self.state
            .lock()
            .unwrap()
            .call_result
            .clone()
            .unwrap_or_else(|| Ok(Bytes::default()))
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<Value>, TransportError> {
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn get_block(&self, _tag: BlockTag) -> Result<BlockFees, TransportError> {
        let state = self.state.lock().unwrap();
        Ok(BlockFees {
            number: Some(state.block_number),
            base_fee_per_gas: state.base_fee,
        })
    }

    async fn chain_id(&self) -> Result<u64, TransportError> {
        Ok(CHAIN_ID)
    }
}

/// Signer that keeps every transaction it signs. The "raw" bytes are the
/// unsigned RLP encoding, so the hash is unique per transaction content.
pub struct RecordingSigner {
    address: Address,
    signed: Mutex<Vec<TypedTransaction>>,
    fail: AtomicBool,
}

impl RecordingSigner {
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x5a),
            signed: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn signed(&self) -> Vec<TypedTransaction> {
        self.signed.lock().unwrap().clone()
    }

    pub fn fail_signing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TxSigner for RecordingSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> SchedulerResult<SignedTx> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Signing("key locked".to_string()));
        }

        let raw = tx.rlp();
        let hash = H256::from(ethers::utils::keccak256(raw.as_ref()));
        self.signed.lock().unwrap().push(tx.clone());
        Ok(SignedTx { raw, hash })
    }
}

/// Nonce of a recorded transaction
pub fn nonce_of(tx: &TypedTransaction) -> u64 {
    tx.nonce().map(|n| n.as_u64()).unwrap()
}

/// `(max_fee_per_gas, max_priority_fee_per_gas)` of an EIP-1559 transaction
pub fn fees_of(tx: &TypedTransaction) -> (U256, U256) {
    match tx {
        TypedTransaction::Eip1559(inner) => (
            inner.max_fee_per_gas.unwrap(),
            inner.max_priority_fee_per_gas.unwrap(),
        ),
        other => panic!("expected an EIP-1559 transaction, got {:?}", other),
    }
}
