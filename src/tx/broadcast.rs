//! Signing and submission of a single raw transaction

use crate::chain::{RpcTransport, SignedTx, TxSigner};
use crate::contract::{ContractCall, ErrorMapper};
use crate::error::{SchedulerError, SchedulerResult, TransportError};
use crate::receipt::Receipt;

use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::{debug, warn};

/// Signs a transaction and hands it to the node
#[derive(Clone)]
pub struct Broadcaster {
    transport: Arc<dyn RpcTransport>,
    signer: Arc<dyn TxSigner>,
    error_mapper: Arc<ErrorMapper>,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn TxSigner>,
        error_mapper: Arc<ErrorMapper>,
    ) -> Self {
        Self {
            transport,
            signer,
            error_mapper,
        }
    }

    pub fn error_mapper(&self) -> &ErrorMapper {
        &self.error_mapper
    }

    /// Sign and send `tx`. Reverts raised for `call` with a known selector
    /// come back as `SchedulerError::Contract`; other send errors as
    /// `SchedulerError::Broadcast`.
    pub async fn broadcast(
        &self,
        tx: &TypedTransaction,
        call: Option<&ContractCall>,
    ) -> SchedulerResult<SignedTx> {
        let signed = self.signer.sign_transaction(tx).await?;

        match self.transport.send_raw_transaction(signed.raw.clone()).await {
            Ok(hash) => {
                if hash != signed.hash {
                    warn!(
                        node_hash = ?hash,
                        local_hash = ?signed.hash,
                        "Node reported a different transaction hash"
                    );
                }
                debug!(tx_hash = ?signed.hash, nonce = ?tx.nonce(), "Transaction broadcast");
                Ok(signed)
            }
            Err(e) => Err(self.send_failed(tx, call, e)),
        }
    }

    /// Sign `tx` and send it through the node's realtime endpoint, which
    /// answers with the receipt. Nodes without that endpoint get a plain
    /// send, and no receipt is returned.
    pub async fn broadcast_sync(
        &self,
        tx: &TypedTransaction,
        call: Option<&ContractCall>,
    ) -> SchedulerResult<(SignedTx, Option<Receipt>)> {
        let signed = self.signer.sign_transaction(tx).await?;

        match self
            .transport
            .send_raw_transaction_sync(signed.raw.clone())
            .await
        {
            Ok(raw_receipt) => {
                let receipt = Receipt::from_raw(&raw_receipt)?;
                debug!(
                    tx_hash = ?receipt.transaction_hash,
                    block = receipt.block_number,
                    "Realtime transaction mined"
                );
                Ok((signed, Some(receipt)))
            }
            Err(e) if e.is_method_not_found() => {
                debug!(error = %e, "Realtime send unavailable, falling back to plain send");
                match self.transport.send_raw_transaction(signed.raw.clone()).await {
                    Ok(_) => Ok((signed, None)),
                    Err(e) => Err(self.send_failed(tx, call, e)),
                }
            }
            Err(e) => Err(self.send_failed(tx, call, e)),
        }
    }

    fn send_failed(
        &self,
        tx: &TypedTransaction,
        call: Option<&ContractCall>,
        err: TransportError,
    ) -> SchedulerError {
        warn!(nonce = ?tx.nonce(), error = %err, "Broadcast failed");
        match call {
            Some(call) => self.error_mapper.map(err, call, SchedulerError::Broadcast),
            None => SchedulerError::Broadcast(err),
        }
    }
}

/// Whether a failed broadcast can hand its nonce back: the transaction never
/// reached the node, or the node explicitly refused it.
pub fn nonce_unused(err: &SchedulerError) -> bool {
    match err {
        SchedulerError::Signing(_) | SchedulerError::Contract(_) => true,
        SchedulerError::Broadcast(e) => e.is_node_rejection(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::signer::MockTxSigner;
    use crate::chain::MockRpcTransport;
    use crate::contract::call::tests::transfer_call;
    use crate::error::TransportError;
    use ethers::types::{Address, Bytes, Eip1559TransactionRequest, H256};

    fn tx() -> TypedTransaction {
        Eip1559TransactionRequest::new()
            .to(Address::repeat_byte(0xaa))
            .nonce(3u64)
            .into()
    }

    fn signer() -> MockTxSigner {
        let mut signer = MockTxSigner::new();
        signer.expect_address().return_const(Address::repeat_byte(0x01));
        signer.expect_sign_transaction().returning(|_| {
            Ok(SignedTx {
                raw: Bytes::from(vec![0x02, 0x03]),
                hash: H256::repeat_byte(0x44),
            })
        });
        signer
    }

    fn broadcaster(transport: MockRpcTransport) -> Broadcaster {
        Broadcaster::new(
            Arc::new(transport),
            Arc::new(signer()),
            Arc::new(ErrorMapper::clob()),
        )
    }

    #[tokio::test]
    async fn test_broadcast_sends_signed_bytes() {
        let mut transport = MockRpcTransport::new();
        transport
            .expect_send_raw_transaction()
            .withf(|raw| raw.to_vec() == vec![0x02, 0x03])
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x44)));

        let signed = broadcaster(transport).broadcast(&tx(), None).await.unwrap();
        assert_eq!(signed.hash, H256::repeat_byte(0x44));
    }

    #[tokio::test]
    async fn test_known_revert_is_mapped() {
        let mut transport = MockRpcTransport::new();
        transport.expect_send_raw_transaction().returning(|_| {
            Err(TransportError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
                data: Some(Bytes::from(vec![0x4e, 0xf3, 0x6a, 0x18])),
            })
        });

        let err = broadcaster(transport)
            .broadcast(&tx(), Some(&transfer_call(1)))
            .await
            .unwrap_err();

        match &err {
            SchedulerError::Contract(revert) => assert_eq!(revert.name, "ZeroTrade"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(nonce_unused(&err));
    }

    #[tokio::test]
    async fn test_unknown_revert_is_preserved() {
        let mut transport = MockRpcTransport::new();
        transport.expect_send_raw_transaction().returning(|_| {
            Err(TransportError::Rpc {
                code: -32000,
                message: "nonce too low".to_string(),
                data: None,
            })
        });

        let err = broadcaster(transport)
            .broadcast(&tx(), Some(&transfer_call(1)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Broadcast(TransportError::Rpc { code: -32000, .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_broadcast_returns_receipt() {
        let mut transport = MockRpcTransport::new();
        transport
            .expect_send_raw_transaction_sync()
            .times(1)
            .returning(|_| {
                Ok(serde_json::json!({
                    "transactionHash": format!("{:?}", H256::repeat_byte(0x44)),
                    "blockNumber": "0x10",
                    "gasUsed": "0x5208",
                    "status": "0x1",
                    "logs": [],
                }))
            });
        transport.expect_send_raw_transaction().never();

        let (signed, receipt) = broadcaster(transport)
            .broadcast_sync(&tx(), None)
            .await
            .unwrap();
        let receipt = receipt.unwrap();
        assert_eq!(receipt.transaction_hash, signed.hash);
        assert_eq!(receipt.block_number, 16);
    }

    #[tokio::test]
    async fn test_sync_broadcast_falls_back_without_realtime_endpoint() {
        let mut transport = MockRpcTransport::new();
        transport.expect_send_raw_transaction_sync().returning(|_| {
            Err(TransportError::Rpc {
                code: -32601,
                message: "method not found".to_string(),
                data: None,
            })
        });
        transport
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x44)));

        let (signed, receipt) = broadcaster(transport)
            .broadcast_sync(&tx(), None)
            .await
            .unwrap();
        assert_eq!(signed.hash, H256::repeat_byte(0x44));
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_sync_broadcast_maps_reverts() {
        let mut transport = MockRpcTransport::new();
        transport.expect_send_raw_transaction_sync().returning(|_| {
            Err(TransportError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
                data: Some(Bytes::from(vec![0x87, 0xe3, 0x93, 0xa7])),
            })
        });
        transport.expect_send_raw_transaction().never();

        let err = broadcaster(transport)
            .broadcast_sync(&tx(), Some(&transfer_call(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Contract(ref r) if r.name == "FOKNotFilled"));
    }

    #[test]
    fn test_nonce_unused_classification() {
        assert!(nonce_unused(&SchedulerError::Signing("locked".to_string())));
        assert!(!nonce_unused(&SchedulerError::Broadcast(
            TransportError::Connection("timeout".to_string())
        )));
        assert!(!nonce_unused(&SchedulerError::UnsentTransaction));
    }
}
