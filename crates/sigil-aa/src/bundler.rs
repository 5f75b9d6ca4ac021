use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use serde::Deserialize;
use serde_json::{json, Value};
use sigil_chain::rpc::{RpcError, RpcPool};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::{Attempt, RetryError, RetryPolicy};
use crate::user_op::{SignedUserOperation, UserOpError};

#[derive(Debug, Error)]
pub enum BundlerError {
    /// The relay answered with a JSON-RPC error; displays the relay's message verbatim.
    #[error("{message}")]
    Rejected { code: Option<i64>, message: String },
    #[error("bundler transport error: {0}")]
    Transport(RpcError),
    #[error("no result from bundler")]
    MissingResult,
    #[error("malformed bundler response: {0}")]
    Malformed(String),
    #[error("cannot encode user operation: {0}")]
    Encode(#[from] UserOpError),
    #[error(
        "timed out waiting for receipt of user operation {user_op_hash} after {attempts} attempts; \
         it may still be included later"
    )]
    Timeout { user_op_hash: B256, attempts: u32 },
}

impl From<RpcError> for BundlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::JsonRpc(e) => BundlerError::Rejected {
                code: e.code,
                message: e.message,
            },
            RpcError::MissingResult => BundlerError::MissingResult,
            other => BundlerError::Transport(other),
        }
    }
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    #[serde(default)]
    pub user_op_hash: Option<B256>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: TransactionReceipt,
}

/// The bundle transaction that included the operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U256>,
}

/// JSON-RPC client for an ERC-4337 bundler.
pub struct BundlerClient {
    pool: Arc<RpcPool>,
    entry_point: Address,
    retry: RetryPolicy,
}

impl BundlerClient {
    pub fn new(pool: Arc<RpcPool>, entry_point: Address) -> Self {
        Self {
            pool,
            entry_point,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// `eth_sendUserOperation`; returns the operation hash assigned by the relay.
    pub async fn submit(&self, op: &SignedUserOperation) -> Result<B256, BundlerError> {
        let rpc_op = op.to_rpc()?;
        let params = json!([rpc_op, self.entry_point]);
        debug!(sender = %rpc_op.sender, nonce = %rpc_op.nonce, "eth_sendUserOperation");

        let result = self
            .pool
            .request("eth_sendUserOperation", params)
            .await
            .map_err(|e| {
                let err = BundlerError::from(e);
                warn!(%err, "bundler rejected user operation");
                err
            })?;
        let user_op_hash: B256 = serde_json::from_value(result.clone())
            .map_err(|_| BundlerError::Malformed(format!("expected operation hash, got {result}")))?;
        info!(%user_op_hash, "user operation submitted");
        Ok(user_op_hash)
    }

    /// One `eth_getUserOperationReceipt` call. `None` while the operation is pending.
    pub async fn get_receipt(&self, user_op_hash: B256) -> Result<Option<UserOperationReceipt>, BundlerError> {
        let result = self
            .pool
            .request("eth_getUserOperationReceipt", json!([user_op_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(result).map(Some)
    }

    /// Poll until the relay reports a receipt. Errors and `null` results count
    /// as not ready; a receipt that cannot be read stops polling.
    pub async fn wait_for_user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<UserOperationReceipt, BundlerError> {
        let outcome = self
            .retry
            .poll(|attempt| async move {
                match self.get_receipt(user_op_hash).await {
                    Ok(Some(receipt)) => Attempt::Ready(receipt),
                    Ok(None) => Attempt::Pending,
                    Err(err @ BundlerError::Malformed(_)) => Attempt::Failed(err),
                    Err(err) => {
                        debug!(%user_op_hash, attempt, %err, "receipt not ready");
                        Attempt::Pending
                    }
                }
            })
            .await;

        match outcome {
            Ok(receipt) => Ok(receipt),
            Err(RetryError::Aborted(err)) => Err(err),
            Err(RetryError::Exhausted { attempts }) => {
                warn!(%user_op_hash, attempts, "gave up waiting for receipt");
                Err(BundlerError::Timeout {
                    user_op_hash,
                    attempts,
                })
            }
        }
    }

    /// Wait for inclusion and return the hash of the including transaction.
    pub async fn wait_for_receipt(&self, user_op_hash: B256) -> Result<B256, BundlerError> {
        let receipt = self.wait_for_user_operation_receipt(user_op_hash).await?;
        let tx_hash = receipt.receipt.transaction_hash;
        info!(%user_op_hash, %tx_hash, success = ?receipt.success, "user operation included");
        Ok(tx_hash)
    }
}

fn parse_receipt(result: Value) -> Result<UserOperationReceipt, BundlerError> {
    serde_json::from_value(result).map_err(|e| BundlerError::Malformed(format!("receipt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{OwnerSignatures, SignatureEnvelope};
    use crate::user_op::UserOperation;
    use alloy_primitives::Bytes;
    use sigil_chain::mock::MockRpcServer;
    use std::time::Duration;

    fn signed_op() -> SignedUserOperation {
        let mut owners = OwnerSignatures::new();
        owners.push(Address::repeat_byte(1), Bytes::from(vec![1u8; 65])).unwrap();
        UserOperation {
            sender: Address::repeat_byte(0x5a),
            nonce: U256::from(1),
            init_code: Bytes::new(),
            call_data: Bytes::new(),
            account_gas_limits: B256::ZERO,
            pre_verification_gas: U256::ZERO,
            gas_fees: B256::ZERO,
            paymaster_and_data: Bytes::new(),
        }
        .sign(&SignatureEnvelope::Owners(owners))
    }

    fn client(server: &MockRpcServer) -> BundlerClient {
        BundlerClient::new(
            Arc::new(RpcPool::new("bundler", vec![server.url()])),
            Address::repeat_byte(0xee),
        )
        .with_retry(RetryPolicy::new(5, Duration::from_millis(10)))
    }

    #[test]
    fn test_rpc_error_classification() {
        let rejected = BundlerError::from(RpcError::JsonRpc(sigil_chain::rpc::JsonRpcError {
            code: Some(-32507),
            message: "AA24 signature error".into(),
        }));
        assert_eq!(rejected.to_string(), "AA24 signature error");
        assert!(matches!(BundlerError::from(RpcError::MissingResult), BundlerError::MissingResult));
        assert!(matches!(
            BundlerError::from(RpcError::Http("HTTP 502".into())),
            BundlerError::Transport(_)
        ));
    }

    #[test]
    fn test_timeout_message_mentions_possible_inclusion() {
        let err = BundlerError::Timeout {
            user_op_hash: B256::ZERO,
            attempts: 60,
        };
        assert!(err.to_string().contains("60 attempts"));
        assert!(err.to_string().contains("may still be included"));
    }

    #[tokio::test]
    async fn test_submit_sends_operation_and_entry_point() {
        let server = MockRpcServer::start(|req| {
            json!({ "jsonrpc": "2.0", "id": req["id"], "result": format!("0x{}", "aa".repeat(32)) })
        })
        .await;

        let hash = client(&server).submit(&signed_op()).await.unwrap();
        assert_eq!(hash, B256::repeat_byte(0xaa));

        let req = &server.requests()[0];
        assert_eq!(req["method"], "eth_sendUserOperation");
        assert_eq!(req["params"][0]["nonce"], "0x1");
        assert_eq!(
            req["params"][1].as_str().unwrap().to_lowercase(),
            format!("0x{}", "ee".repeat(20))
        );
    }

    #[tokio::test]
    async fn test_submit_missing_result() {
        let server = MockRpcServer::start(|req| json!({ "jsonrpc": "2.0", "id": req["id"] })).await;
        assert!(matches!(
            client(&server).submit(&signed_op()).await,
            Err(BundlerError::MissingResult)
        ));
    }

    #[tokio::test]
    async fn test_submit_bare_string_error() {
        let server = MockRpcServer::start(|req| {
            json!({ "jsonrpc": "2.0", "id": req["id"], "error": "invalid UserOperation struct/fields" })
        })
        .await;
        let err = client(&server).submit(&signed_op()).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid UserOperation struct/fields");
    }

    #[tokio::test]
    async fn test_submit_malformed_hash() {
        let server = MockRpcServer::start(|req| json!({ "jsonrpc": "2.0", "id": req["id"], "result": 42 })).await;
        assert!(matches!(
            client(&server).submit(&signed_op()).await,
            Err(BundlerError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_times_out_after_policy_attempts() {
        let server = MockRpcServer::start(|req| json!({ "jsonrpc": "2.0", "id": req["id"], "result": null })).await;
        let err = client(&server).wait_for_receipt(B256::repeat_byte(1)).await.unwrap_err();
        assert!(matches!(err, BundlerError::Timeout { attempts: 5, .. }));
        assert_eq!(server.calls("eth_getUserOperationReceipt"), 5);
    }

    #[tokio::test]
    async fn test_wait_treats_errors_as_pending() {
        let server = MockRpcServer::start(|req| {
            let polls = req["id"].as_u64().unwrap_or(0);
            if polls < 3 {
                json!({ "jsonrpc": "2.0", "id": req["id"], "error": { "message": "not found" } })
            } else {
                json!({ "jsonrpc": "2.0", "id": req["id"], "result": {
                    "userOpHash": format!("0x{}", "01".repeat(32)),
                    "success": true,
                    "receipt": { "transactionHash": format!("0x{}", "bb".repeat(32)), "blockNumber": "0x10" }
                }})
            }
        })
        .await;

        let receipt = client(&server)
            .wait_for_user_operation_receipt(B256::repeat_byte(1))
            .await
            .unwrap();
        assert_eq!(receipt.receipt.transaction_hash, B256::repeat_byte(0xbb));
        assert_eq!(receipt.receipt.block_number, Some(U256::from(16)));
        assert_eq!(receipt.success, Some(true));
        assert_eq!(server.calls("eth_getUserOperationReceipt"), 3);
    }

    #[tokio::test]
    async fn test_wait_stops_on_unreadable_receipt() {
        let server = MockRpcServer::start(|req| {
            json!({ "jsonrpc": "2.0", "id": req["id"], "result": { "receipt": {} } })
        })
        .await;
        assert!(matches!(
            client(&server).wait_for_receipt(B256::ZERO).await,
            Err(BundlerError::Malformed(_))
        ));
        assert_eq!(server.calls("eth_getUserOperationReceipt"), 1);
    }
}
