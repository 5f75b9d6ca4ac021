use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Serialize;
use sigil_chain::rpc::{EvmRpcClient, RpcError};
use thiserror::Error;
use tracing::debug;

use crate::contracts::{
    getNonceCall, getOwnersCall, getSessionKeyCall, getUserOpHashCall, thresholdCall,
    PackedUserOperation,
};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("chain read failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("failed to decode {method} return data: {reason}")]
    Decode { method: &'static str, reason: String },
}

/// On-chain registration of a session key, as reported by the account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyStatus {
    /// Unix seconds; zero when the key was never registered.
    pub expires_at: u64,
    pub one_time: bool,
    pub used: bool,
}

impl SessionKeyStatus {
    pub fn is_registered(&self) -> bool {
        self.expires_at != 0
    }

    pub fn is_active_at(&self, now: u64) -> bool {
        self.is_registered() && now < self.expires_at && !(self.one_time && self.used)
    }
}

/// Read-only chain access the client depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_nonce(&self, entry_point: Address, sender: Address, key: U192) -> Result<U256, ReadError>;

    /// The EntryPoint's own hash of `op`; never recomputed locally.
    async fn get_user_op_hash(
        &self,
        entry_point: Address,
        op: &PackedUserOperation,
    ) -> Result<B256, ReadError>;

    async fn get_session_key(&self, account: Address, key: Address) -> Result<SessionKeyStatus, ReadError>;

    async fn get_owners(&self, account: Address) -> Result<Vec<Address>, ReadError>;

    async fn threshold(&self, account: Address) -> Result<U256, ReadError>;

    async fn get_balance(&self, address: Address) -> Result<U256, ReadError>;

    /// `None` when no code is deployed at `address`.
    async fn get_bytecode(&self, address: Address) -> Result<Option<Bytes>, ReadError>;
}

/// [`ChainReader`] over a JSON-RPC node.
#[derive(Clone)]
pub struct EvmChainReader {
    client: EvmRpcClient,
}

impl EvmChainReader {
    pub fn new(client: EvmRpcClient) -> Self {
        Self { client }
    }

    async fn call<C: SolCall + Send + Sync>(&self, to: Address, call: C) -> Result<C::Return, ReadError> {
        debug!(%to, method = C::SIGNATURE, "eth_call");
        let ret = self.client.call(to, call.abi_encode().into()).await?;
        C::abi_decode_returns(&ret, true).map_err(|e| ReadError::Decode {
            method: C::SIGNATURE,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn get_nonce(&self, entry_point: Address, sender: Address, key: U192) -> Result<U256, ReadError> {
        Ok(self.call(entry_point, getNonceCall { sender, key }).await?.nonce)
    }

    async fn get_user_op_hash(
        &self,
        entry_point: Address,
        op: &PackedUserOperation,
    ) -> Result<B256, ReadError> {
        let call = getUserOpHashCall { userOp: op.clone() };
        Ok(self.call(entry_point, call).await?._0)
    }

    async fn get_session_key(&self, account: Address, key: Address) -> Result<SessionKeyStatus, ReadError> {
        let ret = self.call(account, getSessionKeyCall { key }).await?;
        Ok(SessionKeyStatus {
            expires_at: ret.expiresAt.to::<u64>(),
            one_time: ret.oneTime,
            used: ret.used,
        })
    }

    async fn get_owners(&self, account: Address) -> Result<Vec<Address>, ReadError> {
        Ok(self.call(account, getOwnersCall {}).await?.owners)
    }

    async fn threshold(&self, account: Address) -> Result<U256, ReadError> {
        Ok(self.call(account, thresholdCall {}).await?._0)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ReadError> {
        Ok(self.client.get_balance(address).await?)
    }

    async fn get_bytecode(&self, address: Address) -> Result<Option<Bytes>, ReadError> {
        let code = self.client.get_code(address).await?;
        Ok((!code.is_empty()).then_some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sigil_chain::mock::MockRpcServer;
    use sigil_chain::rpc::RpcPool;
    use std::sync::Arc;

    fn word(n: u64) -> String {
        format!("{n:064x}")
    }

    fn result(req: &Value, result: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": req["id"], "result": result })
    }

    async fn reader_for(server: &MockRpcServer) -> EvmChainReader {
        EvmChainReader::new(EvmRpcClient::new(Arc::new(RpcPool::new("node", vec![server.url()]))))
    }

    fn selector_of(req: &Value) -> String {
        req["params"][0]["data"].as_str().unwrap_or_default()[..10].to_string()
    }

    #[tokio::test]
    async fn test_nonce_and_hash_reads() {
        let server = MockRpcServer::start(|req| match selector_of(req).as_str() {
            "0x35567e1a" => result(req, json!(format!("0x{}", word(7)))),
            _ => result(req, json!(format!("0x{}", "cd".repeat(32)))),
        })
        .await;
        let reader = reader_for(&server).await;

        let nonce = reader
            .get_nonce(Address::repeat_byte(0xee), Address::repeat_byte(0x5a), U192::ZERO)
            .await
            .unwrap();
        assert_eq!(nonce, U256::from(7));

        let op = PackedUserOperation {
            sender: Address::repeat_byte(0x5a),
            nonce,
            initCode: Bytes::new(),
            callData: Bytes::new(),
            accountGasLimits: B256::ZERO,
            preVerificationGas: U256::ZERO,
            gasFees: B256::ZERO,
            paymasterAndData: Bytes::new(),
            signature: Bytes::new(),
        };
        let hash = reader.get_user_op_hash(Address::repeat_byte(0xee), &op).await.unwrap();
        assert_eq!(hash, B256::repeat_byte(0xcd));

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0]["params"][0]["to"].as_str().unwrap().to_lowercase(),
            format!("0x{}", "ee".repeat(20))
        );
    }

    #[tokio::test]
    async fn test_account_reads() {
        let server = MockRpcServer::start(|req| match req["method"].as_str() {
            Some("eth_getCode") => result(req, json!("0x")),
            Some("eth_getBalance") => result(req, json!("0x64")),
            _ => {
                let owners_sel = format!("0x{}", hex::encode(getOwnersCall::SELECTOR));
                let threshold_sel = format!("0x{}", hex::encode(thresholdCall::SELECTOR));
                let sel = selector_of(req);
                let ret = if sel == owners_sel {
                    let a = format!("{:0>64}", "11".repeat(20));
                    let b = format!("{:0>64}", "22".repeat(20));
                    format!("{}{}{a}{b}", word(0x20), word(2))
                } else if sel == threshold_sel {
                    word(2)
                } else {
                    // getSessionKey: expiresAt = 1000, oneTime = true, used = false
                    format!("{}{}{}", word(1000), word(1), word(0))
                };
                result(req, json!(format!("0x{ret}")))
            }
        })
        .await;
        let reader = reader_for(&server).await;
        let account = Address::repeat_byte(0x5a);

        assert_eq!(reader.get_bytecode(account).await.unwrap(), None);
        assert_eq!(reader.get_balance(account).await.unwrap(), U256::from(100));
        assert_eq!(
            reader.get_owners(account).await.unwrap(),
            vec![Address::repeat_byte(0x11), Address::repeat_byte(0x22)]
        );
        assert_eq!(reader.threshold(account).await.unwrap(), U256::from(2));

        let status = reader.get_session_key(account, Address::repeat_byte(0x77)).await.unwrap();
        assert_eq!(
            status,
            SessionKeyStatus { expires_at: 1000, one_time: true, used: false }
        );
        assert!(status.is_active_at(999));
        assert!(!status.is_active_at(1000));
    }

    #[tokio::test]
    async fn test_revert_surfaces_as_read_error() {
        let server = MockRpcServer::start(|req| {
            json!({ "jsonrpc": "2.0", "id": req["id"],
                    "error": { "code": 3, "message": "execution reverted" } })
        })
        .await;
        let reader = reader_for(&server).await;
        let err = reader
            .get_nonce(Address::ZERO, Address::ZERO, U192::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::Rpc(RpcError::JsonRpc(_))));
        assert!(err.to_string().contains("execution reverted"));
    }

    #[tokio::test]
    async fn test_short_return_data_is_decode_error() {
        let server = MockRpcServer::start(|req| result(req, json!("0x01"))).await;
        let reader = reader_for(&server).await;
        assert!(matches!(
            reader.threshold(Address::ZERO).await,
            Err(ReadError::Decode { method: "threshold()", .. })
        ));
    }

    #[test]
    fn test_session_status_one_time_used() {
        let status = SessionKeyStatus { expires_at: u64::MAX, one_time: true, used: true };
        assert!(status.is_registered());
        assert!(!status.is_active_at(0));
        assert!(!SessionKeyStatus::default().is_registered());
    }
}
