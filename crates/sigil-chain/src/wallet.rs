use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::rpc::{parse_bytes, parse_quantity, RpcError, RpcPool};
use crate::signer::{LocalSigner, SignerError};

/// EIP-1193 code for "user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-3326 code for "chain has not been added to the wallet".
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("wallet returned no accounts")]
    NoAccounts,
    #[error("chain {0} has not been added to the wallet")]
    UnrecognizedChain(u64),
    #[error("request rejected by user: {0}")]
    Rejected(String),
    #[error("account {0} is not available in this wallet")]
    AccountUnavailable(Address),
    #[error("wallet RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
}

/// The account-holding side of the client: lists accounts, follows a chain,
/// and signs personal messages.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Fails with [`WalletError::UnrecognizedChain`] when the wallet does
    /// not know the chain at all.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// Sign `message` as a personal message. The wallet applies the
    /// `"\x19Ethereum Signed Message:\n"` prefix.
    async fn sign_personal_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> Result<Bytes, WalletError>;
}

/// A wallet backed by in-process keys.
pub struct LocalWallet {
    signers: Vec<LocalSigner>,
    chain_id: AtomicU64,
    known_chains: HashSet<u64>,
}

impl LocalWallet {
    /// The wallet starts on `chain_id` and only knows that chain.
    pub fn new(signers: Vec<LocalSigner>, chain_id: u64) -> Self {
        Self {
            signers,
            chain_id: AtomicU64::new(chain_id),
            known_chains: HashSet::from([chain_id]),
        }
    }

    pub fn with_known_chain(mut self, chain_id: u64) -> Self {
        self.known_chains.insert(chain_id);
        self
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(LocalSigner::address).collect()
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(self.addresses())
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        if !self.known_chains.contains(&chain_id) {
            return Err(WalletError::UnrecognizedChain(chain_id));
        }
        self.chain_id.store(chain_id, Ordering::SeqCst);
        debug!(chain_id, "local wallet switched chain");
        Ok(())
    }

    async fn sign_personal_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> Result<Bytes, WalletError> {
        let signer = self
            .signers
            .iter()
            .find(|s| s.address() == account)
            .ok_or(WalletError::AccountUnavailable(account))?;
        Ok(signer.sign_message(message)?)
    }
}

/// A wallet reached over JSON-RPC using the EIP-1193 method set
/// (`eth_requestAccounts`, `eth_chainId`, `wallet_switchEthereumChain`,
/// `personal_sign`).
pub struct RpcWallet {
    pool: Arc<RpcPool>,
}

impl RpcWallet {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }

    fn classify(err: RpcError) -> WalletError {
        match err.json_rpc() {
            Some(e) if e.code == Some(USER_REJECTED_CODE) => WalletError::Rejected(e.message.clone()),
            _ => WalletError::Rpc(err),
        }
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let result = self
            .pool
            .request("eth_requestAccounts", json!([]))
            .await
            .map_err(Self::classify)?;
        let accounts: Vec<Address> = serde_json::from_value(result)
            .map_err(|e| RpcError::Deserialize(format!("accounts: {e}")))?;
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        let result = self
            .pool
            .request("eth_chainId", json!([]))
            .await
            .map_err(Self::classify)?;
        let id = parse_quantity(&result)?
            .try_into()
            .map_err(|_| RpcError::Deserialize("chain id overflows u64".into()))?;
        Ok(id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        info!(chain_id, "requesting wallet chain switch");
        self.pool
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": format!("{chain_id:#x}") }]),
            )
            .await
            .map(|_| ())
            .map_err(|err| match err.json_rpc() {
                Some(e) if e.code == Some(UNRECOGNIZED_CHAIN_CODE) => {
                    WalletError::UnrecognizedChain(chain_id)
                }
                _ => Self::classify(err),
            })
    }

    async fn sign_personal_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> Result<Bytes, WalletError> {
        let data = Bytes::copy_from_slice(message);
        let result = self
            .pool
            .request("personal_sign", json!([data, account]))
            .await
            .map_err(Self::classify)?;
        Ok(parse_bytes(&result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRpcServer;
    use crate::signer::recover_signer;
    use serde_json::Value;

    #[tokio::test]
    async fn test_local_wallet_signs_for_its_accounts() {
        let signer = LocalSigner::random();
        let owner = signer.address();
        let wallet = LocalWallet::new(vec![signer], 11_155_111);

        assert_eq!(wallet.request_accounts().await.unwrap(), vec![owner]);
        let sig = wallet.sign_personal_message(owner, &[7u8; 32]).await.unwrap();
        assert_eq!(recover_signer(&[7u8; 32], &sig).unwrap(), owner);

        let stranger = Address::repeat_byte(0x99);
        assert!(matches!(
            wallet.sign_personal_message(stranger, b"x").await,
            Err(WalletError::AccountUnavailable(a)) if a == stranger
        ));
    }

    #[tokio::test]
    async fn test_local_wallet_switch_chain() {
        let wallet = LocalWallet::new(vec![], 1).with_known_chain(11_155_111);
        wallet.switch_chain(11_155_111).await.unwrap();
        assert_eq!(wallet.chain_id().await.unwrap(), 11_155_111);

        assert!(matches!(
            wallet.switch_chain(421_614).await,
            Err(WalletError::UnrecognizedChain(421_614))
        ));
        // Failed switch leaves the current chain alone
        assert_eq!(wallet.chain_id().await.unwrap(), 11_155_111);
    }

    fn rpc_wallet_server() -> impl Fn(&Value) -> Value + Send + Sync + 'static {
        |req| {
            let id = req["id"].clone();
            match req["method"].as_str() {
                Some("eth_requestAccounts") => json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": ["0x1111111111111111111111111111111111111111"]
                }),
                Some("eth_chainId") => json!({ "jsonrpc": "2.0", "id": id, "result": "0x1" }),
                Some("wallet_switchEthereumChain") => {
                    if req["params"][0]["chainId"] == "0xaa36a7" {
                        json!({ "jsonrpc": "2.0", "id": id, "result": null })
                    } else {
                        json!({ "jsonrpc": "2.0", "id": id,
                                "error": { "code": 4902, "message": "Unrecognized chain ID" } })
                    }
                }
                Some("personal_sign") => json!({ "jsonrpc": "2.0", "id": id,
                    "error": { "code": 4001, "message": "User rejected the request." } }),
                _ => json!({ "jsonrpc": "2.0", "id": id, "error": "unsupported" }),
            }
        }
    }

    #[tokio::test]
    async fn test_rpc_wallet_methods() {
        let server = MockRpcServer::start(rpc_wallet_server()).await;
        let wallet = RpcWallet::new(Arc::new(RpcPool::new("wallet", vec![server.url()])));

        assert_eq!(
            wallet.request_accounts().await.unwrap(),
            vec![Address::repeat_byte(0x11)]
        );
        assert_eq!(wallet.chain_id().await.unwrap(), 1);
        wallet.switch_chain(11_155_111).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[2]["params"][0]["chainId"], "0xaa36a7");
    }

    #[tokio::test]
    async fn test_rpc_wallet_error_codes() {
        let server = MockRpcServer::start(rpc_wallet_server()).await;
        let wallet = RpcWallet::new(Arc::new(RpcPool::new("wallet", vec![server.url()])));

        assert!(matches!(
            wallet.switch_chain(421_614).await,
            Err(WalletError::UnrecognizedChain(421_614))
        ));
        match wallet.sign_personal_message(Address::ZERO, &[1, 2]).await {
            Err(WalletError::Rejected(msg)) => assert_eq!(msg, "User rejected the request."),
            other => panic!("expected Rejected, got {other:?}"),
        }

        let sign_req = server
            .requests()
            .into_iter()
            .find(|r| r["method"] == "personal_sign")
            .unwrap();
        assert_eq!(sign_req["params"][0], "0x0102");
    }
}
