//! Use-case flows: build, hash, sign, submit, and wait, with progress events.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use sigil_chain::chains::NetworkConfig;
use sigil_chain::signer::LocalSigner;
use sigil_chain::wallet::Wallet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::account::{load_account, AccountOverview};
use crate::builder::{BuildError, OperationBuilder, OperationConfig};
use crate::bundler::{BundlerClient, BundlerError};
use crate::contracts::{safeMintCall, setSessionKeyCall, uint48_saturating};
use crate::gas::GasConfig;
use crate::hash::resolve_user_op_hash;
use crate::progress::{short, Progress, ProgressLevel};
use crate::reader::{ChainReader, ReadError, SessionKeyStatus};
use crate::session::{unix_now, SessionKeyData};
use crate::signature::{
    sign_as_owner, sign_multi_owner, sign_single_owner, sign_with_session_key, SignatureEnvelope,
    SigningError,
};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("failed to build user operation: {0}")]
    Build(#[from] BuildError),
    #[error("failed to resolve user operation hash: {0}")]
    Hash(#[source] ReadError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Bundler(#[from] BundlerError),
    #[error("collected {collected} owner signatures, account threshold is {threshold}")]
    BelowThreshold { collected: usize, threshold: U256 },
}

/// Identifiers of an included operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentOperation {
    pub user_op_hash: B256,
    pub transaction_hash: B256,
}

enum Strategy<'a> {
    SingleOwner {
        wallet: &'a dyn Wallet,
        owner: Option<Address>,
    },
    MultiOwner {
        wallet: &'a dyn Wallet,
        connected: Option<Address>,
        co_signers: &'a [LocalSigner],
    },
    Session(&'a mut SessionKeyData),
}

/// Drives operations for one smart account on one network.
///
/// Flows on the same client run one at a time so two operations never read
/// the same nonce.
pub struct AccountClient {
    network: NetworkConfig,
    reader: Arc<dyn ChainReader>,
    bundler: BundlerClient,
    builder: OperationBuilder,
    progress: Progress,
    in_flight: Mutex<()>,
}

impl AccountClient {
    pub fn new(
        network: NetworkConfig,
        reader: Arc<dyn ChainReader>,
        bundler: BundlerClient,
        progress: Progress,
    ) -> Self {
        let builder = OperationBuilder::new(OperationConfig::for_network(&network, GasConfig::default()));
        Self {
            network,
            reader,
            bundler,
            builder,
            progress,
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_gas(mut self, gas: GasConfig) -> Self {
        self.builder = OperationBuilder::new(OperationConfig::for_network(&self.network, gas));
        self
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// The smart account address.
    pub fn account(&self) -> Address {
        self.builder.config().sender
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub async fn load_account(&self) -> Result<AccountOverview, FlowError> {
        Ok(load_account(self.reader.as_ref(), self.account(), &self.progress).await?)
    }

    /// Mint `token_id` to the smart account, signed by the connected owner.
    pub async fn mint_single_owner(
        &self,
        wallet: &dyn Wallet,
        owner: Option<Address>,
        token_id: U256,
    ) -> Result<SentOperation, FlowError> {
        self.progress.info("=== Mint NFT (Single Owner) ===");
        let sent = self
            .send(
                self.network.contracts.nft,
                self.mint_call(token_id),
                Strategy::SingleOwner { wallet, owner },
            )
            .await?;
        self.report_success(format!("NFT #{token_id} minted!"), &sent);
        Ok(sent)
    }

    /// Mint with the connected owner plus co-signers whose keys the caller holds.
    ///
    /// Owners and threshold are read first; the operation is not submitted
    /// unless enough distinct owners signed and every co-signer is an owner.
    pub async fn mint_multi_sig(
        &self,
        wallet: &dyn Wallet,
        connected: Option<Address>,
        co_signers: &[LocalSigner],
        token_id: U256,
    ) -> Result<SentOperation, FlowError> {
        self.progress.info("=== Mint NFT (Multi-Sig) ===");
        let sent = self
            .send(
                self.network.contracts.nft,
                self.mint_call(token_id),
                Strategy::MultiOwner {
                    wallet,
                    connected,
                    co_signers,
                },
            )
            .await?;
        self.report_success(format!("NFT #{token_id} minted with multi-sig!"), &sent);
        Ok(sent)
    }

    /// Register `session` on the account. The account calls itself, signed by an owner.
    pub async fn register_session_key(
        &self,
        wallet: &dyn Wallet,
        owner: Option<Address>,
        session: &SessionKeyData,
    ) -> Result<SentOperation, FlowError> {
        self.progress.info("=== Setting Session Key On-Chain ===");
        let call = setSessionKeyCall {
            key: session.address(),
            expiresAt: uint48_saturating(session.expires_at()),
            oneTime: session.one_time(),
        };
        let sent = self
            .send(
                self.account(),
                call.abi_encode().into(),
                Strategy::SingleOwner { wallet, owner },
            )
            .await?;
        self.report_success(
            format!("Session key registered on-chain! Key: {}", short(session.address(), 10)),
            &sent,
        );
        Ok(sent)
    }

    /// Mint signed by a session key instead of an owner.
    pub async fn mint_with_session_key(
        &self,
        session: &mut SessionKeyData,
        token_id: U256,
    ) -> Result<SentOperation, FlowError> {
        self.progress.info("=== Mint NFT (Session Key) ===");
        let sent = self
            .send(
                self.network.contracts.nft,
                self.mint_call(token_id),
                Strategy::Session(session),
            )
            .await?;
        self.report_success(format!("NFT #{token_id} minted with session key!"), &sent);
        Ok(sent)
    }

    /// On-chain `(expiresAt, oneTime, used)` for `key`. Read only.
    pub async fn session_key_status(&self, key: Address) -> Result<SessionKeyStatus, FlowError> {
        match self.reader.get_session_key(self.account(), key).await {
            Ok(status) => Ok(status),
            Err(err) => {
                self.progress.error("Failed to read session key", err.to_string());
                Err(err.into())
            }
        }
    }

    fn mint_call(&self, token_id: U256) -> Bytes {
        safeMintCall {
            to: self.account(),
            tokenId: token_id,
        }
        .abi_encode()
        .into()
    }

    fn report_success(&self, message: String, sent: &SentOperation) {
        self.progress.success(message, format!("Tx: {}", sent.transaction_hash));
        if let Some(url) = self.network.tx_url(&sent.transaction_hash.to_string()) {
            self.progress.success("Tx on block explorer", url);
        }
    }

    /// Emit an error event and hand the error back.
    fn fail(&self, message: &str, err: impl Into<FlowError>) -> FlowError {
        let err = err.into();
        self.progress.error(message, err.to_string());
        err
    }

    async fn send(
        &self,
        target: Address,
        data: Bytes,
        strategy: Strategy<'_>,
    ) -> Result<SentOperation, FlowError> {
        let _guard = self.in_flight.lock().await;
        let reader = self.reader.as_ref();
        let entry_point = self.builder.config().entry_point;

        // Multi-sig needs the owner set before signing.
        let authorization = match &strategy {
            Strategy::MultiOwner { .. } => {
                let owners = reader
                    .get_owners(self.account())
                    .await
                    .map_err(|e| self.fail("Failed to read owners", e))?;
                let threshold = reader
                    .threshold(self.account())
                    .await
                    .map_err(|e| self.fail("Failed to read threshold", e))?;
                self.progress.info(format!(
                    "Multi-sig signing with {} owners, threshold {threshold}",
                    owners.len()
                ));
                Some((owners, threshold))
            }
            _ => None,
        };

        self.progress.info("Building UserOperation...");
        let op = self
            .builder
            .build(reader, target, U256::ZERO, data)
            .await
            .map_err(|e| self.fail("Failed to build UserOperation", e))?;
        self.progress.info(format!("Nonce: {}", op.nonce));
        self.progress.success("UserOp built", format!("Sender: {}", op.sender));

        let hash = resolve_user_op_hash(reader, entry_point, &op)
            .await
            .map_err(|e| self.fail("Failed to get UserOp hash", FlowError::Hash(e)))?;
        self.progress.info(format!("UserOp hash: {}", short(hash, 18)));

        let envelope = self
            .sign(&strategy, hash, authorization)
            .await
            .map_err(|e| self.fail("Signing failed", e))?;
        let signed = op.sign(&envelope);

        let submit_id = self.progress.pending("Submitting to bundler...");
        let user_op_hash = match self.bundler.submit(&signed).await {
            Ok(h) => {
                self.progress.resolve(
                    submit_id,
                    ProgressLevel::Success,
                    "UserOp submitted",
                    format!("Hash: {}", short(h, 18)),
                );
                h
            }
            Err(err) => {
                self.progress
                    .resolve(submit_id, ProgressLevel::Error, "Bundler rejected UserOp", err.to_string());
                return Err(err.into());
            }
        };
        // The bundler holds the operation now; a one-time key is spent even if
        // the receipt never arrives.
        if let Strategy::Session(session) = strategy {
            session.mark_consumed();
        }

        let wait_id = self.progress.pending("Waiting for confirmation...");
        match self.bundler.wait_for_receipt(user_op_hash).await {
            Ok(transaction_hash) => {
                self.progress.resolve(
                    wait_id,
                    ProgressLevel::Success,
                    "Transaction confirmed!",
                    format!("Tx: {}", short(transaction_hash, 18)),
                );
                info!(%user_op_hash, %transaction_hash, "operation confirmed");
                Ok(SentOperation {
                    user_op_hash,
                    transaction_hash,
                })
            }
            Err(err) => {
                self.progress
                    .resolve(wait_id, ProgressLevel::Error, "Transaction failed", err.to_string());
                Err(err.into())
            }
        }
    }

    async fn sign(
        &self,
        strategy: &Strategy<'_>,
        hash: B256,
        authorization: Option<(Vec<Address>, U256)>,
    ) -> Result<SignatureEnvelope, FlowError> {
        match *strategy {
            Strategy::SingleOwner { wallet, owner } => {
                if let Some(owner) = owner {
                    self.progress.info(format!("Signing with owner: {}", short(owner, 10)));
                }
                let envelope = sign_single_owner(wallet, owner, hash).await?;
                self.progress.success("Signature complete", format!("Hash: {}", short(hash, 18)));
                Ok(envelope)
            }
            Strategy::MultiOwner {
                wallet,
                connected,
                co_signers,
            } => {
                let (owners, threshold) = authorization.unwrap_or_default();
                let mut additional = Vec::with_capacity(co_signers.len());
                for co_signer in co_signers {
                    let collected = sign_as_owner(co_signer, hash)?;
                    self.progress
                        .info(format!("Adding signature from: {}", short(collected.signer, 10)));
                    additional.push(collected);
                }

                let envelope = sign_multi_owner(wallet, connected, &owners, hash, additional).await?;
                let collected = match &envelope {
                    SignatureEnvelope::Owners(sigs) => sigs.count_owners(&owners),
                    SignatureEnvelope::Session { .. } => 0,
                };
                if U256::from(collected) < threshold {
                    return Err(FlowError::BelowThreshold {
                        collected,
                        threshold,
                    });
                }
                self.progress.success(
                    format!("Multi-sig complete: {collected} signatures"),
                    format!("Threshold: {threshold}"),
                );
                Ok(envelope)
            }
            Strategy::Session(ref session) => {
                self.progress
                    .info(format!("Signing with session key: {}", short(session.address(), 10)));
                let envelope = sign_with_session_key(session, hash, unix_now())?;
                self.progress
                    .success("Session key signature complete", format!("Hash: {}", short(hash, 18)));
                Ok(envelope)
            }
        }
    }
}
