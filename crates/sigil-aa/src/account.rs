use alloy_primitives::utils::format_ether;
use alloy_primitives::{Address, U256};
use serde::Serialize;
use sigil_chain::chains::NetworkConfig;
use sigil_chain::wallet::{Wallet, WalletError};
use thiserror::Error;
use tracing::info;

use crate::progress::{short, Progress};
use crate::reader::{ChainReader, ReadError};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("wallet returned no accounts")]
    NoAccounts,
    #[error("network {network} (chain {chain_id}) must be added to the wallet first")]
    NetworkNotAdded { network: String, chain_id: u64 },
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// A wallet account on the expected chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub account: Address,
    pub chain_id: u64,
}

/// Request accounts and make sure the wallet is on `network`, switching if needed.
pub async fn connect(
    wallet: &dyn Wallet,
    network: &NetworkConfig,
    progress: &Progress,
) -> Result<Connection, ConnectError> {
    progress.pending("Connecting wallet...");
    match try_connect(wallet, network, progress).await {
        Ok(conn) => {
            let addr = conn.account.to_string();
            progress.success(
                format!("Connected: {}...{}", &addr[..6], &addr[addr.len() - 4..]),
                format!("{} ({})", network.name, network.chain_id),
            );
            Ok(conn)
        }
        Err(err @ ConnectError::NetworkNotAdded { .. }) => {
            progress.error("Please add the network to your wallet", err.to_string());
            Err(err)
        }
        Err(err) => {
            progress.error("Connection failed", err.to_string());
            Err(err)
        }
    }
}

async fn try_connect(
    wallet: &dyn Wallet,
    network: &NetworkConfig,
    progress: &Progress,
) -> Result<Connection, ConnectError> {
    let account = wallet
        .request_accounts()
        .await?
        .into_iter()
        .next()
        .ok_or(ConnectError::NoAccounts)?;

    let current = wallet.chain_id().await?;
    if current != network.chain_id {
        progress.info(format!("Switching to {}...", network.name));
        match wallet.switch_chain(network.chain_id).await {
            Ok(()) => {}
            Err(WalletError::UnrecognizedChain(_)) => {
                return Err(ConnectError::NetworkNotAdded {
                    network: network.key.clone(),
                    chain_id: network.chain_id,
                })
            }
            Err(other) => return Err(other.into()),
        }
    }

    info!(%account, chain_id = network.chain_id, "wallet connected");
    Ok(Connection {
        account,
        chain_id: network.chain_id,
    })
}

/// Snapshot of the smart account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverview {
    pub address: Address,
    pub balance: U256,
    pub owners: Vec<Address>,
    pub threshold: U256,
    pub is_deployed: bool,
}

impl AccountOverview {
    pub fn balance_ether(&self) -> String {
        format_ether(self.balance)
    }
}

/// Read deployment status, balance, owners, and threshold of `account`.
///
/// An account with no code is reported as undeployed (no owners, threshold 1)
/// with a warning, not as an error.
pub async fn load_account(
    reader: &dyn ChainReader,
    account: Address,
    progress: &Progress,
) -> Result<AccountOverview, ReadError> {
    progress.info(format!("Loading Smart Account: {}", short(account, 10)));
    match read_overview(reader, account, progress).await {
        Ok(overview) => Ok(overview),
        Err(err) => {
            progress.error("Failed to load Smart Account", err.to_string());
            Err(err)
        }
    }
}

async fn read_overview(
    reader: &dyn ChainReader,
    account: Address,
    progress: &Progress,
) -> Result<AccountOverview, ReadError> {
    if reader.get_bytecode(account).await?.is_none() {
        progress.warn("Smart Account not deployed yet");
        return Ok(AccountOverview {
            address: account,
            balance: U256::ZERO,
            owners: Vec::new(),
            threshold: U256::from(1),
            is_deployed: false,
        });
    }

    let balance = reader.get_balance(account).await?;
    let (owners, threshold) = tokio::try_join!(reader.get_owners(account), reader.threshold(account))?;
    let overview = AccountOverview {
        address: account,
        balance,
        owners,
        threshold,
        is_deployed: true,
    };
    progress.success(
        "Smart Account loaded",
        format!(
            "Balance: {} ETH, Owners: {}, Threshold: {}",
            overview.balance_ether(),
            overview.owners.len(),
            overview.threshold
        ),
    );
    Ok(overview)
}
