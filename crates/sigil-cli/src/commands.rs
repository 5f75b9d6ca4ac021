use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::{bail, Context, Result};
use rand::Rng;
use sigil_aa::{
    connect, AccountClient, BundlerClient, EvmChainReader, Progress, SentOperation, SessionKeyData,
};
use sigil_chain::{EvmRpcClient, LocalSigner, LocalWallet, RpcPool, SecretBytes};

use crate::config::{parse_signer, Cli, Command, SessionCommand, Settings};

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::resolve(&cli)?;
    let client = account_client(&settings);
    let owner_key = cli.owner_key.as_deref();

    match cli.command {
        Command::Account => {
            let overview = client.load_account().await?;
            println!("account:   {}", overview.address);
            println!("deployed:  {}", overview.is_deployed);
            println!("balance:   {} ETH", overview.balance_ether());
            println!("threshold: {}", overview.threshold);
            for owner in &overview.owners {
                println!("owner:     {owner}");
            }
        }
        Command::Mint { token_id } => {
            let (wallet, owner) = owner_wallet(&client, owner_key).await?;
            let sent = client
                .mint_single_owner(&wallet, Some(owner), token_id_or_random(token_id))
                .await?;
            print_sent(&client, &sent);
        }
        Command::MintMultisig {
            token_id,
            co_signer_key,
        } => {
            let (wallet, owner) = owner_wallet(&client, owner_key).await?;
            let co_signer = parse_signer("co-signer", Some(&co_signer_key))?;
            let sent = client
                .mint_multi_sig(&wallet, Some(owner), &[co_signer], token_id_or_random(token_id))
                .await?;
            print_sent(&client, &sent);
        }
        Command::SessionKey(SessionCommand::Create { minutes, one_time }) => {
            let (wallet, owner) = owner_wallet(&client, owner_key).await?;
            let session = SessionKeyData::generate(Duration::from_secs(minutes.saturating_mul(60)), one_time);
            let sent = client.register_session_key(&wallet, Some(owner), &session).await?;
            println!("session key: {}", session.address());
            println!("expires at:  {}", session.expires_at());
            println!("export SIGIL_SESSION_KEY={}", session.secret().to_hex());
            print_sent(&client, &sent);
        }
        Command::SessionKey(SessionCommand::Mint {
            token_id,
            session_key,
        }) => {
            let secret = SecretBytes::from_hex(&session_key).context("invalid session key")?;
            let address = LocalSigner::from_secret(&secret)?.address();
            let status = client.session_key_status(address).await?;
            if !status.is_registered() {
                bail!("session key {address} is not registered on {}", client.account());
            }
            let mut session = SessionKeyData::from_secret(&secret, status.expires_at, status.one_time)?;
            let sent = client
                .mint_with_session_key(&mut session, token_id_or_random(token_id))
                .await?;
            print_sent(&client, &sent);
        }
        Command::SessionKey(SessionCommand::Status { key }) => {
            let status = client.session_key_status(key).await?;
            if !status.is_registered() {
                println!("{key} is not registered");
                return Ok(());
            }
            println!("expires at: {}", status.expires_at);
            println!("one time:   {}", status.one_time);
            println!("used:       {}", status.used);
            println!("active:     {}", status.is_active_at(sigil_aa::session::unix_now()));
        }
    }
    Ok(())
}

fn account_client(settings: &Settings) -> AccountClient {
    let network = settings.network.clone();
    let node = Arc::new(RpcPool::new(network.key.clone(), network.rpc_urls.clone()));
    let reader = EvmChainReader::new(EvmRpcClient::new(node));
    let bundler = BundlerClient::new(
        Arc::new(RpcPool::new("bundler", vec![settings.bundler_url.clone()])),
        network.contracts.entry_point,
    );
    AccountClient::new(network, Arc::new(reader), bundler, Progress::tracing())
}

/// In-process wallet for the owner key, connected to the client's network.
async fn owner_wallet(
    client: &AccountClient,
    owner_key: Option<&str>,
) -> Result<(LocalWallet, alloy_primitives::Address)> {
    let signer = parse_signer("owner", owner_key)?;
    let wallet = LocalWallet::new(vec![signer], client.network().chain_id);
    let connection = connect(&wallet, client.network(), client.progress()).await?;
    Ok((wallet, connection.account))
}

fn token_id_or_random(token_id: Option<u64>) -> U256 {
    U256::from(token_id.unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000)))
}

fn print_sent(client: &AccountClient, sent: &SentOperation) {
    println!("user op:     {}", sent.user_op_hash);
    println!("transaction: {}", sent.transaction_hash);
    if let Some(url) = client.network().tx_url(&sent.transaction_hash.to_string()) {
        println!("explorer:    {url}");
    }
}
