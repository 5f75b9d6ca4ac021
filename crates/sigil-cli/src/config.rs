//! Command-line arguments and the settings resolved from them.

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use sigil_chain::{LocalSigner, NetworkConfig, NetworkRegistry};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sigil", version, about = "ERC-4337 smart account client")]
pub struct Cli {
    /// Increase logging verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Network key from the registry.
    #[arg(long, env = "SIGIL_NETWORK", default_value = "sepolia", global = true)]
    pub network: String,

    /// Override the network's default RPC endpoint.
    #[arg(long, env = "SIGIL_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// Bundler endpoint. Derived from the Pimlico API key when omitted.
    #[arg(long, env = "SIGIL_BUNDLER_URL", global = true)]
    pub bundler_url: Option<String>,

    #[arg(long, env = "PIMLICO_API_KEY", hide_env_values = true, global = true)]
    pub pimlico_api_key: Option<String>,

    /// Owner private key (hex).
    #[arg(long, env = "SIGIL_OWNER_KEY", hide_env_values = true, global = true)]
    pub owner_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show balance, owners, and threshold of the smart account.
    Account,
    /// Mint an NFT signed by the owner.
    Mint {
        #[arg(long)]
        token_id: Option<u64>,
    },
    /// Mint an NFT signed by the owner and a co-signer.
    MintMultisig {
        #[arg(long)]
        token_id: Option<u64>,
        /// Second owner's private key (hex).
        #[arg(long, env = "SIGIL_CO_SIGNER_KEY", hide_env_values = true)]
        co_signer_key: String,
    },
    /// Session key management.
    #[command(subcommand)]
    SessionKey(SessionCommand),
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Generate a session key and register it on the account.
    Create {
        #[arg(long, default_value_t = 5)]
        minutes: u64,
        /// The key may sign a single operation.
        #[arg(long)]
        one_time: bool,
    },
    /// Mint an NFT signed by a registered session key.
    Mint {
        #[arg(long)]
        token_id: Option<u64>,
        /// Session private key (hex), as printed by `session-key create`.
        #[arg(long, env = "SIGIL_SESSION_KEY", hide_env_values = true)]
        session_key: String,
    },
    /// Show the on-chain registration of a session key.
    Status {
        #[arg(long)]
        key: Address,
    },
}

impl Cli {
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(match self.verbose {
                0 => "warn,sigil_aa=info,sigil_cli=info",
                1 => "debug",
                _ => "trace",
            })
        })
    }
}

/// Everything a command needs to reach the chain and the bundler.
#[derive(Debug, Clone)]
pub struct Settings {
    pub network: NetworkConfig,
    pub bundler_url: String,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut network = NetworkRegistry::new()
            .get(&cli.network)
            .with_context(|| format!("unknown network '{}'", cli.network))?;
        network.validate()?;
        if let Some(url) = &cli.rpc_url {
            network.rpc_urls = vec![url.clone()];
        }

        let bundler_url = match (&cli.bundler_url, &cli.pimlico_api_key) {
            (Some(url), _) => url.clone(),
            (None, Some(key)) => pimlico_url(network.chain_id, key),
            (None, None) => bail!("set SIGIL_BUNDLER_URL or PIMLICO_API_KEY"),
        };

        Ok(Self {
            network,
            bundler_url,
        })
    }
}

pub fn pimlico_url(chain_id: u64, api_key: &str) -> String {
    format!("https://api.pimlico.io/v2/{chain_id}/rpc?apikey={api_key}")
}

pub fn parse_signer(label: &str, key: Option<&str>) -> Result<LocalSigner> {
    let key = key.with_context(|| format!("{label} key is required"))?;
    LocalSigner::from_hex(key).with_context(|| format!("invalid {label} key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sigil").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_pimlico_url() {
        assert_eq!(
            pimlico_url(11_155_111, "abc"),
            "https://api.pimlico.io/v2/11155111/rpc?apikey=abc"
        );
    }

    #[test]
    fn test_resolve_prefers_explicit_bundler_and_rpc() {
        let cli = parse(&[
            "--network",
            "sepolia",
            "--rpc-url",
            "http://localhost:8545",
            "--bundler-url",
            "http://localhost:4337",
            "--pimlico-api-key",
            "ignored",
            "account",
        ]);
        let settings = Settings::resolve(&cli).unwrap();
        assert_eq!(settings.bundler_url, "http://localhost:4337");
        assert_eq!(settings.network.rpc_urls, vec!["http://localhost:8545".to_string()]);
    }

    #[test]
    fn test_resolve_rejects_undeployed_network() {
        let cli = parse(&["--network", "arbitrum-sepolia", "--bundler-url", "http://x", "account"]);
        assert!(Settings::resolve(&cli).is_err());
    }

    #[test]
    fn test_session_subcommands_parse() {
        let cli = parse(&["session-key", "create", "--minutes", "10", "--one-time"]);
        assert!(matches!(
            cli.command,
            Command::SessionKey(SessionCommand::Create { minutes: 10, one_time: true })
        ));
    }

    #[test]
    fn test_parse_signer_requires_key() {
        assert!(parse_signer("owner", None).is_err());
        assert!(parse_signer("owner", Some("not hex")).is_err());
        let signer = parse_signer(
            "owner",
            Some("0x0000000000000000000000000000000000000000000000000000000000000001"),
        )
        .unwrap();
        assert_eq!(
            signer.address().to_string().to_lowercase(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }
}
