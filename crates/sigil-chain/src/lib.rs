pub mod chains;
pub mod rpc;
pub mod signer;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-exports for convenience
pub use chains::{ChainError, ContractAddresses, NetworkConfig, NetworkRegistry, ENTRY_POINT_V07};
pub use rpc::{EvmRpcClient, JsonRpcError, RpcError, RpcPool};
pub use signer::{recover_signer, LocalSigner, SecretBytes, SignerError};
pub use wallet::{LocalWallet, RpcWallet, Wallet, WalletError};
