use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// ERC-4337 v0.7 EntryPoint, deployed at the same address on every network.
pub const ENTRY_POINT_V07: Address = address!("0000000071727de22e5e9d8baf0edac6f37da032");

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("network not found: {0}")]
    NotFound(String),
    #[error("network already exists: {0}")]
    AlreadyExists(String),
    #[error("{contract} is not deployed on {network}")]
    NotDeployed {
        network: String,
        contract: &'static str,
    },
}

/// Contract addresses the client talks to on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddresses {
    pub entry_point: Address,
    pub factory: Address,
    /// Gas sponsor; `None` means the account pays for itself.
    pub paymaster: Option<Address>,
    pub nft: Address,
    pub smart_account: Address,
}

/// Configuration for a single network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Registry key, e.g. `sepolia`.
    pub key: String,
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub block_explorer: Option<String>,
    pub contracts: ContractAddresses,
}

impl NetworkConfig {
    /// Reject networks whose demo contracts were never deployed.
    pub fn validate(&self) -> Result<(), ChainError> {
        let required = [
            ("EntryPoint", self.contracts.entry_point),
            ("smart account", self.contracts.smart_account),
            ("NFT contract", self.contracts.nft),
        ];
        for (contract, addr) in required {
            if addr == Address::ZERO {
                return Err(ChainError::NotDeployed {
                    network: self.key.clone(),
                    contract,
                });
            }
        }
        Ok(())
    }

    /// Chain id as the `0x`-prefixed hex string wallets expect.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    pub fn tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|base| format!("{}/tx/{tx_hash}", base.trim_end_matches('/')))
    }

    pub fn address_url(&self, address: Address) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|base| format!("{}/address/{address}", base.trim_end_matches('/')))
    }
}

/// Thread-safe network registry with pre-configured and custom networks.
#[derive(Clone)]
pub struct NetworkRegistry {
    networks: Arc<RwLock<HashMap<String, NetworkConfig>>>,
}

impl NetworkRegistry {
    /// Create a new registry pre-loaded with the demo deployments.
    pub fn new() -> Self {
        let map = Self::default_networks()
            .into_iter()
            .map(|n| (n.key.clone(), n))
            .collect();
        Self {
            networks: Arc::new(RwLock::new(map)),
        }
    }

    pub fn empty() -> Self {
        Self {
            networks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, key: &str) -> Result<NetworkConfig, ChainError> {
        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(key.to_string()))
    }

    pub fn by_chain_id(&self, chain_id: u64) -> Result<NetworkConfig, ChainError> {
        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|n| n.chain_id == chain_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("chain_id={chain_id}")))
    }

    pub fn list(&self) -> Vec<NetworkConfig> {
        let mut all: Vec<_> = self
            .networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|n| n.chain_id);
        all
    }

    pub fn add_custom(&self, config: NetworkConfig) -> Result<(), ChainError> {
        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        if networks.contains_key(&config.key) {
            return Err(ChainError::AlreadyExists(config.key));
        }
        networks.insert(config.key.clone(), config);
        Ok(())
    }

    fn default_networks() -> Vec<NetworkConfig> {
        vec![
            NetworkConfig {
                key: "sepolia".into(),
                name: "Sepolia".into(),
                chain_id: 11_155_111,
                rpc_urls: vec!["https://ethereum-sepolia-rpc.publicnode.com".into()],
                block_explorer: Some("https://sepolia.etherscan.io".into()),
                contracts: ContractAddresses {
                    entry_point: ENTRY_POINT_V07,
                    factory: address!("26fc0bf3d80663a8bbbe51faaa341b2762c81195"),
                    paymaster: Some(address!("18bf042488f4e36cc65993715f7a14097740be4f")),
                    nft: address!("90b54b4c9b926acd2f8461196c3371db920800b2"),
                    smart_account: address!("3d18509a0eab0f97721d63d29753f39bbf8f1abd"),
                },
            },
            // Demo contracts not deployed yet.
            NetworkConfig {
                key: "arbitrum-sepolia".into(),
                name: "Arbitrum Sepolia".into(),
                chain_id: 421_614,
                rpc_urls: vec!["https://sepolia-rollup.arbitrum.io/rpc".into()],
                block_explorer: Some("https://sepolia.arbiscan.io".into()),
                contracts: ContractAddresses {
                    entry_point: ENTRY_POINT_V07,
                    factory: Address::ZERO,
                    paymaster: None,
                    nft: Address::ZERO,
                    smart_account: Address::ZERO,
                },
            },
        ]
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anvil() -> NetworkConfig {
        NetworkConfig {
            key: "anvil".into(),
            name: "Anvil".into(),
            chain_id: 31337,
            rpc_urls: vec!["http://127.0.0.1:8545".into()],
            block_explorer: None,
            contracts: ContractAddresses {
                entry_point: ENTRY_POINT_V07,
                factory: Address::repeat_byte(0x01),
                paymaster: None,
                nft: Address::repeat_byte(0x02),
                smart_account: Address::repeat_byte(0x03),
            },
        }
    }

    #[test]
    fn test_default_registry_contains_demo_networks() {
        let reg = NetworkRegistry::new();
        let sepolia = reg.get("sepolia").unwrap();
        assert_eq!(sepolia.chain_id, 11_155_111);
        assert_eq!(sepolia.contracts.entry_point, ENTRY_POINT_V07);
        assert!(sepolia.contracts.paymaster.is_some());
        assert!(sepolia.validate().is_ok());

        let arb = reg.by_chain_id(421_614).unwrap();
        assert_eq!(arb.key, "arbitrum-sepolia");
        assert_eq!(reg.list().len(), 2);
    }

    #[test]
    fn test_undeployed_network_fails_validation() {
        let arb = NetworkRegistry::new().get("arbitrum-sepolia").unwrap();
        match arb.validate() {
            Err(ChainError::NotDeployed { network, contract }) => {
                assert_eq!(network, "arbitrum-sepolia");
                assert_eq!(contract, "smart account");
            }
            other => panic!("expected NotDeployed, got {other:?}"),
        }
    }

    #[test]
    fn test_get_network_not_found() {
        let reg = NetworkRegistry::new();
        assert!(matches!(reg.get("mainnet"), Err(ChainError::NotFound(_))));
        assert!(reg.by_chain_id(999_999).is_err());
    }

    #[test]
    fn test_add_custom_and_duplicate() {
        let reg = NetworkRegistry::empty();
        reg.add_custom(anvil()).unwrap();
        assert_eq!(reg.get("anvil").unwrap().chain_id, 31337);
        assert!(matches!(reg.add_custom(anvil()), Err(ChainError::AlreadyExists(_))));
    }

    #[test]
    fn test_registry_is_clone_safe() {
        let reg = NetworkRegistry::new();
        let reg2 = reg.clone();
        reg.add_custom(anvil()).unwrap();
        // Clone shares the Arc, so both see the update
        assert!(reg2.get("anvil").is_ok());
    }

    #[test]
    fn test_explorer_links_and_hex_chain_id() {
        let sepolia = NetworkRegistry::new().get("sepolia").unwrap();
        assert_eq!(sepolia.chain_id_hex(), "0xaa36a7");
        assert_eq!(
            sepolia.tx_url("0xabc").as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xabc")
        );
        assert!(anvil().tx_url("0xabc").is_none());
    }
}
