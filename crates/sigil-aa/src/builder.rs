use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use sigil_chain::chains::NetworkConfig;
use thiserror::Error;
use tracing::debug;

use crate::contracts::executeCall;
use crate::gas::GasConfig;
use crate::paymaster::{paymaster_and_data, PaymasterConfig};
use crate::reader::{ChainReader, ReadError};
use crate::user_op::UserOperation;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to read nonce for {sender}: {source}")]
    Nonce {
        sender: Address,
        #[source]
        source: ReadError,
    },
}

/// Everything about an operation that does not change between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationConfig {
    pub entry_point: Address,
    /// The smart account that sends every operation.
    pub sender: Address,
    pub gas: GasConfig,
    pub paymaster: Option<PaymasterConfig>,
}

impl OperationConfig {
    /// Sponsored by the network's paymaster when it has one.
    pub fn for_network(network: &NetworkConfig, gas: GasConfig) -> Self {
        Self {
            entry_point: network.contracts.entry_point,
            sender: network.contracts.smart_account,
            gas,
            paymaster: network
                .contracts
                .paymaster
                .map(|address| PaymasterConfig::new(address, &gas)),
        }
    }
}

/// `execute(target, value, data)` on the smart account.
pub fn encode_execute(target: Address, value: U256, data: Bytes) -> Bytes {
    executeCall { target, value, data }.abi_encode().into()
}

/// Assembles unsigned operations for the configured account.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    config: OperationConfig,
}

impl OperationBuilder {
    pub fn new(config: OperationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Read the sender's nonce (key 0) and assemble an unsigned operation
    /// calling `target` through the account.
    pub async fn build(
        &self,
        reader: &dyn ChainReader,
        target: Address,
        value: U256,
        data: Bytes,
    ) -> Result<UserOperation, BuildError> {
        let cfg = &self.config;
        let nonce = reader
            .get_nonce(cfg.entry_point, cfg.sender, U192::ZERO)
            .await
            .map_err(|source| BuildError::Nonce {
                sender: cfg.sender,
                source,
            })?;
        debug!(sender = %cfg.sender, %nonce, %target, "building user operation");

        Ok(UserOperation {
            sender: cfg.sender,
            nonce,
            init_code: Bytes::new(),
            call_data: encode_execute(target, value, data),
            account_gas_limits: cfg.gas.account_gas_limits(),
            pre_verification_gas: U256::from(cfg.gas.pre_verification_gas),
            gas_fees: cfg.gas.gas_fees(),
            paymaster_and_data: paymaster_and_data(cfg.paymaster.as_ref()),
        })
    }
}
