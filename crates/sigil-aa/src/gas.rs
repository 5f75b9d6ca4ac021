use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

const GWEI: u128 = 1_000_000_000;

/// Fixed gas limits and fee caps applied to every operation.
///
/// There is no estimation: the values are process-wide constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasConfig {
    pub verification_gas_limit: u128,
    pub call_gas_limit: u128,
    pub pre_verification_gas: u128,
    pub paymaster_verification_gas_limit: u128,
    pub paymaster_post_op_gas_limit: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            verification_gas_limit: 500_000,
            call_gas_limit: 500_000,
            pre_verification_gas: 100_000,
            paymaster_verification_gas_limit: 100_000,
            paymaster_post_op_gas_limit: 50_000,
            max_fee_per_gas: 50 * GWEI,
            max_priority_fee_per_gas: 2 * GWEI,
        }
    }
}

impl GasConfig {
    /// `verificationGasLimit (16 bytes) || callGasLimit (16 bytes)`.
    pub fn account_gas_limits(&self) -> B256 {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// `maxPriorityFeePerGas (16 bytes) || maxFeePerGas (16 bytes)`.
    pub fn gas_fees(&self) -> B256 {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }
}

/// Pack two 128-bit values big-endian into one 32-byte word, `high` first.
pub fn pack_u128_pair(high: u128, low: u128) -> B256 {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes());
    word[16..].copy_from_slice(&low.to_be_bytes());
    B256::from(word)
}

pub fn unpack_u128_pair(word: B256) -> (u128, u128) {
    let mut high = [0u8; 16];
    let mut low = [0u8; 16];
    high.copy_from_slice(&word[..16]);
    low.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(high), u128::from_be_bytes(low))
}
