use alloy_primitives::{Address, Bytes};
use thiserror::Error;

use crate::gas::GasConfig;

/// `address (20) || verificationGasLimit (16) || postOpGasLimit (16)`.
pub const PAYMASTER_FIELDS_LEN: usize = 20 + 16 + 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymasterError {
    #[error("paymasterAndData is {0} bytes, need at least 52")]
    Truncated(usize),
}

/// A gas sponsor and the limits it is given for validation and `postOp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterConfig {
    pub address: Address,
    pub verification_gas_limit: u128,
    pub post_op_gas_limit: u128,
    /// Paymaster-specific trailer; empty for the demo sponsor.
    pub data: Bytes,
}

impl PaymasterConfig {
    pub fn new(address: Address, gas: &GasConfig) -> Self {
        Self {
            address,
            verification_gas_limit: gas.paymaster_verification_gas_limit,
            post_op_gas_limit: gas.paymaster_post_op_gas_limit,
            data: Bytes::new(),
        }
    }

    pub fn pack(&self) -> Bytes {
        let mut out = Vec::with_capacity(PAYMASTER_FIELDS_LEN + self.data.len());
        out.extend_from_slice(self.address.as_slice());
        out.extend_from_slice(&self.verification_gas_limit.to_be_bytes());
        out.extend_from_slice(&self.post_op_gas_limit.to_be_bytes());
        out.extend_from_slice(&self.data);
        Bytes::from(out)
    }

    /// Inverse of [`pack`](Self::pack). Empty input means no sponsor.
    pub fn unpack(packed: &[u8]) -> Result<Option<Self>, PaymasterError> {
        if packed.is_empty() {
            return Ok(None);
        }
        if packed.len() < PAYMASTER_FIELDS_LEN {
            return Err(PaymasterError::Truncated(packed.len()));
        }
        let mut verification = [0u8; 16];
        let mut post_op = [0u8; 16];
        verification.copy_from_slice(&packed[20..36]);
        post_op.copy_from_slice(&packed[36..52]);
        Ok(Some(Self {
            address: Address::from_slice(&packed[..20]),
            verification_gas_limit: u128::from_be_bytes(verification),
            post_op_gas_limit: u128::from_be_bytes(post_op),
            data: Bytes::copy_from_slice(&packed[52..]),
        }))
    }
}

/// `paymasterAndData` for an optional sponsor: the packed fields, or empty.
pub fn paymaster_and_data(paymaster: Option<&PaymasterConfig>) -> Bytes {
    paymaster.map(PaymasterConfig::pack).unwrap_or_default()
}
