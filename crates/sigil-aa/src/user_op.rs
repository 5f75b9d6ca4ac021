use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::PackedUserOperation;
use crate::gas::unpack_u128_pair;
use crate::paymaster::{PaymasterConfig, PaymasterError};
use crate::signature::SignatureEnvelope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserOpError {
    #[error("initCode is {0} bytes, shorter than a factory address")]
    InitCodeTooShort(usize),
    #[error("paymaster error: {0}")]
    Paymaster(#[from] PaymasterError),
}

/// An ERC-4337 v0.7 operation before it is signed.
///
/// Carries no signature. `getUserOpHash` is evaluated over this value and
/// the signature is attached afterwards by [`UserOperation::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// `verificationGasLimit || callGasLimit`
    pub account_gas_limits: B256,
    pub pre_verification_gas: U256,
    /// `maxPriorityFeePerGas || maxFeePerGas`
    pub gas_fees: B256,
    pub paymaster_and_data: Bytes,
}

impl UserOperation {
    /// The packed struct with an empty signature, as handed to `getUserOpHash`.
    pub fn to_packed(&self) -> PackedUserOperation {
        self.packed_with(Bytes::new())
    }

    fn packed_with(&self, signature: Bytes) -> PackedUserOperation {
        PackedUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            initCode: self.init_code.clone(),
            callData: self.call_data.clone(),
            accountGasLimits: self.account_gas_limits,
            preVerificationGas: self.pre_verification_gas,
            gasFees: self.gas_fees,
            paymasterAndData: self.paymaster_and_data.clone(),
            signature,
        }
    }

    /// Attach a signature. The result is immutable.
    pub fn sign(self, envelope: &SignatureEnvelope) -> SignedUserOperation {
        SignedUserOperation {
            signature: envelope.encode(),
            op: self,
        }
    }
}

/// A signed operation, ready for the bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUserOperation {
    op: UserOperation,
    signature: Bytes,
}

impl SignedUserOperation {
    pub fn operation(&self) -> &UserOperation {
        &self.op
    }

    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    pub fn to_packed(&self) -> PackedUserOperation {
        self.op.packed_with(self.signature.clone())
    }

    /// Unpack into the field layout bundlers accept over JSON-RPC.
    pub fn to_rpc(&self) -> Result<RpcUserOperation, UserOpError> {
        let op = &self.op;
        let (verification_gas_limit, call_gas_limit) = unpack_u128_pair(op.account_gas_limits);
        let (max_priority_fee_per_gas, max_fee_per_gas) = unpack_u128_pair(op.gas_fees);

        let (factory, factory_data) = match op.init_code.len() {
            0 => (None, None),
            n if n < 20 => return Err(UserOpError::InitCodeTooShort(n)),
            _ => (
                Some(Address::from_slice(&op.init_code[..20])),
                Some(Bytes::copy_from_slice(&op.init_code[20..])),
            ),
        };
        let paymaster = PaymasterConfig::unpack(&op.paymaster_and_data)?;

        Ok(RpcUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            factory,
            factory_data,
            call_data: op.call_data.clone(),
            call_gas_limit: U256::from(call_gas_limit),
            verification_gas_limit: U256::from(verification_gas_limit),
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: U256::from(max_fee_per_gas),
            max_priority_fee_per_gas: U256::from(max_priority_fee_per_gas),
            paymaster: paymaster.as_ref().map(|p| p.address),
            paymaster_verification_gas_limit: paymaster
                .as_ref()
                .map(|p| U256::from(p.verification_gas_limit)),
            paymaster_post_op_gas_limit: paymaster.as_ref().map(|p| U256::from(p.post_op_gas_limit)),
            paymaster_data: paymaster.map(|p| p.data),
            signature: self.signature.clone(),
        })
    }
}

/// Unpacked v0.7 operation as sent in `eth_sendUserOperation`.
///
/// Quantities serialize as `0x`-prefixed hex. Factory and paymaster fields
/// are omitted entirely when unused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}
