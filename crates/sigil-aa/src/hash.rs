use alloy_primitives::{Address, B256};
use tracing::debug;

use crate::reader::{ChainReader, ReadError};
use crate::user_op::UserOperation;

/// Ask the EntryPoint for the hash an operation must be signed over.
///
/// The hash is taken over the operation as built, with an empty signature.
/// It is not recomputed locally: the EntryPoint mixes in its own address and
/// the chain id, and its answer is authoritative.
pub async fn resolve_user_op_hash(
    reader: &dyn ChainReader,
    entry_point: Address,
    op: &UserOperation,
) -> Result<B256, ReadError> {
    let hash = reader.get_user_op_hash(entry_point, &op.to_packed()).await?;
    debug!(sender = %op.sender, nonce = %op.nonce, %hash, "resolved user operation hash");
    Ok(hash)
}
