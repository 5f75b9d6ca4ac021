//! ABI bindings for the EntryPoint, the smart account, and the demo NFT.

use alloy_primitives::aliases::U48;
use alloy_sol_types::sol;

/// Largest timestamp a `uint48` field can carry.
pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// `value` as a `uint48`, saturating instead of wrapping.
pub fn uint48_saturating(value: u64) -> U48 {
    U48::from(value.min(MAX_UINT48))
}

sol! {
    /// ERC-4337 v0.7 packed operation, as the EntryPoint hashes and executes it.
    #[derive(Debug, PartialEq, Eq)]
    struct PackedUserOperation {
        address sender;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        bytes32 accountGasLimits;
        uint256 preVerificationGas;
        bytes32 gasFees;
        bytes paymasterAndData;
        bytes signature;
    }

    // EntryPoint
    function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    function getUserOpHash(PackedUserOperation userOp) external view returns (bytes32);

    // Smart account
    function execute(address target, uint256 value, bytes data) external;
    function setSessionKey(address key, uint48 expiresAt, bool oneTime) external;
    function getSessionKey(address key) external view returns (uint48 expiresAt, bool oneTime, bool used);
    function getOwners() external view returns (address[] owners);
    function threshold() external view returns (uint256);

    // Demo NFT
    function safeMint(address to, uint256 tokenId) external;
}
