use alloy_primitives::{Address, Bytes, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an `r || s || v` ECDSA signature.
pub const SIGNATURE_LEN: usize = 65;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// A secret bytes wrapper that zeros itself on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Parse a hex string, with or without `0x`.
    pub fn from_hex(hex_str: &str) -> Result<Self, SignerError> {
        let mut bytes = hex::decode(hex_str.trim().trim_start_matches("0x"))
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        let secret = Self::new(bytes.clone());
        bytes.zeroize();
        Ok(secret)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `0x`-prefixed hex. The returned string is not zeroized.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED; {} bytes])", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// EIP-191 personal message digest:
/// `keccak256("\x19Ethereum Signed Message:\n" ++ len(message) ++ message)`.
pub fn personal_message_hash(message: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    B256::from(hash)
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; the address is the last 20 bytes of the hash.
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the account that produced a personal-message signature.
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<Address, SignerError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignerError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let v = signature[64];
    let recid = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| SignerError::InvalidSignature(format!("bad recovery byte {v}")))?;
    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recid)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    Ok(address_from_verifying_key(&key))
}

/// An in-memory secp256k1 key that signs EIP-191 personal messages.
///
/// The key material is zeroized when the signer is dropped.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn from_secret(secret: &SecretBytes) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(secret.as_slice())
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SignerError> {
        Self::from_secret(&SecretBytes::from_hex(hex_str)?)
    }

    /// Generate a fresh key from the OS RNG.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Export the raw private key.
    pub fn secret(&self) -> SecretBytes {
        SecretBytes::new(self.key.to_bytes().to_vec())
    }

    /// Sign `message` with the personal-message prefix applied.
    /// Returns `r || s || v` with `v` in `{27, 28}`.
    pub fn sign_message(&self, message: &[u8]) -> Result<Bytes, SignerError> {
        let digest = personal_message_hash(message);
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&sig.to_bytes());
        out.push(27 + recid.to_byte());
        Ok(Bytes::from(out))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
