//! Signature envelope and the three signing strategies.
//!
//! The smart account expects `abi.encode(uint8 mode, bytes payload)`:
//!
//! - mode `0` (owners): payload is `abi.encode(address[] signers, bytes[] signatures)`
//! - mode `1` (session): payload is `abi.encode(address key, bytes signature)`
//!
//! Every signature is an EIP-191 personal signature over the raw 32-byte
//! UserOperation hash.

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::{sol_data, SolType, SolValue};
use sigil_chain::signer::{LocalSigner, SignerError};
use sigil_chain::wallet::{Wallet, WalletError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{SessionKeyData, SessionKeyError};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("no connected account to sign with")]
    NoConnectedAccount,
    #[error("no owner signatures were collected")]
    NoSignatures,
    #[error("duplicate signer {0}")]
    DuplicateSigner(Address),
    #[error("{0} is not an owner of the account")]
    NotAnOwner(Address),
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("session key error: {0}")]
    SessionKey(#[from] SessionKeyError),
    #[error("unknown signature mode {0}")]
    UnknownMode(u8),
    #[error("malformed signature envelope: {0}")]
    Malformed(String),
}

/// Discriminator byte of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureMode {
    Owners = 0,
    Session = 1,
}

impl TryFrom<u8> for SignatureMode {
    type Error = SigningError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Owners),
            1 => Ok(Self::Session),
            other => Err(SigningError::UnknownMode(other)),
        }
    }
}

/// One `(signer, signature)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedSignature {
    pub signer: Address,
    pub signature: Bytes,
}

/// Owner signatures in collection order, at most one per signer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerSignatures {
    signers: Vec<Address>,
    signatures: Vec<Bytes>,
}

impl OwnerSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signer: Address, signature: Bytes) -> Result<(), SigningError> {
        if self.contains(signer) {
            return Err(SigningError::DuplicateSigner(signer));
        }
        self.signers.push(signer);
        self.signatures.push(signature);
        Ok(())
    }

    pub fn contains(&self, signer: Address) -> bool {
        self.signers.contains(&signer)
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn signers(&self) -> &[Address] {
        &self.signers
    }

    pub fn signatures(&self) -> &[Bytes] {
        &self.signatures
    }

    /// Number of signers that appear in `owners`.
    pub fn count_owners(&self, owners: &[Address]) -> usize {
        self.signers.iter().filter(|s| owners.contains(s)).count()
    }
}

/// `(uint8 mode, bytes payload)`, the outer layout of every envelope.
type EnvelopeAbi = (sol_data::Uint<8>, sol_data::Bytes);

/// The mode-tagged signature the smart account validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureEnvelope {
    Owners(OwnerSignatures),
    Session { key: Address, signature: Bytes },
}

impl SignatureEnvelope {
    pub fn mode(&self) -> SignatureMode {
        match self {
            Self::Owners(_) => SignatureMode::Owners,
            Self::Session { .. } => SignatureMode::Session,
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload = match self {
            Self::Owners(owners) => {
                (owners.signers.clone(), owners.signatures.clone()).abi_encode_params()
            }
            Self::Session { key, signature } => (*key, signature.clone()).abi_encode_params(),
        };
        EnvelopeAbi::abi_encode_params(&(self.mode() as u8, Bytes::from(payload))).into()
    }

    pub fn decode(data: &[u8]) -> Result<Self, SigningError> {
        let (mode, payload) = EnvelopeAbi::abi_decode_params(data, true)
            .map_err(|e| SigningError::Malformed(e.to_string()))?;
        match SignatureMode::try_from(mode)? {
            SignatureMode::Owners => {
                let (signers, signatures) =
                    <(Vec<Address>, Vec<Bytes>)>::abi_decode_params(&payload, true)
                        .map_err(|e| SigningError::Malformed(e.to_string()))?;
                if signers.len() != signatures.len() {
                    return Err(SigningError::Malformed(format!(
                        "{} signers but {} signatures",
                        signers.len(),
                        signatures.len()
                    )));
                }
                let mut owners = OwnerSignatures::new();
                for (signer, signature) in signers.into_iter().zip(signatures) {
                    owners.push(signer, signature)?;
                }
                Ok(Self::Owners(owners))
            }
            SignatureMode::Session => {
                let (key, signature) = <(Address, Bytes)>::abi_decode_params(&payload, true)
                    .map_err(|e| SigningError::Malformed(e.to_string()))?;
                Ok(Self::Session { key, signature })
            }
        }
    }
}

/// Sign with the connected wallet account alone.
pub async fn sign_single_owner(
    wallet: &dyn Wallet,
    owner: Option<Address>,
    hash: B256,
) -> Result<SignatureEnvelope, SigningError> {
    let owner = owner.ok_or(SigningError::NoConnectedAccount)?;
    debug!(%owner, %hash, "signing with owner");
    let signature = wallet.sign_personal_message(owner, hash.as_slice()).await?;

    let mut owners = OwnerSignatures::new();
    owners.push(owner, signature)?;
    Ok(SignatureEnvelope::Owners(owners))
}

/// Sign with the connected wallet if it is an owner, then append `additional`
/// signatures in the order given. Every additional signer must be in `owners`.
pub async fn sign_multi_owner(
    wallet: &dyn Wallet,
    connected: Option<Address>,
    owners: &[Address],
    hash: B256,
    additional: Vec<CollectedSignature>,
) -> Result<SignatureEnvelope, SigningError> {
    let connected = connected.ok_or(SigningError::NoConnectedAccount)?;
    let mut collected = OwnerSignatures::new();

    if owners.contains(&connected) {
        debug!(signer = %connected, "signing with connected wallet");
        let signature = wallet.sign_personal_message(connected, hash.as_slice()).await?;
        collected.push(connected, signature)?;
    } else {
        warn!(account = %connected, "connected account is not an owner, skipping its signature");
    }

    for CollectedSignature { signer, signature } in additional {
        if !owners.contains(&signer) {
            return Err(SigningError::NotAnOwner(signer));
        }
        debug!(%signer, "adding collected signature");
        collected.push(signer, signature)?;
    }

    if collected.is_empty() {
        return Err(SigningError::NoSignatures);
    }
    Ok(SignatureEnvelope::Owners(collected))
}

/// Sign with an ephemeral session key. Expired keys and spent one-time keys
/// are refused before anything is signed. Signing does not spend a one-time
/// key; the caller marks it consumed once the bundler accepts the operation.
pub fn sign_with_session_key(
    session: &SessionKeyData,
    hash: B256,
    now: u64,
) -> Result<SignatureEnvelope, SigningError> {
    let signature = session.sign_hash(hash, now)?;
    Ok(SignatureEnvelope::Session {
        key: session.address(),
        signature,
    })
}

/// Produce an owner's signature from a raw key held by the caller, standing
/// in for a signature collected on another device.
pub fn sign_as_owner(signer: &LocalSigner, hash: B256) -> Result<CollectedSignature, SigningError> {
    Ok(CollectedSignature {
        signer: signer.address(),
        signature: signer.sign_message(hash.as_slice())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_chain::signer::recover_signer;
    use sigil_chain::wallet::LocalWallet;

    fn hash() -> B256 {
        B256::repeat_byte(0xab)
    }

    #[test]
    fn test_owners_envelope_round_trip_preserves_order() {
        let mut owners = OwnerSignatures::new();
        owners.push(Address::repeat_byte(2), Bytes::from(vec![2u8; 65])).unwrap();
        owners.push(Address::repeat_byte(1), Bytes::from(vec![1u8; 65])).unwrap();
        let envelope = SignatureEnvelope::Owners(owners);

        let encoded = envelope.encode();
        // abi.encode(uint8, bytes): first word is the mode
        assert_eq!(encoded[31], 0);
        match SignatureEnvelope::decode(&encoded).unwrap() {
            SignatureEnvelope::Owners(decoded) => {
                assert_eq!(decoded.signers(), &[Address::repeat_byte(2), Address::repeat_byte(1)]);
                assert_eq!(decoded.signatures()[0][0], 2);
                assert_eq!(decoded.signatures()[1][0], 1);
            }
            other => panic!("expected owners envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_session_envelope_mode_byte() {
        let envelope = SignatureEnvelope::Session {
            key: Address::repeat_byte(7),
            signature: Bytes::from(vec![9u8; 65]),
        };
        let encoded = envelope.encode();
        assert_eq!(encoded[31], 1);
        assert_eq!(SignatureEnvelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_decode_rejects_unknown_mode() {
        let encoded = EnvelopeAbi::abi_encode_params(&(2u8, Bytes::new()));
        assert!(matches!(
            SignatureEnvelope::decode(&encoded),
            Err(SigningError::UnknownMode(2))
        ));
        assert!(matches!(
            SignatureEnvelope::decode(&[0u8; 5]),
            Err(SigningError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_duplicate_signer() {
        let signer = Address::repeat_byte(3);
        let payload = (vec![signer, signer], vec![Bytes::from(vec![1u8; 65]), Bytes::from(vec![2u8; 65])])
            .abi_encode_params();
        let encoded = EnvelopeAbi::abi_encode_params(&(0u8, Bytes::from(payload)));
        assert!(matches!(
            SignatureEnvelope::decode(&encoded),
            Err(SigningError::DuplicateSigner(a)) if a == signer
        ));
    }

    #[test]
    fn test_envelope_head_layout() {
        let envelope = SignatureEnvelope::Session {
            key: Address::repeat_byte(7),
            signature: Bytes::new(),
        };
        let encoded = envelope.encode();
        // mode word, then the offset of the payload bytes
        assert_eq!(&encoded[..31], &[0u8; 31]);
        assert_eq!(encoded[63], 0x40);
    }

    #[test]
    fn test_duplicate_signer_refused() {
        let mut owners = OwnerSignatures::new();
        owners.push(Address::repeat_byte(1), Bytes::new()).unwrap();
        assert!(matches!(
            owners.push(Address::repeat_byte(1), Bytes::new()),
            Err(SigningError::DuplicateSigner(_))
        ));
        assert_eq!(owners.len(), 1);
    }

    #[tokio::test]
    async fn test_single_owner_signature() {
        let signer = LocalSigner::random();
        let owner = signer.address();
        let wallet = LocalWallet::new(vec![signer], 1);

        let envelope = sign_single_owner(&wallet, Some(owner), hash()).await.unwrap();
        assert_eq!(envelope.mode(), SignatureMode::Owners);
        let SignatureEnvelope::Owners(owners) = envelope else {
            panic!("expected owners mode");
        };
        assert_eq!(owners.signers(), &[owner]);
        assert_eq!(owners.signatures()[0].len(), 65);
        assert_eq!(recover_signer(hash().as_slice(), &owners.signatures()[0]).unwrap(), owner);
    }

    #[tokio::test]
    async fn test_single_owner_requires_account() {
        let wallet = LocalWallet::new(vec![], 1);
        assert!(matches!(
            sign_single_owner(&wallet, None, hash()).await,
            Err(SigningError::NoConnectedAccount)
        ));
    }

    #[tokio::test]
    async fn test_multi_owner_connected_first_then_additional() {
        let first = LocalSigner::random();
        let second = LocalSigner::random();
        let connected = first.address();
        let owners = vec![second.address(), connected];
        let wallet = LocalWallet::new(vec![first], 1);

        let extra = sign_as_owner(&second, hash()).unwrap();
        let envelope = sign_multi_owner(&wallet, Some(connected), &owners, hash(), vec![extra])
            .await
            .unwrap();
        let SignatureEnvelope::Owners(collected) = envelope else {
            panic!("expected owners mode");
        };
        assert_eq!(collected.signers(), &[connected, second.address()]);
        for (signer, sig) in collected.signers().iter().zip(collected.signatures()) {
            assert_eq!(recover_signer(hash().as_slice(), sig).unwrap(), *signer);
        }
    }

    #[tokio::test]
    async fn test_multi_owner_skips_non_owner_wallet() {
        let outsider = LocalSigner::random();
        let owner = LocalSigner::random();
        let connected = outsider.address();
        let wallet = LocalWallet::new(vec![outsider], 1);
        let extra = sign_as_owner(&owner, hash()).unwrap();

        let envelope = sign_multi_owner(&wallet, Some(connected), &[owner.address()], hash(), vec![extra])
            .await
            .unwrap();
        let SignatureEnvelope::Owners(collected) = envelope else {
            panic!("expected owners mode");
        };
        assert_eq!(collected.signers(), &[owner.address()]);

        // Nothing collected at all is an error, not an empty envelope
        assert!(matches!(
            sign_multi_owner(&wallet, Some(connected), &[owner.address()], hash(), vec![]).await,
            Err(SigningError::NoSignatures)
        ));
    }

    #[tokio::test]
    async fn test_multi_owner_refuses_non_owner_co_signer() {
        let owner = LocalSigner::random();
        let outsider = LocalSigner::random();
        let connected = owner.address();
        let extra = sign_as_owner(&outsider, hash()).unwrap();
        let wallet = LocalWallet::new(vec![owner], 1);

        let result = sign_multi_owner(&wallet, Some(connected), &[connected], hash(), vec![extra]).await;
        assert!(matches!(result, Err(SigningError::NotAnOwner(a)) if a == outsider.address()));
    }

    #[tokio::test]
    async fn test_multi_owner_refuses_duplicate_co_signer() {
        let signer = LocalSigner::random();
        let connected = signer.address();
        let dup = sign_as_owner(&signer, hash()).unwrap();
        let wallet = LocalWallet::new(vec![signer], 1);

        let result = sign_multi_owner(&wallet, Some(connected), &[connected], hash(), vec![dup]).await;
        assert!(matches!(result, Err(SigningError::DuplicateSigner(a)) if a == connected));
    }

    #[test]
    fn test_session_key_signature() {
        let session = SessionKeyData::new(LocalSigner::random(), u64::MAX, false);
        let envelope = sign_with_session_key(&session, hash(), 0).unwrap();
        assert_eq!(envelope.mode(), SignatureMode::Session);
        let SignatureEnvelope::Session { key, signature } = envelope else {
            panic!("expected session mode");
        };
        assert_eq!(key, session.address());
        assert_eq!(recover_signer(hash().as_slice(), &signature).unwrap(), key);
    }

    #[test]
    fn test_owner_count() {
        let mut owners = OwnerSignatures::new();
        owners.push(Address::repeat_byte(1), Bytes::new()).unwrap();
        owners.push(Address::repeat_byte(2), Bytes::new()).unwrap();
        assert_eq!(owners.count_owners(&[Address::repeat_byte(2)]), 1);
    }
}
