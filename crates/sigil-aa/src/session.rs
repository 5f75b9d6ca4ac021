use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use sigil_chain::signer::{LocalSigner, SecretBytes, SignerError};
use thiserror::Error;
use tracing::debug;

/// Validity of a freshly generated key when none is given.
pub const DEFAULT_SESSION_VALIDITY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("session key {key} expired at {expires_at}")]
    Expired { key: Address, expires_at: u64 },
    #[error("one-time session key {0} has already been used")]
    AlreadyUsed(Address),
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// An ephemeral key the smart account accepts in place of an owner signature.
///
/// Held in memory only. The private key is zeroized when this value is
/// dropped and never shows up in `Debug` output.
#[derive(Debug)]
pub struct SessionKeyData {
    signer: LocalSigner,
    expires_at: u64,
    one_time: bool,
    consumed: bool,
}

impl SessionKeyData {
    /// Generate a new key valid for `valid_for` from now.
    pub fn generate(valid_for: Duration, one_time: bool) -> Self {
        let key = Self::new(
            LocalSigner::random(),
            unix_now().saturating_add(valid_for.as_secs()),
            one_time,
        );
        debug!(address = %key.address(), expires_at = key.expires_at, one_time, "session key generated");
        key
    }

    pub fn new(signer: LocalSigner, expires_at: u64, one_time: bool) -> Self {
        Self {
            signer,
            expires_at,
            one_time,
            consumed: false,
        }
    }

    /// Restore a key from its raw private key, e.g. from the environment.
    pub fn from_secret(secret: &SecretBytes, expires_at: u64, one_time: bool) -> Result<Self, SignerError> {
        Ok(Self::new(LocalSigner::from_secret(secret)?, expires_at, one_time))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn one_time(&self) -> bool {
        self.one_time
    }

    /// True once an operation signed by this one-time key was accepted.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn secret(&self) -> SecretBytes {
        self.signer.secret()
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn ensure_usable(&self, now: u64) -> Result<(), SessionKeyError> {
        if self.is_expired_at(now) {
            return Err(SessionKeyError::Expired {
                key: self.address(),
                expires_at: self.expires_at,
            });
        }
        if self.one_time && self.consumed {
            return Err(SessionKeyError::AlreadyUsed(self.address()));
        }
        Ok(())
    }

    /// Personal-sign `hash` with the session key. A consumed one-time key
    /// refuses to sign.
    pub(crate) fn sign_hash(&self, hash: B256, now: u64) -> Result<Bytes, crate::signature::SigningError> {
        self.ensure_usable(now)?;
        Ok(self.signer.sign_message(hash.as_slice())?)
    }

    /// Spend a one-time key. No-op for reusable keys.
    pub(crate) fn mark_consumed(&mut self) {
        if self.one_time {
            self.consumed = true;
        }
    }
}
