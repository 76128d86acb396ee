#![forbid(unsafe_code)]

//! Quote signers.
//!
//! - Message: the 32-byte quote preimage hash (already domain-separated).
//! - Default scheme: Ed25519.

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Produces signatures over quote preimage hashes.
pub trait QuoteSigner: Send + Sync {
    fn sign_hash(&self, hash: &[u8; 32]) -> Result<Vec<u8>, SigningError>;

    /// Hex-encoded public key, for startup logging.
    fn public_key_hex(&self) -> String;
}

impl<T: QuoteSigner + ?Sized> QuoteSigner for std::sync::Arc<T> {
    fn sign_hash(&self, hash: &[u8; 32]) -> Result<Vec<u8>, SigningError> {
        (**self).sign_hash(hash)
    }

    fn public_key_hex(&self) -> String {
        (**self).public_key_hex()
    }
}

/// Local Ed25519 key.
pub struct Ed25519QuoteSigner {
    key: SigningKey,
}

impl Ed25519QuoteSigner {
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a 32-byte secret key from hex (optional `0x`, whitespace ignored).
    pub fn from_hex(secret_hex: &str) -> Result<Self, SigningError> {
        let cleaned: String = secret_hex.chars().filter(|c| !c.is_whitespace()).collect();
        let digits = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
        let raw = hex::decode(digits).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let secret: [u8; 32] = raw.try_into().map_err(|v: Vec<u8>| {
            SigningError::InvalidKey(format!("expected 32-byte key, got {}", v.len()))
        })?;
        Ok(Self::from_secret_bytes(secret))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl std::fmt::Debug for Ed25519QuoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519QuoteSigner")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl QuoteSigner for Ed25519QuoteSigner {
    fn sign_hash(&self, hash: &[u8; 32]) -> Result<Vec<u8>, SigningError> {
        Ok(self.key.sign(hash).to_bytes().to_vec())
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}

/// Check an Ed25519 signature over a preimage hash.
pub fn verify_ed25519(public_key: &VerifyingKey, hash: &[u8; 32], signature: &[u8]) -> bool {
    let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };
    public_key.verify(hash, &sig).is_ok()
}
