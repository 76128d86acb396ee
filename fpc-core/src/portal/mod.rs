//! Settlement-layer bridge contract.
//!
//! A deposit moves gas-reserve value from L1 into a rollup account's public
//! balance and yields an L1→L2 message that becomes consumable on the rollup.
//! Adapters: [`ethers_client::EthersFeeJuicePortal`] (L1 via ethers) and
//! [`mock_client::MockSettlementBridge`].
#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

pub mod ethers_client;
pub mod mock_client;

use crate::Address;
use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;

/// Domain tag for claim-secret hashing (v1).
pub const CLAIM_SECRET_DOMAIN_V1: &[u8] = b"fpc:claim-secret:v1";

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("transaction dropped: {0}")]
    Dropped(String),
    #[error("malformed receipt: {0}")]
    Malformed(String),
}

/// Secret a claimer reveals on the rollup side to consume a deposit message.
#[derive(Clone, PartialEq, Eq)]
pub struct ClaimSecret([u8; 32]);

impl ClaimSecret {
    /// Fresh random secret. The top byte is cleared so the value is a valid field element.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] = 0;
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hash(&self) -> [u8; 32] {
        claim_secret_hash(&self.0)
    }
}

impl std::fmt::Debug for ClaimSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClaimSecret(<redacted>)")
    }
}

/// `blake3(CLAIM_SECRET_DOMAIN_V1 || secret)` with the top byte cleared.
pub fn claim_secret_hash(secret: &[u8; 32]) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(CLAIM_SECRET_DOMAIN_V1);
    h.update(secret);
    let mut out = *h.finalize().as_bytes();
    out[0] = 0;
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRequest {
    pub recipient: Address,
    pub amount: u128,
    pub claim_secret_hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    /// L1→L2 message identifier.
    pub message_hash: [u8; 32],
    pub message_leaf_index: u64,
    pub l1_tx_hash: Option<String>,
}

#[async_trait]
pub trait SettlementBridge: Send + Sync {
    async fn deposit_to_public(&self, req: &DepositRequest) -> Result<DepositReceipt, BridgeError>;
}

#[async_trait]
impl<T: SettlementBridge + ?Sized> SettlementBridge for Arc<T> {
    async fn deposit_to_public(&self, req: &DepositRequest) -> Result<DepositReceipt, BridgeError> {
        (**self).deposit_to_public(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_field_sized_and_distinct() {
        let a = ClaimSecret::generate();
        let b = ClaimSecret::generate();
        assert_eq!(a.as_bytes()[0], 0);
        assert_ne!(a, b);
        assert_eq!(a.hash()[0], 0);
    }

    #[test]
    fn secret_hash_is_deterministic() {
        let s = ClaimSecret::from_bytes([5u8; 32]);
        assert_eq!(s.hash(), claim_secret_hash(&[5u8; 32]));
        assert_ne!(s.hash(), claim_secret_hash(&[6u8; 32]));
        assert_eq!(format!("{s:?}"), "ClaimSecret(<redacted>)");
    }
}
