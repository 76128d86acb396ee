//! Rollup node contract.
//!
//! Everything the top-up controller needs from the rollup node, expressed as a
//! transport-agnostic async trait. Adapters: [`http_client::JsonRpcRollupNode`]
//! (JSON-RPC over HTTP) and [`mock_client::MockRollupNode`] (offline, scripted).
#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]

pub mod http_client;
pub mod mock_client;

use crate::Address;
use async_trait::async_trait;
use std::sync::Arc;

/// Node metadata used at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address of the gas-reserve (fee juice) asset contract.
    pub fee_juice_address: Address,
    pub l1_chain_id: u64,
    pub node_version: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RollupError {
    #[error("not supported by this node: {0}")]
    Unsupported(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait RollupNode: Send + Sync {
    async fn node_info(&self) -> Result<NodeInfo, RollupError>;

    /// Primary balance read (a high-level balance query served by the node).
    ///
    /// Nodes that cannot serve it return [`RollupError::Unsupported`].
    async fn read_public_balance(
        &self,
        token: &Address,
        owner: &Address,
    ) -> Result<u128, RollupError>;

    /// Raw public storage word of `contract` at `slot`.
    async fn public_storage_at(
        &self,
        contract: &Address,
        slot: &[u8; 32],
    ) -> Result<[u8; 32], RollupError>;

    /// Whether the L1→L2 message identified by `message_hash` is consumable on the rollup.
    async fn is_l1_to_l2_message_ready(&self, message_hash: &[u8; 32])
        -> Result<bool, RollupError>;
}

#[async_trait]
impl<T: RollupNode + ?Sized> RollupNode for Arc<T> {
    async fn node_info(&self) -> Result<NodeInfo, RollupError> {
        (**self).node_info().await
    }

    async fn read_public_balance(
        &self,
        token: &Address,
        owner: &Address,
    ) -> Result<u128, RollupError> {
        (**self).read_public_balance(token, owner).await
    }

    async fn public_storage_at(
        &self,
        contract: &Address,
        slot: &[u8; 32],
    ) -> Result<[u8; 32], RollupError> {
        (**self).public_storage_at(contract, slot).await
    }

    async fn is_l1_to_l2_message_ready(
        &self,
        message_hash: &[u8; 32],
    ) -> Result<bool, RollupError> {
        (**self).is_l1_to_l2_message_ready(message_hash).await
    }
}

/// Domain tag for map-slot derivation (v1).
pub const MAP_SLOT_DOMAIN_V1: &[u8] = b"fpc:map-slot:v1";

/// Storage slot of `map[key]` for a map rooted at `base_slot`.
///
/// `blake3(MAP_SLOT_DOMAIN_V1 || base_slot || key)`. Storage layouts are
/// protocol-specific: re-validate this against the target rollup before relying
/// on the fallback read path.
pub fn derive_map_slot(base_slot: &[u8; 32], key: &Address) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(MAP_SLOT_DOMAIN_V1);
    h.update(base_slot);
    h.update(key.as_bytes());
    *h.finalize().as_bytes()
}
