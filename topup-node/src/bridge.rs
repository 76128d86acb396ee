//! Deposit submission to the settlement-layer fee juice bridge.
#![forbid(unsafe_code)]

use fpc_core::portal::{BridgeError, ClaimSecret, DepositReceipt, DepositRequest, SettlementBridge};
use fpc_core::Address;
use tracing::info;

/// A deposit accepted by the settlement layer.
#[derive(Debug, Clone)]
pub struct SubmittedBridge {
    pub amount: u128,
    /// Revealed on the rollup to claim the deposit. Debug output is redacted.
    pub claim_secret: ClaimSecret,
    pub claim_secret_hash: [u8; 32],
    pub receipt: DepositReceipt,
}

/// Sends gas-reserve deposits from L1 to the facility's public balance.
pub struct BridgeSubmitter<B> {
    bridge: B,
    recipient: Address,
}

impl<B: SettlementBridge> BridgeSubmitter<B> {
    pub fn new(bridge: B, recipient: Address) -> Self {
        Self { bridge, recipient }
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    /// Each submission uses a fresh claim secret. Only its hash goes to the bridge; the
    /// secret itself is returned to the caller with the receipt.
    pub async fn submit(&self, amount: u128) -> Result<SubmittedBridge, BridgeError> {
        let secret = ClaimSecret::generate();
        let req = DepositRequest {
            recipient: self.recipient,
            amount,
            claim_secret_hash: secret.hash(),
        };
        let receipt = self.bridge.deposit_to_public(&req).await?;
        info!(
            event = "bridge_submitted",
            recipient = %self.recipient,
            amount = %amount,
            message_hash = %hex::encode(receipt.message_hash),
            leaf_index = receipt.message_leaf_index,
            l1_tx = receipt.l1_tx_hash.as_deref().unwrap_or("-"),
        );
        Ok(SubmittedBridge {
            amount,
            claim_secret: secret,
            claim_secret_hash: req.claim_secret_hash,
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_core::portal::mock_client::MockSettlementBridge;
    use std::sync::Arc;

    #[tokio::test]
    async fn submits_to_recipient_with_fresh_secret_hash() {
        let mock = Arc::new(MockSettlementBridge::new());
        let s = BridgeSubmitter::new(mock.clone(), Address([7u8; 32]));

        let a = s.submit(2).await.unwrap();
        let b = s.submit(2).await.unwrap();
        assert_ne!(a.claim_secret_hash, b.claim_secret_hash);
        assert_eq!(a.claim_secret_hash[0], 0);
        assert_eq!(a.claim_secret.hash(), a.claim_secret_hash);
        assert_eq!(a.claim_secret.as_bytes()[0], 0);
        assert!(format!("{a:?}").contains("<redacted>"));

        let sent = mock.deposits();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipient, Address([7u8; 32]));
        assert_eq!(sent[0].amount, 2);
        assert_eq!(sent[0].claim_secret_hash, a.claim_secret_hash);
    }

    #[tokio::test]
    async fn bridge_errors_propagate() {
        let mock = Arc::new(MockSettlementBridge::new());
        mock.fail_next(1);
        let s = BridgeSubmitter::new(mock.clone(), Address([7u8; 32]));
        assert!(matches!(s.submit(1).await, Err(BridgeError::Network(_))));
        assert_eq!(mock.deposit_count(), 0);
    }
}
