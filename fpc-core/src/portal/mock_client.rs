//! In-memory settlement bridge for tests and the offline `mock` backend.
#![forbid(unsafe_code)]

use super::{BridgeError, DepositReceipt, DepositRequest, SettlementBridge};
use crate::rollup::mock_client::MockRollupNode;
use crate::u128_word;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records deposits and, when linked to a [`MockRollupNode`], lands them there.
#[derive(Debug, Default)]
pub struct MockSettlementBridge {
    rollup: Option<Arc<MockRollupNode>>,
    credit_after_reads: u32,
    message_ready_after_checks: u32,
    latency: Option<Duration>,
    fail_next: AtomicU32,
    next_leaf: AtomicU64,
    deposits: Mutex<Vec<DepositRequest>>,
}

impl MockSettlementBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit the recipient on `rollup` after `credit_after_reads` balance reads, and
    /// mark the message ready after `message_ready_after_checks` readiness checks.
    pub fn linked(
        rollup: Arc<MockRollupNode>,
        credit_after_reads: u32,
        message_ready_after_checks: u32,
    ) -> Self {
        Self {
            rollup: Some(rollup),
            credit_after_reads,
            message_ready_after_checks,
            ..Self::default()
        }
    }

    /// Simulated L1 round-trip time for each deposit.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn deposits(&self) -> Vec<DepositRequest> {
        self.deposits
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn message_hash(req: &DepositRequest, leaf: u64) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        h.update(b"mock-l1-to-l2");
        h.update(req.recipient.as_bytes());
        h.update(&u128_word(req.amount));
        h.update(&req.claim_secret_hash);
        h.update(&leaf.to_be_bytes());
        *h.finalize().as_bytes()
    }
}

#[async_trait]
impl SettlementBridge for MockSettlementBridge {
    async fn deposit_to_public(&self, req: &DepositRequest) -> Result<DepositReceipt, BridgeError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BridgeError::Network("mock deposit failure".to_string()));
        }

        let leaf = self.next_leaf.fetch_add(1, Ordering::SeqCst);
        let message_hash = Self::message_hash(req, leaf);
        if let Ok(mut d) = self.deposits.lock() {
            d.push(req.clone());
        }
        if let Some(rollup) = &self.rollup {
            rollup.schedule_credit(req.amount, self.credit_after_reads);
            rollup.register_message(message_hash, self.message_ready_after_checks);
        }
        Ok(DepositReceipt {
            message_hash,
            message_leaf_index: leaf,
            l1_tx_hash: Some(format!("0x{}", hex::encode(&message_hash[..8]))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;

    fn req(amount: u128) -> DepositRequest {
        DepositRequest {
            recipient: Address([9u8; 32]),
            amount,
            claim_secret_hash: [1u8; 32],
        }
    }

    #[tokio::test]
    async fn failures_are_consumed_then_deposits_succeed() {
        let b = MockSettlementBridge::new();
        b.fail_next(1);
        assert!(b.deposit_to_public(&req(1)).await.is_err());
        let r = b.deposit_to_public(&req(1)).await.unwrap();
        assert_eq!(r.message_leaf_index, 0);
        assert_eq!(b.deposit_count(), 1);
    }

    #[tokio::test]
    async fn leaf_indices_increase() {
        let b = MockSettlementBridge::new();
        let a = b.deposit_to_public(&req(1)).await.unwrap();
        let c = b.deposit_to_public(&req(1)).await.unwrap();
        assert_eq!(c.message_leaf_index, a.message_leaf_index + 1);
        assert_ne!(a.message_hash, c.message_hash);
    }
}
