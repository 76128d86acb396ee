//! Reserve (fee juice) balance reads for the facility.
//!
//! The node's balance query is tried first. If it is unsupported or fails, the
//! balance is read straight from the fee juice contract's public storage at the
//! facility's map slot.
#![forbid(unsafe_code)]

use crate::metrics::{BalanceCheckOutcome, TopupMetrics};
use crate::readiness::ReadinessState;
use fpc_core::rollup::{derive_map_slot, RollupError, RollupNode};
use fpc_core::{now_unix_millis, word_to_u128, Address};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorInitError {
    #[error("failed to read node info: {0}")]
    NodeInfo(#[source] RollupError),
    #[error("node reports a zero fee juice address")]
    ZeroFeeJuiceAddress,
    #[error("facility address must not be zero")]
    ZeroFacilityAddress,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PrimaryReadError {
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("failed: {0}")]
    Failed(RollupError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FallbackReadError {
    #[error("storage read unavailable: {0}")]
    Unavailable(RollupError),
    #[error("malformed storage value: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BalanceReadError {
    /// Primary path unsupported and the storage fallback is disabled.
    #[error("primary balance read unsupported (storage fallback disabled): {0}")]
    PrimaryUnsupported(String),
    /// Primary path failed and the storage fallback is disabled.
    #[error("primary balance read failed (storage fallback disabled): {0}")]
    PrimaryFailed(RollupError),
    #[error("balance read failed: primary {primary}; fallback {fallback}")]
    FallbackFailed {
        primary: PrimaryReadError,
        fallback: FallbackReadError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceReading {
    pub balance: u128,
    pub path: ReadPath,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Storage slot of the fee juice `balances` map.
    pub balances_slot: [u8; 32],
    pub storage_fallback: bool,
}

pub struct ReserveBalanceMonitor<R> {
    rollup: R,
    fee_juice: Address,
    facility: Address,
    balance_slot: [u8; 32],
    storage_fallback: bool,
    readiness: Arc<ReadinessState>,
    metrics: Arc<TopupMetrics>,
}

impl<R: RollupNode> ReserveBalanceMonitor<R> {
    /// Resolve the fee juice address from node info and build the monitor.
    pub async fn connect(
        rollup: R,
        facility: Address,
        cfg: &MonitorConfig,
        readiness: Arc<ReadinessState>,
        metrics: Arc<TopupMetrics>,
    ) -> Result<Self, MonitorInitError> {
        if facility.is_zero() {
            return Err(MonitorInitError::ZeroFacilityAddress);
        }
        let info = rollup
            .node_info()
            .await
            .map_err(MonitorInitError::NodeInfo)?;
        if info.fee_juice_address.is_zero() {
            return Err(MonitorInitError::ZeroFeeJuiceAddress);
        }
        debug!(
            fee_juice = %info.fee_juice_address,
            l1_chain_id = info.l1_chain_id,
            node_version = %info.node_version,
            "resolved fee juice address"
        );
        Ok(Self {
            rollup,
            fee_juice: info.fee_juice_address,
            facility,
            balance_slot: derive_map_slot(&cfg.balances_slot, &facility),
            storage_fallback: cfg.storage_fallback,
            readiness,
            metrics,
        })
    }

    pub fn fee_juice_address(&self) -> Address {
        self.fee_juice
    }

    pub fn facility_address(&self) -> Address {
        self.facility
    }

    pub fn rollup(&self) -> &R {
        &self.rollup
    }

    /// Read the facility's reserve balance and record the outcome for readiness and metrics.
    pub async fn read_balance(&self) -> Result<BalanceReading, BalanceReadError> {
        let res = self.read_uninstrumented().await;
        let now = now_unix_millis();
        match &res {
            Ok(r) => {
                self.readiness.record_check_ok(now);
                self.metrics.set_reserve_balance(r.balance);
                self.metrics.balance_check(match r.path {
                    ReadPath::Primary => BalanceCheckOutcome::Ok,
                    ReadPath::Fallback => BalanceCheckOutcome::FallbackOk,
                });
            }
            Err(e) => {
                self.readiness.record_check_err(now);
                self.metrics.balance_check(BalanceCheckOutcome::Error);
                warn!(event = "balance_check_failed", error = %e);
            }
        }
        res
    }

    async fn read_uninstrumented(&self) -> Result<BalanceReading, BalanceReadError> {
        let primary = match self
            .rollup
            .read_public_balance(&self.fee_juice, &self.facility)
            .await
        {
            Ok(balance) => {
                return Ok(BalanceReading {
                    balance,
                    path: ReadPath::Primary,
                })
            }
            Err(RollupError::Unsupported(m)) => PrimaryReadError::Unsupported(m),
            Err(e) => PrimaryReadError::Failed(e),
        };

        if !self.storage_fallback {
            return Err(match primary {
                PrimaryReadError::Unsupported(m) => BalanceReadError::PrimaryUnsupported(m),
                PrimaryReadError::Failed(e) => BalanceReadError::PrimaryFailed(e),
            });
        }
        if let PrimaryReadError::Failed(e) = &primary {
            debug!(error = %e, "primary balance read failed; trying storage");
        }

        match self.read_storage().await {
            Ok(balance) => Ok(BalanceReading {
                balance,
                path: ReadPath::Fallback,
            }),
            Err(fallback) => Err(BalanceReadError::FallbackFailed { primary, fallback }),
        }
    }

    async fn read_storage(&self) -> Result<u128, FallbackReadError> {
        let word = self
            .rollup
            .public_storage_at(&self.fee_juice, &self.balance_slot)
            .await
            .map_err(|e| match e {
                RollupError::Malformed(m) => FallbackReadError::Malformed(m),
                other => FallbackReadError::Unavailable(other),
            })?;
        word_to_u128(&word).ok_or_else(|| {
            FallbackReadError::Malformed(format!(
                "storage word 0x{} exceeds u128",
                hex::encode(word)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_core::rollup::mock_client::MockRollupNode;
    use fpc_core::u128_word;
    use std::time::Duration;

    fn addr(n: u8) -> Address {
        let mut a = [0u8; 32];
        a[31] = n;
        Address(a)
    }

    fn cfg(storage_fallback: bool) -> MonitorConfig {
        MonitorConfig {
            balances_slot: u128_word(1),
            storage_fallback,
        }
    }

    async fn monitor(
        node: Arc<MockRollupNode>,
        storage_fallback: bool,
    ) -> ReserveBalanceMonitor<Arc<MockRollupNode>> {
        ReserveBalanceMonitor::connect(
            node,
            addr(0xfa),
            &cfg(storage_fallback),
            Arc::new(ReadinessState::new(Duration::from_secs(60))),
            Arc::new(TopupMetrics::new().unwrap()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_zero_fee_juice_and_facility() {
        let node = Arc::new(MockRollupNode::new(Address::ZERO));
        let r = ReserveBalanceMonitor::connect(
            node.clone(),
            addr(1),
            &cfg(true),
            Arc::new(ReadinessState::new(Duration::from_secs(60))),
            Arc::new(TopupMetrics::new().unwrap()),
        )
        .await;
        assert!(matches!(r, Err(MonitorInitError::ZeroFeeJuiceAddress)));

        let r = ReserveBalanceMonitor::connect(
            node,
            Address::ZERO,
            &cfg(true),
            Arc::new(ReadinessState::new(Duration::from_secs(60))),
            Arc::new(TopupMetrics::new().unwrap()),
        )
        .await;
        assert!(matches!(r, Err(MonitorInitError::ZeroFacilityAddress)));
    }

    #[tokio::test]
    async fn primary_path_first() {
        let node = Arc::new(MockRollupNode::new(addr(5)));
        node.set_balance(42);
        let m = monitor(node.clone(), true).await;
        assert_eq!(m.fee_juice_address(), addr(5));
        let r = m.read_balance().await.unwrap();
        assert_eq!(r, BalanceReading { balance: 42, path: ReadPath::Primary });
        assert_eq!(node.last_storage_slot(), None);
        assert_eq!(m.metrics.balance_checks(BalanceCheckOutcome::Ok), 1);
        assert_eq!(m.readiness.checks_ok(), 1);
    }

    #[tokio::test]
    async fn unsupported_primary_falls_back_to_facility_slot() {
        let node = Arc::new(MockRollupNode::new(addr(5)).without_primary_read());
        node.set_balance(9);
        let m = monitor(node.clone(), true).await;
        let r = m.read_balance().await.unwrap();
        assert_eq!(r, BalanceReading { balance: 9, path: ReadPath::Fallback });
        assert_eq!(
            node.last_storage_slot(),
            Some(derive_map_slot(&u128_word(1), &addr(0xfa)))
        );
        assert_eq!(m.metrics.balance_checks(BalanceCheckOutcome::FallbackOk), 1);
    }

    #[tokio::test]
    async fn both_paths_failing_is_typed() {
        let node = Arc::new(MockRollupNode::new(addr(5)));
        node.fail_balance_reads(1);
        let m = monitor(node.clone(), true).await;
        match m.read_balance().await {
            Err(BalanceReadError::FallbackFailed {
                primary: PrimaryReadError::Failed(_),
                fallback: FallbackReadError::Unavailable(_),
            }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(m.readiness.checks_failed(), 1);
        assert_eq!(m.metrics.balance_checks(BalanceCheckOutcome::Error), 1);

        // The failure budget is spent; the next read succeeds on the primary path.
        assert!(m.read_balance().await.is_ok());
    }

    #[tokio::test]
    async fn disabled_fallback_surfaces_primary_error() {
        let node = Arc::new(MockRollupNode::new(addr(5)).without_primary_read());
        let m = monitor(node, false).await;
        assert!(matches!(
            m.read_balance().await,
            Err(BalanceReadError::PrimaryUnsupported(_))
        ));
    }
}
