//! Startup recovery of a bridge left unconfirmed by a previous process.
#![forbid(unsafe_code)]

use crate::bridge_store::{BridgeRecord, BridgeStoreError};
use crate::checker::TopupChecker;
use crate::confirm::{ConfirmationResult, ConfirmationStatus};
use fpc_core::now_unix_millis;
use fpc_core::portal::SettlementBridge;
use fpc_core::rollup::RollupNode;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No persisted record.
    None,
    /// The persisted bridge landed; the record was cleared.
    Confirmed(ConfirmationResult),
    /// Still unconfirmed (timeout or shutdown); the record was kept.
    Retained(ConfirmationResult),
}

/// Wait budget left for a record submitted at `submitted_at_ms`.
///
/// Never below `poll_min`, so a resumed wait always makes at least one check.
pub fn remaining_budget(
    timeout: Duration,
    poll_min: Duration,
    submitted_at_ms: u64,
    now_ms: u64,
) -> Duration {
    let age = Duration::from_millis(now_ms.saturating_sub(submitted_at_ms));
    timeout.saturating_sub(age).max(poll_min)
}

impl<R: RollupNode, B: SettlementBridge> TopupChecker<R, B> {
    /// Run once before the periodic loop. A corrupt state file is an error.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, BridgeStoreError> {
        let Some(record) = self.store.load()? else {
            info!(event = "reconcile", outcome = "none");
            return Ok(ReconcileOutcome::None);
        };
        info!(
            event = "reconcile",
            outcome = "resume",
            message_hash = %hex::encode(record.message_hash),
            leaf_index = record.message_leaf_index,
            baseline = %record.baseline_balance,
            amount = %record.amount,
            submitted_at_ms = record.submitted_at_ms,
        );

        let _flight = self.readiness().try_begin_flight();
        let result = self.resume(&record, now_unix_millis()).await;
        Ok(match result.status {
            ConfirmationStatus::Confirmed => ReconcileOutcome::Confirmed(result),
            ConfirmationStatus::Timeout | ConfirmationStatus::Aborted => {
                warn!(
                    event = "reconcile_unresolved",
                    status = result.status.as_str(),
                    path = %self.store.path().display(),
                    "bridge not confirmed; it will not be resubmitted, manual reconciliation may be needed"
                );
                ReconcileOutcome::Retained(result)
            }
        })
    }

    /// Wait on a persisted record with whatever budget it has left.
    pub(crate) async fn resume(&self, record: &BridgeRecord, now_ms: u64) -> ConfirmationResult {
        let budget = remaining_budget(
            self.policy.wait.timeout,
            self.policy.wait.poll_min,
            record.submitted_at_ms,
            now_ms,
        );
        let result = self.wait(record, budget).await;
        self.finish(record, &result);
        result
    }
}
