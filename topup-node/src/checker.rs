//! Periodic top-up decision loop.
//!
//! One tick: read the reserve balance; if it is below the threshold and no
//! bridge is in flight, submit a deposit, persist the bridge record, then wait
//! for confirmation. A persisted record from an earlier tick (or an earlier
//! process) is always waited on again instead of submitting a second deposit.
#![forbid(unsafe_code)]

use crate::bridge::{BridgeSubmitter, SubmittedBridge};
use crate::bridge_store::{BridgeRecord, BridgeStateStore};
use crate::confirm::{
    cancelled, wait_for_confirmation, ConfirmationResult, ConfirmationStatus, ConfirmedBy,
    WaitConfig, WaitTarget,
};
use crate::metrics::TopupMetrics;
use crate::monitor::ReserveBalanceMonitor;
use crate::readiness::{BridgeEvent, ReadinessState};
use fpc_core::now_unix_millis;
use fpc_core::portal::SettlementBridge;
use fpc_core::rollup::RollupNode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TopupPolicy {
    /// Top up when the reserve balance is strictly below this.
    pub threshold: u128,
    pub amount: u128,
    pub check_interval: Duration,
    /// No new submission for this long after a confirmed bridge.
    pub cooldown: Duration,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    SkippedInFlight,
    StoreFailed,
    BalanceReadFailed,
    AboveThreshold { balance: u128 },
    CoolingDown { balance: u128 },
    SubmitFailed,
    /// Waited on a record persisted by an earlier tick or process.
    Resumed(ConfirmationResult),
    Bridged(ConfirmationResult),
}

pub struct TopupChecker<R, B> {
    pub(crate) monitor: ReserveBalanceMonitor<R>,
    submitter: BridgeSubmitter<B>,
    pub(crate) store: BridgeStateStore,
    readiness: Arc<ReadinessState>,
    metrics: Arc<TopupMetrics>,
    pub(crate) policy: TopupPolicy,
    pub(crate) cancel: watch::Receiver<bool>,
    cooldown_until: Mutex<Option<Instant>>,
    /// Submitted but not yet on disk. Blocks new submissions like a stored record.
    unpersisted: Mutex<Option<BridgeRecord>>,
    last_submission: Mutex<Option<SubmittedBridge>>,
}

impl<R: RollupNode, B: SettlementBridge> TopupChecker<R, B> {
    pub fn new(
        monitor: ReserveBalanceMonitor<R>,
        submitter: BridgeSubmitter<B>,
        store: BridgeStateStore,
        readiness: Arc<ReadinessState>,
        metrics: Arc<TopupMetrics>,
        policy: TopupPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            monitor,
            submitter,
            store,
            readiness,
            metrics,
            policy,
            cancel,
            cooldown_until: Mutex::new(None),
            unpersisted: Mutex::new(None),
            last_submission: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &BridgeStateStore {
        &self.store
    }

    pub fn readiness(&self) -> &Arc<ReadinessState> {
        &self.readiness
    }

    pub fn policy(&self) -> &TopupPolicy {
        &self.policy
    }

    pub fn cooling_down(&self) -> bool {
        let until = *self
            .cooldown_until
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        until.is_some_and(|t| Instant::now() < t)
    }

    /// Claim material of the most recent deposit. The secret is what claims it on the rollup.
    pub fn last_submission(&self) -> Option<SubmittedBridge> {
        self.last_submission
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// A bridge whose record could not be written yet.
    pub fn unpersisted(&self) -> Option<BridgeRecord> {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Write `record`; on failure keep it in memory so later ticks resume and retry.
    fn persist(&self, record: &BridgeRecord) {
        let mut slot = self.unpersisted.lock().unwrap_or_else(|e| e.into_inner());
        match self.store.save(record) {
            Ok(()) => {
                if slot.take().is_some() {
                    info!(
                        event = "bridge_state_persisted",
                        message_hash = %hex::encode(record.message_hash),
                    );
                }
            }
            Err(e) => {
                error!(
                    event = "bridge_state_persist_failed",
                    error = %e,
                    "record kept in memory; no new bridge until it is written or confirmed"
                );
                *slot = Some(record.clone());
            }
        }
    }

    pub(crate) fn record_event(&self, ev: BridgeEvent) {
        self.readiness.record_bridge_event(ev);
        self.metrics.bridge_event(ev);
    }

    pub async fn tick(&self) -> TickOutcome {
        // Taken before the first await: a concurrent tick sees the flag and backs off.
        let Some(_flight) = self.readiness.try_begin_flight() else {
            debug!(event = "topup_tick_skipped", reason = "bridge_in_flight");
            return TickOutcome::SkippedInFlight;
        };

        if let Some(record) = self.unpersisted() {
            self.persist(&record);
            let result = self.resume(&record, now_unix_millis()).await;
            return TickOutcome::Resumed(result);
        }

        match self.store.load() {
            Ok(Some(record)) => {
                info!(
                    event = "bridge_resume",
                    message_hash = %hex::encode(record.message_hash),
                    baseline = %record.baseline_balance,
                    "persisted bridge still unconfirmed; waiting instead of submitting"
                );
                let result = self.resume(&record, now_unix_millis()).await;
                return TickOutcome::Resumed(result);
            }
            Ok(None) => {}
            Err(e) => {
                error!(event = "bridge_state_load_failed", error = %e);
                return TickOutcome::StoreFailed;
            }
        }

        let balance = match self.monitor.read_balance().await {
            Ok(r) => r.balance,
            Err(_) => return TickOutcome::BalanceReadFailed,
        };
        if self.cooling_down() {
            return TickOutcome::CoolingDown { balance };
        }
        if balance >= self.policy.threshold {
            debug!(balance = %balance, threshold = %self.policy.threshold, "reserve above threshold");
            return TickOutcome::AboveThreshold { balance };
        }

        info!(
            event = "topup_needed",
            balance = %balance,
            threshold = %self.policy.threshold,
            amount = %self.policy.amount,
        );
        let submitted = match self.submitter.submit(self.policy.amount).await {
            Ok(s) => s,
            Err(e) => {
                warn!(event = "bridge_submit_failed", error = %e);
                self.record_event(BridgeEvent::Failed);
                return TickOutcome::SubmitFailed;
            }
        };
        self.record_event(BridgeEvent::Submitted);

        let record = BridgeRecord {
            baseline_balance: balance,
            amount: submitted.amount,
            claim_secret_hash: submitted.claim_secret_hash,
            message_hash: submitted.receipt.message_hash,
            message_leaf_index: submitted.receipt.message_leaf_index,
            submitted_at_ms: now_unix_millis(),
        };
        *self
            .last_submission
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(submitted);
        // The deposit is already on L1: wait on it even if the write failed.
        self.persist(&record);

        let result = self.wait(&record, self.policy.wait.timeout).await;
        self.finish(&record, &result);
        TickOutcome::Bridged(result)
    }

    pub(crate) async fn wait(&self, record: &BridgeRecord, budget: Duration) -> ConfirmationResult {
        let cfg = WaitConfig {
            timeout: budget,
            ..self.policy.wait.clone()
        };
        wait_for_confirmation(
            &self.monitor,
            WaitTarget {
                baseline_balance: record.baseline_balance,
                message_hash: Some(record.message_hash),
            },
            &cfg,
            self.cancel.clone(),
        )
        .await
    }

    /// Clear on confirmation, retain otherwise.
    pub(crate) fn finish(&self, record: &BridgeRecord, result: &ConfirmationResult) {
        let elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX);
        let message_hash = hex::encode(record.message_hash);
        match result.status {
            ConfirmationStatus::Confirmed => {
                if let Err(e) = self.store.clear() {
                    error!(event = "bridge_state_clear_failed", error = %e);
                }
                *self.unpersisted.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.record_event(BridgeEvent::Confirmed);
                *self
                    .cooldown_until
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + self.policy.cooldown);
                info!(
                    event = "bridge_confirmed",
                    message_hash = %message_hash,
                    confirmed_by = result.confirmed_by.map(ConfirmedBy::as_str).unwrap_or("-"),
                    observed_delta = %result.observed_delta,
                    attempts = result.attempts,
                    elapsed_ms,
                );
            }
            ConfirmationStatus::Timeout => {
                self.record_event(BridgeEvent::Timeout);
                warn!(
                    event = "bridge_confirmation_timeout",
                    message_hash = %message_hash,
                    attempts = result.attempts,
                    poll_errors = result.poll_errors,
                    message_check_failed = result.message_check_failed,
                    elapsed_ms,
                    "bridge record retained"
                );
            }
            ConfirmationStatus::Aborted => {
                self.record_event(BridgeEvent::Aborted);
                warn!(
                    event = "bridge_confirmation_aborted",
                    message_hash = %message_hash,
                    elapsed_ms,
                    "bridge record retained"
                );
            }
        }
    }

    /// Tick every `check_interval` until `cancel` flips to `true`.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(
            threshold = %self.policy.threshold,
            amount = %self.policy.amount,
            interval_ms = u64::try_from(self.policy.check_interval.as_millis()).unwrap_or(u64::MAX),
            facility = %self.monitor.facility_address(),
            "starting top-up checker"
        );
        let mut interval = tokio::time::interval(self.policy.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    debug!(outcome = ?outcome, "top-up tick done");
                }
                _ = cancelled(&mut cancel) => {
                    info!("top-up checker shutting down");
                    break;
                }
            }
        }
    }
}
