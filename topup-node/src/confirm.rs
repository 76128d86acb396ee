//! Waits for a submitted bridge to land on the rollup.
//!
//! Two independent pollers race into a first-write-wins slot:
//! - the reserve balance rising above the pre-submission baseline;
//! - the node reporting the L1→L2 message as ready.
//!
//! Either one confirms. A failing message check disables only that poller. The
//! whole attempt is bounded by a wall-clock timeout and stops early when the
//! cancel channel flips to `true`.
#![forbid(unsafe_code)]

use crate::monitor::ReserveBalanceMonitor;
use fpc_core::rollup::RollupNode;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub poll_min: Duration,
    pub poll_max: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed,
    Timeout,
    Aborted,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmedBy {
    BalanceDelta,
    MessageReady,
}

impl ConfirmedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BalanceDelta => "balance_delta",
            Self::MessageReady => "message_ready",
        }
    }
}

/// What the waiter is looking for.
#[derive(Debug, Clone, Copy)]
pub struct WaitTarget {
    pub baseline_balance: u128,
    pub message_hash: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    pub confirmed_by: Option<ConfirmedBy>,
    pub baseline_balance: u128,
    pub max_observed_balance: u128,
    pub last_observed_balance: Option<u128>,
    pub observed_delta: u128,
    pub elapsed: Duration,
    /// Balance reads performed.
    pub attempts: u32,
    pub poll_errors: u32,
    pub message_check_attempted: bool,
    pub message_ready: bool,
    pub message_check_failed: bool,
}

#[derive(Debug, Default)]
struct Observed {
    max_balance: Option<u128>,
    last_balance: Option<u128>,
    attempts: u32,
    poll_errors: u32,
    message_check_attempted: bool,
    message_ready: bool,
    message_check_failed: bool,
}

/// The first signal to fire is kept; later offers are ignored.
#[derive(Debug, Default)]
struct FirstSignal(OnceLock<ConfirmedBy>);

impl FirstSignal {
    fn offer(&self, by: ConfirmedBy) {
        let _ = self.0.set(by);
    }

    fn get(&self) -> Option<ConfirmedBy> {
        self.0.get().copied()
    }
}

fn next_interval(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Resolves once `cancel` reads `true`. A dropped sender never cancels.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub async fn wait_for_confirmation<R: RollupNode>(
    monitor: &ReserveBalanceMonitor<R>,
    target: WaitTarget,
    cfg: &WaitConfig,
    mut cancel: watch::Receiver<bool>,
) -> ConfirmationResult {
    let started = Instant::now();
    let deadline = started + cfg.timeout;
    let poll_min = cfg.poll_min.max(Duration::from_millis(1));
    let poll_max = cfg.poll_max.max(poll_min);

    let slot = FirstSignal::default();
    let observed = Mutex::new(Observed::default());
    let observe = |f: &mut dyn FnMut(&mut Observed)| {
        let mut o = observed.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut o);
    };

    let balance_poller = async {
        let mut interval = poll_min;
        loop {
            let read = monitor.read_balance().await;
            let mut rose = false;
            observe(&mut |o| {
                o.attempts = o.attempts.saturating_add(1);
                match &read {
                    Ok(r) => {
                        o.last_balance = Some(r.balance);
                        o.max_balance = Some(o.max_balance.map_or(r.balance, |m| m.max(r.balance)));
                        rose = r.balance > target.baseline_balance;
                    }
                    Err(_) => o.poll_errors = o.poll_errors.saturating_add(1),
                }
            });
            if rose {
                slot.offer(ConfirmedBy::BalanceDelta);
                return;
            }
            tokio::time::sleep(interval).await;
            interval = next_interval(interval, poll_max);
        }
    };

    let message_poller = async {
        let Some(hash) = target.message_hash else {
            return std::future::pending::<()>().await;
        };
        let mut interval = poll_min;
        loop {
            let check = monitor.rollup().is_l1_to_l2_message_ready(&hash).await;
            observe(&mut |o| o.message_check_attempted = true);
            match check {
                Ok(true) => {
                    observe(&mut |o| o.message_ready = true);
                    slot.offer(ConfirmedBy::MessageReady);
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        event = "message_check_failed",
                        error = %e,
                        "falling back to balance delta only"
                    );
                    observe(&mut |o| o.message_check_failed = true);
                    return std::future::pending::<()>().await;
                }
            }
            tokio::time::sleep(interval).await;
            interval = next_interval(interval, poll_max);
        }
    };

    let status = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => ConfirmationStatus::Aborted,
        _ = tokio::time::sleep_until(deadline) => ConfirmationStatus::Timeout,
        _ = balance_poller => ConfirmationStatus::Confirmed,
        _ = message_poller => ConfirmationStatus::Confirmed,
    };

    let o = observed.into_inner().unwrap_or_else(|e| e.into_inner());
    let max_observed = o
        .max_balance
        .map_or(target.baseline_balance, |m| m.max(target.baseline_balance));
    let result = ConfirmationResult {
        status,
        confirmed_by: if status == ConfirmationStatus::Confirmed {
            slot.get()
        } else {
            None
        },
        baseline_balance: target.baseline_balance,
        max_observed_balance: max_observed,
        last_observed_balance: o.last_balance,
        observed_delta: max_observed.saturating_sub(target.baseline_balance),
        elapsed: started.elapsed(),
        attempts: o.attempts,
        poll_errors: o.poll_errors,
        message_check_attempted: o.message_check_attempted,
        message_ready: o.message_ready,
        message_check_failed: o.message_check_failed,
    };
    debug!(
        status = result.status.as_str(),
        confirmed_by = result.confirmed_by.map(ConfirmedBy::as_str),
        attempts = result.attempts,
        elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
        "confirmation wait finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TopupMetrics;
    use crate::monitor::MonitorConfig;
    use crate::readiness::ReadinessState;
    use fpc_core::rollup::mock_client::MockRollupNode;
    use fpc_core::{u128_word, Address};
    use std::sync::Arc;

    const HASH: [u8; 32] = [0xab; 32];

    fn cfg() -> WaitConfig {
        WaitConfig {
            poll_min: Duration::from_secs(1),
            poll_max: Duration::from_secs(4),
            timeout: Duration::from_secs(30),
        }
    }

    async fn monitor(node: Arc<MockRollupNode>) -> ReserveBalanceMonitor<Arc<MockRollupNode>> {
        ReserveBalanceMonitor::connect(
            node,
            Address([0xfa; 32]),
            &MonitorConfig {
                balances_slot: u128_word(1),
                storage_fallback: true,
            },
            Arc::new(ReadinessState::new(Duration::from_secs(60))),
            Arc::new(TopupMetrics::new().unwrap()),
        )
        .await
        .unwrap()
    }

    fn node(balance: u128) -> Arc<MockRollupNode> {
        let n = Arc::new(MockRollupNode::new(Address([0xfe; 32])));
        n.set_balance(balance);
        n
    }

    fn target(baseline: u128, hash: Option<[u8; 32]>) -> WaitTarget {
        WaitTarget {
            baseline_balance: baseline,
            message_hash: hash,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn balance_delta_confirms() {
        let n = node(1);
        n.schedule_credit(2, 3);
        let m = monitor(n.clone()).await;
        let (_tx, rx) = watch::channel(false);

        let r = wait_for_confirmation(&m, target(1, None), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Confirmed);
        assert_eq!(r.confirmed_by, Some(ConfirmedBy::BalanceDelta));
        assert_eq!(r.attempts, 3);
        assert_eq!(r.observed_delta, 2);
        assert_eq!(r.last_observed_balance, Some(3));
        assert!(!r.message_check_attempted);
        // Reads at t=0, 1, 3 (interval doubles after each miss).
        assert_eq!(r.elapsed, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn message_ready_confirms_without_balance_change() {
        let n = node(10);
        n.register_message(HASH, 1);
        let m = monitor(n.clone()).await;
        let (_tx, rx) = watch::channel(false);

        let r = wait_for_confirmation(&m, target(10, Some(HASH)), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Confirmed);
        assert_eq!(r.confirmed_by, Some(ConfirmedBy::MessageReady));
        assert!(r.message_ready);
        assert_eq!(r.observed_delta, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_message_check_degrades_to_balance() {
        let n = node(5);
        n.fail_message_checks(true);
        n.schedule_credit(1, 4);
        let m = monitor(n.clone()).await;
        let (_tx, rx) = watch::channel(false);

        let r = wait_for_confirmation(&m, target(5, Some(HASH)), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Confirmed);
        assert_eq!(r.confirmed_by, Some(ConfirmedBy::BalanceDelta));
        assert!(r.message_check_attempted);
        assert!(r.message_check_failed);
        assert!(!r.message_ready);
        // The failed signal is not retried.
        assert_eq!(n.message_checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_stats() {
        let n = node(5);
        let m = monitor(n.clone()).await;
        let (_tx, rx) = watch::channel(false);

        let r = wait_for_confirmation(&m, target(5, Some(HASH)), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Timeout);
        assert_eq!(r.confirmed_by, None);
        assert_eq!(r.elapsed, Duration::from_secs(30));
        // Reads at t=0,1,3,7,11,...,27: polls cap at 4s.
        assert_eq!(r.attempts, 9);
        assert_eq!(r.max_observed_balance, 5);
        assert_eq!(r.observed_delta, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn balance_errors_are_counted_and_retried() {
        let n = node(5);
        n.fail_balance_reads(2);
        n.schedule_credit(3, 1);
        let m = monitor(n.clone()).await;
        let (_tx, rx) = watch::channel(false);

        let r = wait_for_confirmation(&m, target(5, None), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Confirmed);
        assert_eq!(r.poll_errors, 2);
        assert_eq!(r.attempts, 3);
        assert_eq!(r.last_observed_balance, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_at_next_boundary() {
        let n = node(5);
        let m = Arc::new(monitor(n.clone()).await);
        let (tx, rx) = watch::channel(false);

        let waiter = {
            let m = m.clone();
            tokio::spawn(async move { wait_for_confirmation(&m, target(5, None), &cfg(), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        tx.send(true).unwrap();

        let r = waiter.await.unwrap();
        assert_eq!(r.status, ConfirmationStatus::Aborted);
        assert_eq!(r.attempts, 2);
        assert_eq!(r.elapsed, Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_returns_immediately() {
        let n = node(5);
        let m = monitor(n.clone()).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let r = wait_for_confirmation(&m, target(5, None), &cfg(), rx).await;
        assert_eq!(r.status, ConfirmationStatus::Aborted);
        assert_eq!(r.attempts, 0);
    }
}
