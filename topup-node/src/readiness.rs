//! Shared readiness state for the top-up controller.
//!
//! Written by the balance monitor and the checker, read by the ops server.
//! Everything is an atomic so readers never block the control loop.
#![forbid(unsafe_code)]

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Why `/ready` is answering 503.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    NoSuccessfulBalanceChecks,
    LastBalanceCheckFailed,
    StaleBalanceChecks,
    ShutdownInProgress,
}

impl NotReady {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSuccessfulBalanceChecks => "no_successful_balance_checks",
            Self::LastBalanceCheckFailed => "last_balance_check_failed",
            Self::StaleBalanceChecks => "stale_balance_checks",
            Self::ShutdownInProgress => "shutdown_in_progress",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    Submitted,
    Confirmed,
    Timeout,
    Aborted,
    Failed,
}

impl BridgeEvent {
    pub const ALL: [BridgeEvent; 5] = [
        Self::Submitted,
        Self::Confirmed,
        Self::Timeout,
        Self::Aborted,
        Self::Failed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Submitted => 0,
            Self::Confirmed => 1,
            Self::Timeout => 2,
            Self::Aborted => 3,
            Self::Failed => 4,
        }
    }
}

/// Point-in-time view served by `/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessSnapshot {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub balance_checks_ok: u64,
    pub balance_checks_failed: u64,
    pub last_balance_check_ms: u64,
    pub bridge_in_flight: bool,
}

pub struct ReadinessState {
    stale_after_ms: u64,
    checks_ok: AtomicU64,
    checks_failed: AtomicU64,
    last_check_ms: AtomicU64,
    last_ok_ms: AtomicU64,
    last_err_ms: AtomicU64,
    last_check_ok: AtomicBool,
    bridge_events: [AtomicU64; 5],
    in_flight: AtomicBool,
    shutting_down: AtomicBool,
}

impl ReadinessState {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after_ms: u64::try_from(stale_after.as_millis()).unwrap_or(u64::MAX),
            checks_ok: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            last_check_ms: AtomicU64::new(0),
            last_ok_ms: AtomicU64::new(0),
            last_err_ms: AtomicU64::new(0),
            last_check_ok: AtomicBool::new(false),
            bridge_events: Default::default(),
            in_flight: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Default staleness bound for a check interval: three intervals, at least one second.
    pub fn default_stale_after(check_interval: Duration) -> Duration {
        check_interval
            .saturating_mul(3)
            .max(Duration::from_secs(1))
    }

    pub fn record_check_ok(&self, now_ms: u64) {
        self.checks_ok.fetch_add(1, Ordering::Relaxed);
        self.last_ok_ms.store(now_ms, Ordering::Relaxed);
        self.last_check_ms.store(now_ms, Ordering::Relaxed);
        self.last_check_ok.store(true, Ordering::Release);
    }

    pub fn record_check_err(&self, now_ms: u64) {
        self.checks_failed.fetch_add(1, Ordering::Relaxed);
        self.last_err_ms.store(now_ms, Ordering::Relaxed);
        self.last_check_ms.store(now_ms, Ordering::Relaxed);
        self.last_check_ok.store(false, Ordering::Release);
    }

    pub fn checks_ok(&self) -> u64 {
        self.checks_ok.load(Ordering::Relaxed)
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    pub fn record_bridge_event(&self, ev: BridgeEvent) {
        self.bridge_events[ev.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn bridge_events(&self, ev: BridgeEvent) -> u64 {
        self.bridge_events[ev.index()].load(Ordering::Relaxed)
    }

    /// Claim the single bridge slot. Returns `None` if a bridge is already in flight.
    ///
    /// This is a plain compare-exchange, so callers must take it before their
    /// first `.await` on the submit path.
    pub fn try_begin_flight(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { state: self })
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn evaluate(&self, now_ms: u64) -> Result<(), NotReady> {
        if self.is_shutting_down() {
            return Err(NotReady::ShutdownInProgress);
        }
        if self.checks_ok() == 0 {
            return Err(NotReady::NoSuccessfulBalanceChecks);
        }
        if !self.last_check_ok.load(Ordering::Acquire) {
            return Err(NotReady::LastBalanceCheckFailed);
        }
        let last = self.last_check_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) > self.stale_after_ms {
            return Err(NotReady::StaleBalanceChecks);
        }
        Ok(())
    }

    pub fn snapshot(&self, now_ms: u64) -> ReadinessSnapshot {
        let verdict = self.evaluate(now_ms);
        ReadinessSnapshot {
            ready: verdict.is_ok(),
            reason: verdict.err().map(NotReady::as_str),
            balance_checks_ok: self.checks_ok(),
            balance_checks_failed: self.checks_failed(),
            last_balance_check_ms: self.last_check_ms.load(Ordering::Relaxed),
            bridge_in_flight: self.in_flight(),
        }
    }
}

/// Releases the bridge slot on drop, including on early return or cancellation.
pub struct FlightGuard<'a> {
    state: &'a ReadinessState,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ReadinessState {
        ReadinessState::new(Duration::from_secs(30))
    }

    #[test]
    fn not_ready_until_first_success() {
        let s = state();
        assert_eq!(s.evaluate(1_000), Err(NotReady::NoSuccessfulBalanceChecks));
        s.record_check_err(1_000);
        assert_eq!(s.evaluate(1_000), Err(NotReady::NoSuccessfulBalanceChecks));
        s.record_check_ok(2_000);
        assert_eq!(s.evaluate(2_000), Ok(()));
    }

    #[test]
    fn flips_on_failure_and_back_on_success() {
        let s = state();
        for i in 0..5 {
            s.record_check_ok(1_000 + i);
        }
        assert!(s.evaluate(1_010).is_ok());
        s.record_check_err(1_020);
        assert_eq!(s.evaluate(1_020), Err(NotReady::LastBalanceCheckFailed));
        s.record_check_ok(1_030);
        assert!(s.evaluate(1_030).is_ok());
    }

    #[test]
    fn stale_and_shutdown() {
        let s = state();
        s.record_check_ok(10_000);
        assert!(s.evaluate(40_000).is_ok());
        assert_eq!(s.evaluate(40_001), Err(NotReady::StaleBalanceChecks));

        s.record_check_ok(40_001);
        s.begin_shutdown();
        let snap = s.snapshot(40_001);
        assert!(!snap.ready);
        assert_eq!(snap.reason, Some("shutdown_in_progress"));
    }

    #[test]
    fn default_stale_bound() {
        assert_eq!(
            ReadinessState::default_stale_after(Duration::from_secs(20)),
            Duration::from_secs(60)
        );
        assert_eq!(
            ReadinessState::default_stale_after(Duration::from_millis(100)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn flight_guard_is_exclusive_and_released_on_drop() {
        let s = state();
        let g = s.try_begin_flight().unwrap();
        assert!(s.in_flight());
        assert!(s.try_begin_flight().is_none());
        drop(g);
        assert!(!s.in_flight());
        assert!(s.try_begin_flight().is_some());
    }

    #[test]
    fn bridge_event_counters() {
        let s = state();
        s.record_bridge_event(BridgeEvent::Submitted);
        s.record_bridge_event(BridgeEvent::Submitted);
        s.record_bridge_event(BridgeEvent::Timeout);
        assert_eq!(s.bridge_events(BridgeEvent::Submitted), 2);
        assert_eq!(s.bridge_events(BridgeEvent::Timeout), 1);
        assert_eq!(s.bridge_events(BridgeEvent::Confirmed), 0);
    }
}
