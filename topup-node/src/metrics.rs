#![forbid(unsafe_code)]
// Prometheus gauge APIs use `f64`.
#![allow(clippy::disallowed_types)]

use crate::readiness::BridgeEvent;
use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Outcome label for a reserve balance read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceCheckOutcome {
    Ok,
    FallbackOk,
    Error,
}

impl BalanceCheckOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::FallbackOk => "fallback_ok",
            Self::Error => "error",
        }
    }
}

/// Top-up controller metrics, owned by the process and shared by reference.
pub struct TopupMetrics {
    registry: Registry,
    started: Instant,
    bridge_events: IntCounterVec,
    balance_checks: IntCounterVec,
    ready: IntGauge,
    reserve_balance: Gauge,
    uptime: Gauge,
}

impl TopupMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bridge_events = IntCounterVec::new(
            Opts::new("fpc_topup_bridge_events_total", "Bridge lifecycle events"),
            &["event"],
        )?;
        registry.register(Box::new(bridge_events.clone()))?;

        let balance_checks = IntCounterVec::new(
            Opts::new(
                "fpc_topup_balance_checks_total",
                "Reserve balance reads by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(balance_checks.clone()))?;

        let ready = IntGauge::with_opts(Opts::new(
            "fpc_topup_ready",
            "1 if the top-up controller reports ready",
        ))?;
        registry.register(Box::new(ready.clone()))?;

        let reserve_balance = Gauge::with_opts(Opts::new(
            "fpc_topup_reserve_balance",
            "Last observed reserve balance in base units",
        ))?;
        registry.register(Box::new(reserve_balance.clone()))?;

        let uptime = Gauge::with_opts(Opts::new(
            "process_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime.clone()))?;

        // Export every event label from the start so dashboards see zeros.
        for ev in BridgeEvent::ALL {
            bridge_events.with_label_values(&[ev.label()]);
        }

        Ok(Self {
            registry,
            started: Instant::now(),
            bridge_events,
            balance_checks,
            ready,
            reserve_balance,
            uptime,
        })
    }

    pub fn bridge_event(&self, ev: BridgeEvent) {
        self.bridge_events.with_label_values(&[ev.label()]).inc();
    }

    pub fn bridge_events(&self, ev: BridgeEvent) -> u64 {
        self.bridge_events.with_label_values(&[ev.label()]).get()
    }

    pub fn balance_check(&self, outcome: BalanceCheckOutcome) {
        self.balance_checks
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn balance_checks(&self, outcome: BalanceCheckOutcome) -> u64 {
        self.balance_checks
            .with_label_values(&[outcome.label()])
            .get()
    }

    /// Precision is lost above 2^53; the gauge is for dashboards, not accounting.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_reserve_balance(&self, balance: u128) {
        self.reserve_balance.set(balance as f64);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(i64::from(ready));
    }

    pub fn gather_text(&self) -> String {
        self.uptime.set(self.started.elapsed().as_secs_f64());
        let mf = self.registry.gather();
        let mut out = Vec::new();
        if TextEncoder::new().encode(&mf, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8(out).unwrap_or_default()
    }
}
