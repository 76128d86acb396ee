#![forbid(unsafe_code)]
// Prometheus gauge and histogram APIs use `f64`.
#![allow(clippy::disallowed_types)]

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::{Duration, Instant};

/// Outcome label for quote requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOutcome {
    Ok,
    BadRequest,
    Unauthorized,
    RateLimited,
    InternalError,
}

impl QuoteOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::InternalError => "internal_error",
        }
    }
}

const LATENCY_BUCKETS: &[f64] = &[
    0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Quote service metrics, owned by the service and shared with its handlers.
pub struct QuoteMetrics {
    registry: Registry,
    started: Instant,
    requests: IntCounterVec,
    latency: HistogramVec,
    rate_limited: IntCounter,
    uptime: Gauge,
}

impl QuoteMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("fpc_quote_requests_total", "Quote requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "fpc_quote_latency_seconds",
                "Quote request handling latency by outcome",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["outcome"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        let rate_limited = IntCounter::with_opts(Opts::new(
            "fpc_rate_limited_total",
            "Quote requests rejected by the rate limiter",
        ))?;
        registry.register(Box::new(rate_limited.clone()))?;

        let uptime = Gauge::with_opts(Opts::new(
            "process_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            started: Instant::now(),
            requests,
            latency,
            rate_limited,
            uptime,
        })
    }

    pub fn observe(&self, outcome: QuoteOutcome, elapsed: Duration) {
        let label = outcome.label();
        self.requests.with_label_values(&[label]).inc();
        self.latency
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
        if outcome == QuoteOutcome::RateLimited {
            self.rate_limited.inc();
        }
    }

    pub fn requests(&self, outcome: QuoteOutcome) -> u64 {
        self.requests.with_label_values(&[outcome.label()]).get()
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
