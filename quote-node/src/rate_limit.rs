#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::disallowed_types)]

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Abstraction for deterministic testing.
pub trait TimeSource: Send + Sync + 'static {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_millis() / 1_000
    }
}

#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        fpc_core::now_unix_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Recommended Retry-After in seconds when denied.
    pub retry_after_secs: u64,
}

impl Decision {
    const ALLOW: Decision = Decision {
        allowed: true,
        retry_after_secs: 0,
    };
}

#[derive(Debug)]
struct Bucket {
    window_start: u64,
    count: u32,
    /// Insertion order, for oldest-first eviction.
    seq: u64,
}

#[derive(Debug, Default)]
struct Table {
    buckets: HashMap<String, Bucket>,
    next_seq: u64,
}

/// Per-identity fixed-window limiter with a bounded key table.
///
/// - Window start is `now - (now mod window_seconds)`.
/// - At capacity, buckets of elapsed windows are purged first, then the oldest
///   remaining entry is evicted.
/// - All table mutations happen under one mutex.
pub struct FixedWindowLimiter {
    cfg: RateLimitConfig,
    time: Arc<dyn TimeSource>,
    table: Mutex<Table>,
}

impl FixedWindowLimiter {
    pub fn new(cfg: RateLimitConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            cfg,
            time,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    pub fn tracked_keys(&self) -> usize {
        self.table
            .lock()
            .map(|t| t.buckets.len())
            .unwrap_or_else(|e| e.into_inner().buckets.len())
    }

    pub fn check(&self, key: &str) -> Decision {
        if !self.cfg.enabled {
            return Decision::ALLOW;
        }
        let k = if key.trim().is_empty() {
            "<unknown>"
        } else {
            key
        };

        let window = self.cfg.window_seconds.max(1);
        let max_requests = self.cfg.max_requests.max(1);
        let capacity = self.cfg.max_tracked_keys.max(1);
        let now = self.time.now_secs();
        let window_start = now - (now % window);

        // A panic while holding the lock cannot leave a bucket half-updated.
        let mut guard = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let table = &mut *guard;

        if !table.buckets.contains_key(k) && table.buckets.len() >= capacity {
            table
                .buckets
                .retain(|_, b| b.window_start.saturating_add(window) > now);
            if table.buckets.len() >= capacity {
                let oldest = table
                    .buckets
                    .iter()
                    .min_by_key(|(_, b)| (b.window_start, b.seq))
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    table.buckets.remove(&oldest);
                }
            }
        }

        let seq = table.next_seq;
        let bucket = table.buckets.entry(k.to_string()).or_insert_with(|| Bucket {
            window_start,
            count: 0,
            seq,
        });
        if bucket.seq == seq {
            table.next_seq = table.next_seq.wrapping_add(1);
        }
        if bucket.window_start != window_start {
            bucket.window_start = window_start;
            bucket.count = 0;
        }

        if bucket.count >= max_requests {
            let retry_after_secs = (window_start + window).saturating_sub(now).max(1);
            return Decision {
                allowed: false,
                retry_after_secs,
            };
        }
        bucket.count += 1;
        Decision::ALLOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug)]
    struct FakeTime {
        now: AtomicU64,
    }

    impl FakeTime {
        fn new(start_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                now: AtomicU64::new(start_ms),
            })
        }
        fn advance_ms(&self, delta: u64) {
            self.now.fetch_add(delta, Ordering::SeqCst);
        }
    }

    impl TimeSource for FakeTime {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn cfg(max_requests: u32, window_seconds: u64, max_tracked_keys: usize) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_requests,
            window_seconds,
            max_tracked_keys,
        }
    }

    #[test]
    fn rejects_the_n_plus_first_request_in_a_window() {
        let time = FakeTime::new(100_000);
        let rl = FixedWindowLimiter::new(cfg(3, 60, 100), time.clone());

        for _ in 0..3 {
            assert!(rl.check("addr:1.2.3.4").allowed);
        }
        let d = rl.check("addr:1.2.3.4");
        assert!(!d.allowed);
        // now = 100 s, window [60, 120): 20 s remain.
        assert_eq!(d.retry_after_secs, 20);

        // Other identities are unaffected.
        assert!(rl.check("addr:5.6.7.8").allowed);
    }

    #[test]
    fn first_request_in_new_window_succeeds() {
        let time = FakeTime::new(0);
        let rl = FixedWindowLimiter::new(cfg(1, 10, 100), time.clone());

        assert!(rl.check("k").allowed);
        assert!(!rl.check("k").allowed);
        time.advance_ms(9_999);
        assert!(!rl.check("k").allowed);
        time.advance_ms(1);
        assert!(rl.check("k").allowed);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let time = FakeTime::new(9_500);
        let rl = FixedWindowLimiter::new(cfg(1, 10, 100), time.clone());
        assert!(rl.check("k").allowed);
        assert_eq!(rl.check("k").retry_after_secs, 1);
    }

    #[test]
    fn capacity_purges_elapsed_windows_first() {
        let time = FakeTime::new(0);
        let rl = FixedWindowLimiter::new(cfg(5, 10, 2), time.clone());
        assert!(rl.check("a").allowed);
        assert!(rl.check("b").allowed);
        time.advance_ms(10_000);
        assert!(rl.check("c").allowed);
        // Both stale buckets went away, not just one.
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_live_entry() {
        let time = FakeTime::new(0);
        let rl = FixedWindowLimiter::new(cfg(1, 60, 2), time.clone());
        assert!(rl.check("a").allowed);
        assert!(rl.check("b").allowed);
        assert!(rl.check("c").allowed);
        assert_eq!(rl.tracked_keys(), 2);
        // "a" was evicted; coming back it starts a fresh bucket (evicting "b").
        assert!(!rl.check("c").allowed);
        assert!(rl.check("a").allowed);
        assert!(!rl.check("a").allowed);
    }

    #[test]
    fn disabled_always_allows() {
        let time = FakeTime::new(0);
        let mut c = cfg(1, 60, 2);
        c.enabled = false;
        let rl = FixedWindowLimiter::new(c, time);
        for _ in 0..10 {
            assert!(rl.check("k").allowed);
        }
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let time = FakeTime::new(0);
        let rl = Arc::new(FixedWindowLimiter::new(cfg(100, 60, 10), time));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..25).filter(|_| rl.check("shared").allowed).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }
}
