//! Per-address credential failure tracking.
//!
//! Invalid Basic or bearer attempts are counted per client address inside a
//! fixed window; once the window fills, every further attempt from that
//! address is refused before any credential comparison happens. Malformed
//! credentials are rejected without being counted, so a broken client
//! cannot lock its address out.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

pub const MAX_FAILURES: u32 = 5;
pub const WINDOW_SECS: i64 = 15 * 60;
/// Fixed hint returned in Retry-After; the actual lockout lasts until the
/// window expires.
pub const RETRY_AFTER_SECS: u32 = 60;

const SWEEP_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    window_start: i64,
    count: u32,
}

pub struct FailureLimiter {
    entries: DashMap<IpAddr, FailureWindow>,
    last_sweep: AtomicI64,
}

impl FailureLimiter {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            last_sweep: AtomicI64::new(0),
        }
    }

    /// True when the address has exhausted its failure budget and the
    /// window has not yet expired.
    pub fn is_locked(&self, addr: IpAddr, now: i64) -> bool {
        self.maybe_sweep(now);
        match self.entries.get(&addr) {
            Some(entry) => {
                entry.count >= MAX_FAILURES && now < entry.window_start + WINDOW_SECS
            }
            None => false,
        }
    }

    /// Records one failed attempt. A failure after the window expired
    /// starts a fresh window rather than extending the old one.
    pub fn record_failure(&self, addr: IpAddr, now: i64) {
        self.entries
            .entry(addr)
            .and_modify(|entry| {
                if now >= entry.window_start + WINDOW_SECS {
                    entry.window_start = now;
                    entry.count = 1;
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            })
            .or_insert(FailureWindow {
                window_start: now,
                count: 1,
            });
    }

    /// Amortized cleanup of expired windows, at most once per
    /// `SWEEP_INTERVAL_SECS` across all callers.
    fn maybe_sweep(&self, now: i64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now - last < SWEEP_INTERVAL_SECS {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.entries
            .retain(|_, entry| now < entry.window_start + WINDOW_SECS);
    }
}
