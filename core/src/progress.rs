//! Counter-based progress reporting.
//!
//! One `Progress` is handed back to the caller per call. The dispatcher bumps
//! it from transport callback threads, the caller reads it from anywhere, so
//! both counters are atomics. `completed` only ever grows.
//!
//! A call may send more than one attempt (an anti-forgery retry resends the
//! same body). Each attempt reports its own running count, and the handle
//! keeps the furthest any attempt got, so a retry never counts twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicU64,
    completed: AtomicU64,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Completed fraction in `0.0..=1.0`, or `0.0` while the total is unknown.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.completed() as f64 / total as f64).min(1.0)
    }

    pub(crate) fn raise_total(&self, units: u64) {
        self.total.fetch_max(units, Ordering::AcqRel);
    }

    pub(crate) fn raise_completed(&self, units: u64) {
        self.completed.fetch_max(units, Ordering::AcqRel);
    }
}
