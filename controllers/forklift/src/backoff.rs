//! # Retry back-off
//!
//! Per-object Fibonacci back-off for retriable reconcile errors. Intervals
//! are kept in whole minutes (1m, 1m, 2m, 3m, 5m, 8m, capped at 10m) and
//! handed to the controller runtime as a requeue [`Duration`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Fibonacci interval generator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    first: u64,
    last: u64,
    next: u64,
    cap: u64,
}

impl FibonacciBackoff {
    /// Sequence starting at `first_minutes`, capped at `cap_minutes`.
    #[must_use]
    pub fn new(first_minutes: u64, cap_minutes: u64) -> Self {
        Self {
            first: first_minutes,
            last: 0,
            next: first_minutes,
            cap: cap_minutes,
        }
    }

    /// Current interval, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let minutes = self.next;
        let following = (self.last + self.next).min(self.cap);
        self.last = self.next;
        self.next = following;
        Duration::from_secs(minutes * 60)
    }

    pub fn reset(&mut self) {
        self.last = 0;
        self.next = self.first;
    }
}

/// Back-off state per `kind/namespace/name`
#[derive(Debug, Default)]
pub struct BackoffRegistry {
    states: Mutex<HashMap<String, (FibonacciBackoff, u32)>>,
}

impl BackoffRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key` and return how long to wait and how many
    /// consecutive failures have been seen.
    pub fn failure(&self, key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let (backoff, count) = states
                    .entry(key.to_string())
                    .or_insert_with(|| (FibonacciBackoff::new(1, 10), 0));
                *count += 1;
                (backoff.next_delay(), *count)
            }
            Err(e) => {
                warn!("Back-off state poisoned: {}, using default", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Forget failures for `key` after a clean reconcile.
    pub fn success(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}
