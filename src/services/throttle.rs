//! Run-at-most-once-per-interval gate
//!
//! Keeps the time of the last admitted run per key. The clock is injected so
//! callers own their pacing instead of sharing a process-wide cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::clock::Clock;

pub struct Throttle {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    last_runs: Mutex<HashMap<&'static str, DateTime<Utc>>>,
}

impl Throttle {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            clock,
            min_interval,
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records the run when `key` has not run within the
    /// interval. Returns false without recording otherwise.
    pub fn try_acquire(&self, key: &'static str) -> bool {
        let now = self.clock.now();
        let mut last_runs = match self.last_runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match last_runs.get(key) {
            Some(last) if now - *last < self.min_interval => false,
            _ => {
                last_runs.insert(key, now);
                true
            }
        }
    }
}
