//! Per-object exponential backoff.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::controller::error::ErrorClass;

/// Base delay of the first retry.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for pending dependencies.
pub const PENDING_DEPENDENCY_CAP: Duration = Duration::from_secs(30);

/// Failure counters keyed by `namespace/name`.
#[derive(Debug)]
pub struct Backoff {
    cap: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    pub fn new(cap: Duration) -> Self {
        Self {
            cap,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before retrying `key` after a failure of `class`. Each call
    /// counts as one more failure.
    pub fn next_delay(&self, key: &str, class: ErrorClass) -> Duration {
        let attempt = match self.attempts.lock() {
            Ok(mut attempts) => {
                let entry = attempts.entry(key.to_string()).or_insert(0);
                let current = *entry;
                *entry = entry.saturating_add(1);
                current
            }
            Err(_) => 0,
        };

        let cap = match class {
            ErrorClass::PendingDependency => self.cap.min(PENDING_DEPENDENCY_CAP),
            _ => self.cap,
        };
        delay_for(attempt, cap)
    }

    /// Forget failures of `key` after a successful pass.
    pub fn reset(&self, key: &str) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(key);
        }
    }

    /// Failures recorded for `key`.
    pub fn failures(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .ok()
            .and_then(|a| a.get(key).copied())
            .unwrap_or(0)
    }
}

/// `1s * 2^attempt`, capped.
pub fn delay_for(attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
    BASE_DELAY.checked_mul(factor).unwrap_or(cap).min(cap)
}
