//! Bounded exponential backoff for transient protocol errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::CancelToken;

/// Longest single sleep between cancellation checks while backing off.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Whether an error may succeed on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection resets, timeouts; retried.
    Retryable,
    /// Everything else; surfaced immediately.
    Permanent,
}

/// Retry policy for connect, list and signature calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Backoff sleeps are sliced so that a cancelled token cuts them short;
    /// the last error is returned in that case.
    pub fn run<T, E, F>(&self, cancel: &CancelToken, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display + Classify,
    {
        self.run_attempts(cancel, what, |_| op())
    }

    /// Like [`RetryPolicy::run`], but `op` is told which attempt this is
    /// (starting at 1) so it can re-establish state before a retry.
    pub fn run_attempts<T, E, F>(&self, cancel: &CancelToken, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display + Classify,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.class() == ErrorClass::Retryable && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{what}: attempt {attempt}/{attempts} failed ({e}), retrying in {delay:?}"
                    );
                    if !sleep_unless_cancelled(delay, cancel) {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors that know whether they are worth retrying.
pub trait Classify {
    /// Retryable or permanent.
    fn class(&self) -> ErrorClass;
}

impl Classify for super::WalkError {
    fn class(&self) -> ErrorClass {
        super::WalkError::class(self)
    }
}

/// Sleep for `total`, waking early if the token is cancelled.
///
/// Returns `false` when cancelled.
fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    !cancel.is_cancelled()
}
