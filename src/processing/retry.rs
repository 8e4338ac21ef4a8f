//! Bounded retry with exponential backoff around remote calls.

use crate::error::{ConvergeError, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::time::Duration;

/// How many times to try a remote call and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64, max_delay: Duration) -> Result<RetryPolicy> {
        let policy = RetryPolicy {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            backoff_multiplier,
            max_delay_ms: max_delay.as_millis() as u64,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(ConvergeError::validation(
                format!("max_attempts={}", self.max_attempts),
                "retry policy needs at least one attempt",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConvergeError::validation(
                format!("backoff_multiplier={}", self.backoff_multiplier),
                "backoff multiplier must be a finite number >= 1",
            ));
        }
        Ok(())
    }

    /// Delay after the failed `attempt` (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    /// Default: 4 attempts, 5s doubling up to 60s.
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

/// Source of the backoff pause.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> RecordingSleeper {
        RecordingSleeper::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is used up.
///
/// Every failure is retried; callers keep non-transient work outside the
/// closure. One warning is logged per retry. The last error is returned
/// wrapped in [`ConvergeError::Fatal`].
pub fn with_retry<T, F>(policy: &RetryPolicy, sleeper: &dyn Sleeper, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                log::error!(
                    "{failed} {label} after {attempt} attempt(s): {e}",
                    failed = "gave up".on_red()
                );
                return Err(ConvergeError::Fatal {
                    operation: label.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "{retry} {label} attempt {attempt}/{max} failed: {e}; retrying in {delay:?}",
                    retry = "retry".yellow(),
                    max = policy.max_attempts
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}
