/*!
 * Retry logic with exponential backoff
 *
 * Time is read and slept through a [`Clock`] so backoff schedules can be
 * tested with [`FakeClock`] without waiting.
 */

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::NimbusError;
use crate::store::StoreError;

/// Source of wall-clock time and sleeping
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// The real clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug)]
struct FakeState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Manually driven clock; `sleep` records the request and advances time
#[derive(Debug)]
pub struct FakeClock {
    state: Mutex<FakeState>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.state();
        state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.state().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.sleeps.push(duration);
        state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }
}

/// Errors that know whether repeating the request can help
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

impl Retryable for NimbusError {
    fn is_retryable(&self) -> bool {
        NimbusError::is_retryable(self)
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added at random
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.retry_count,
            initial_delay: settings.wait_time,
            max_delay: settings.max_wait_time,
            jitter_factor: 0.1,
        }
    }

    /// No retries at all
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), never above `max_delay`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_delay = self
            .initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped_delay = base_delay.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let jitter_amount = capped_delay.as_secs_f64() * jitter;
            (capped_delay + Duration::from_secs_f64(jitter_amount)).min(self.max_delay)
        } else {
            capped_delay
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or exhausts `1 + max_retries` attempts. The closure receives the
    /// 1-based attempt number.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, what: &str, mut operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.calculate_delay(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
