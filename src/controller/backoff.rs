//! # Exponential Backoff
//!
//! Per-object retry delays for failed reconciliations.
//!
//! Delays double from a base up to a ceiling, with "equal jitter": half of the
//! delay is fixed and the other half is random, so retries of many objects that
//! failed together spread out without ever retrying sooner than half the delay.
//!
//! ## Usage
//!
//! ```rust
//! use secrets_broker::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
//! assert_eq!(backoff.next_delay_with_jitter(1.0), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay_with_jitter(1.0), Duration::from_secs(2));
//! assert_eq!(backoff.next_delay_with_jitter(0.0), Duration::from_secs(2)); // half of 4s
//! ```

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Un-jittered delay for the current attempt: `min(base * 2^attempt, max)`
    #[must_use]
    pub fn current_ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Next delay with a random jitter, advancing the sequence
    pub fn next_delay(&mut self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.next_delay_with_jitter(jitter)
    }

    /// Next delay for a given jitter factor in `[0, 1]`, advancing the sequence
    pub fn next_delay_with_jitter(&mut self, jitter: f64) -> Duration {
        let ceiling = self.current_ceiling();
        let half = ceiling / 2;
        let delay = half + (ceiling - half).mul_f64(jitter.clamp(0.0, 1.0));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over from the base delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Backoff bookkeeping for one object
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    /// Earliest time the object may be retried
    pub retry_at: DateTime<Utc>,
    /// `metadata.generation` the failure was recorded against
    pub generation: Option<i64>,
}

/// Backoff state for all objects, keyed by `namespace/name`
///
/// Growth of one object's delay never affects another object. State recorded
/// against an older generation is discarded, so editing the spec retries at
/// once.
#[derive(Debug)]
pub struct BackoffRegistry {
    base: Duration,
    max: Duration,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffRegistry {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn with_state<T>(
        &self,
        key: &str,
        generation: Option<i64>,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut BackoffState) -> T,
    ) -> T {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
            backoff: ExponentialBackoff::new(self.base, self.max),
            retry_at: now,
            generation,
        });
        if state.generation != generation {
            state.backoff.reset();
            state.generation = generation;
        }
        f(state)
    }

    /// Record a retriable failure and return the delay before the next attempt
    pub fn record_failure(&self, key: &str, generation: Option<i64>, now: DateTime<Utc>) -> Duration {
        self.with_state(key, generation, now, |state| {
            let delay = state.backoff.next_delay();
            state.retry_at = now + to_chrono(delay);
            delay
        })
    }

    /// Hold the object back for a fixed cooldown after a non-retriable failure
    pub fn record_cooldown(
        &self,
        key: &str,
        generation: Option<i64>,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Duration {
        self.with_state(key, generation, now, |state| {
            state.retry_at = now + to_chrono(cooldown);
            cooldown
        })
    }

    /// Time left before the object may be retried, if any
    #[must_use]
    pub fn remaining(&self, key: &str, generation: Option<i64>, now: DateTime<Utc>) -> Option<Duration> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.get(key).filter(|s| s.generation == generation)?;
        (state.retry_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Number of consecutive retriable failures recorded for the object
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(key).map_or(0, |s| s.backoff.attempt())
    }

    /// Forget the object's backoff after it synchronized
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}
