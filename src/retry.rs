// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::thread;
use std::time::{Duration, Instant};

use log::warn;
use rand::Rng;

use crate::errors::Result;

/// How managed transactions pause between attempts.
///
/// The first pause is the initial delay; every further pause is the previous
/// one times the multiplier, each randomly stretched or squeezed by up to
/// the jitter fraction. Once the time since the first failure plus the next
/// pause would exceed the maximum retry time, the last error is returned
/// instead of sleeping again.
///
/// Configured on the driver via
/// [`DriverConfig::with_retry()`](crate::DriverConfig::with_retry).
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_retry_time: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Total time budget, measured from the end of the first failed attempt.
    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = max_retry_time;
        self
    }

    /// # Panics
    /// Panics when `multiplier` is below 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        assert!(multiplier >= 1.0, "a multiplier below 1 never backs off");
        self.multiplier = multiplier;
        self
    }

    /// Fraction each pause is randomised by; must be in `0.0..1.0`.
    ///
    /// # Panics
    /// Panics when `jitter` is outside that range.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        assert!((0.0..1.0).contains(&jitter), "jitter must be in 0.0..1.0");
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_retry_time: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Runs `work` until it succeeds, fails with a non-retryable error, or the
/// policy's time budget is used up; in the latter cases the last error is
/// returned as-is.
pub(crate) fn retry_with<R>(
    policy: &ExponentialBackoff,
    mut work: impl FnMut() -> Result<R>,
) -> Result<R> {
    let mut first_failure: Option<Instant> = None;
    let mut delay = policy.initial_delay;
    loop {
        let error = match work() {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(error);
        }
        let since = *first_failure.get_or_insert_with(Instant::now);
        if since.elapsed() + delay > policy.max_retry_time {
            return Err(error);
        }
        let pause = jittered(delay, policy.jitter);
        warn!("transient failure, next attempt in {pause:?}: {error}");
        thread::sleep(pause);
        delay = delay.mul_f64(policy.multiplier);
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let stretch = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    delay.mul_f64(stretch.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, ServerError};

    fn transient() -> Error {
        ServerError::new("Neo.TransientError.Transaction.DeadlockDetected", "locked").into()
    }

    fn permanent() -> Error {
        ServerError::new("Neo.ClientError.Statement.SyntaxError", "typo").into()
    }

    fn eager_policy() -> ExponentialBackoff {
        ExponentialBackoff::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_retry_time(Duration::from_secs(10))
    }

    #[test]
    fn retries_until_the_work_succeeds() {
        let mut attempts = 0;
        let value = retry_with(&eager_policy(), || {
            attempts += 1;
            match attempts < 3 {
                true => Err(transient()),
                false => Ok(attempts),
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn gives_up_on_non_retryable_errors() {
        let mut attempts = 0;
        let outcome: Result<()> = retry_with(&eager_policy(), || {
            attempts += 1;
            match attempts {
                1 => Err(transient()),
                _ => Err(permanent()),
            }
        });
        assert_eq!(attempts, 2);
        assert!(matches!(outcome, Err(Error::Server(_))));
    }

    #[test]
    fn returns_the_last_error_when_the_budget_runs_out() {
        let policy = ExponentialBackoff::new()
            .with_initial_delay(Duration::from_millis(2))
            .with_max_retry_time(Duration::from_millis(5));
        let mut attempts = 0;
        let outcome: Result<()> = retry_with(&policy, || {
            attempts += 1;
            Err(transient())
        });
        assert!(attempts >= 1);
        assert!(matches!(outcome, Err(Error::Server(_))));
    }

    #[test]
    fn jitter_keeps_the_pause_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..32 {
            let pause = jittered(base, 0.2);
            assert!(pause >= Duration::from_millis(80), "{pause:?}");
            assert!(pause <= Duration::from_millis(120), "{pause:?}");
        }
    }
}
