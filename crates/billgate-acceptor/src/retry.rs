//! Bounded retry with exponential backoff.
//!
//! The acceptor never retries on its own. Callers that want to keep trying
//! to reach the device opt in with a [`RetryPolicy`], either through
//! [`BillAcceptor::connect_with_retry`](crate::BillAcceptor::connect_with_retry)
//! or by wrapping their own operation in [`retry`].
//!
//! Backoff sleeps on `tokio::time`, so tests can run it under a paused clock.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use billgate_core::{Error, Result as CoreResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How many times to try and how long to wait in between.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_acceptor::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.backoff(1), Duration::from_millis(500));
/// assert_eq!(policy.backoff(2), Duration::from_secs(1));
/// assert_eq!(policy.backoff(10), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any single wait.
    pub max_backoff: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Try exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fixed wait between attempts.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            max_backoff: backoff,
            multiplier: 1.0,
        }
    }

    /// Wait after the `failures`-th consecutive failure (1-based).
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// # Errors
    ///
    /// Returns an error if no attempt would run or the backoff would shrink.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidTiming("max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidTiming(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::InvalidTiming(
                "initial_backoff exceeds max_backoff".into(),
            ));
        }
        Ok(())
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `op` receives the 1-based attempt number. The error of the last attempt is
/// returned when every attempt fails. A policy with zero attempts still runs
/// once.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_acceptor::retry::{RetryPolicy, retry};
///
/// #[tokio::main(flavor = "current_thread", start_paused = true)]
/// async fn main() {
///     let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
///     let result: Result<u32, String> = retry(&policy, |attempt| async move {
///         if attempt < 3 { Err(format!("attempt {attempt} failed")) } else { Ok(attempt) }
///     })
///     .await;
///
///     assert_eq!(result, Ok(3));
/// }
/// ```
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(attempt, error = %e, "Giving up after final attempt");
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.backoff(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(700));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(700));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { multiplier: 0.5, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { multiplier: f64::NAN, ..RetryPolicy::default() }.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        };

        let start = Instant::now();
        let result: Result<(), String> = retry(&policy, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("offline".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("offline".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s between four attempts
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let start = Instant::now();
        let result: Result<u32, String> = retry(&RetryPolicy::default(), |attempt| async move {
            if attempt == 2 { Ok(attempt) } else { Err("busy".into()) }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_runs_once() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        let mut attempts = Vec::new();
        let result: Result<(), String> = retry(&policy, |attempt| {
            attempts.push(attempt);
            async { Err("no".into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry() {
        let start = Instant::now();
        let result: Result<(), &str> = retry(&RetryPolicy::no_retry(), |_| async { Err("no") }).await;
        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
