//! Fixed-interval retry with an overall deadline and cancellation.

use crate::cancel::CancellationToken;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default pause between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default time budget for all attempts together.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

/// Granularity at which a sleeping retry loop notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// When to retry and when to give up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_duration: Duration,
    pub cancel: CancellationToken,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_duration: DEFAULT_MAX_DURATION,
            cancel: CancellationToken::new(),
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Why a retry loop gave up.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("cancelled after {attempts} attempts: {last}")]
    Cancelled { attempts: u32, last: E },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error of the final attempt.
    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Run `op` until it succeeds, the policy's deadline passes, or the policy
/// is cancelled.
///
/// `op` always runs at least once and receives the 1-based attempt number.
/// The last attempt happens no later than `max_duration` after the first.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let last = match op(attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if policy.cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts, last });
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.max_duration {
            return Err(RetryError::Exhausted { attempts, last });
        }

        let wait = policy.interval.min(policy.max_duration - elapsed);
        debug!(
            "Attempt {} failed: {}. Retrying in {:.1} seconds...",
            attempts,
            last,
            wait.as_secs_f64()
        );

        if !sleep_unless_cancelled(wait, &policy.cancel).await {
            return Err(RetryError::Cancelled { attempts, last });
        }
    }
}

/// Sleep for `wait`; returns false if the token was cancelled meanwhile.
async fn sleep_unless_cancelled(wait: Duration, cancel: &CancellationToken) -> bool {
    let until = Instant::now() + wait;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        sleep((until - now).min(CANCEL_POLL)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn assert_elapsed(start: Instant, secs: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs + 1),
            "elapsed {elapsed:?}, expected about {secs}s"
        );
    }

    fn policy(interval_secs: u64, max_secs: u64) -> RetryPolicy {
        RetryPolicy::default()
            .with_interval(Duration::from_secs(interval_secs))
            .with_max_duration(Duration::from_secs(max_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> = retry(&policy(5, 300), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_at_fixed_interval_until_success() {
        let start = Instant::now();
        let result = retry(&policy(5, 300), |n| async move {
            if n < 3 {
                Err(format!("attempt {n} refused"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_elapsed(start, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let start = Instant::now();
        let result: Result<(), _> =
            retry(&policy(5, 20), |n| async move { Err(format!("attempt {n}")) }).await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { .. }));
        // t = 0, 5, 10, 15, 20
        assert_eq!(err.attempts(), 5);
        assert_eq!(err.into_last(), "attempt 5");
        assert_elapsed(start, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_still_attempts_once() {
        let result: Result<(), _> =
            retry(&policy(5, 0), |_| async { Err("refused") }).await;
        assert_eq!(result.unwrap_err().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_attempt_lands_on_deadline() {
        let start = Instant::now();
        let result: Result<(), _> = retry(&policy(5, 12), |_| async { Err("refused") }).await;

        // t = 0, 5, 10, 12
        assert_eq!(result.unwrap_err().attempts(), 4);
        assert_elapsed(start, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_sleeping_loop() {
        let token = CancellationToken::new();
        let policy = policy(5, 300).with_cancellation(token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(7)).await;
                token.cancel();
            })
        };

        let start = Instant::now();
        let result: Result<(), _> = retry(&policy, |_| async { Err("refused") }).await;
        canceller.await.unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { attempts: 2, .. }));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_attempt() {
        let token = CancellationToken::new();
        let policy = policy(5, 300).with_cancellation(token.clone());
        let seen = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry(&policy, |_| {
            let token = token.clone();
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Err("refused")
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
