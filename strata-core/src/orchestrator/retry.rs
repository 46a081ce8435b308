use std::future::Future;
use std::time::Duration;

use crate::error::{Result, StrataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or has
    /// been attempted `max_retries + 1` times. `op` receives the 1-based
    /// attempt number.
    pub async fn run<T, F, Fut>(&self, stage: &'static str, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= attempts {
                return Err(exhausted(stage, label, attempt, err));
            }
            tracing::warn!(
                target: "strata::task",
                stage,
                batch = label,
                attempt,
                attempts,
                error = %err,
                "attempt failed; retrying"
            );
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;
        }
    }
}

fn exhausted(stage: &'static str, label: &str, attempt: u32, err: StrataError) -> StrataError {
    tracing::error!(
        target: "strata::task",
        stage,
        batch = label,
        attempt,
        retryable = err.is_retryable(),
        error = %err,
        "giving up"
    );
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retryable_errors_use_every_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        };
        let result: Result<()> = policy
            .run("fetch", "b", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StrataError::api(500, "boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_retries: 5,
            delay: Duration::ZERO,
        };
        let result: Result<()> = policy
            .run("persist", "b", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StrataError::Configuration("no keys".into()))
            })
            .await;
        assert!(matches!(result, Err(StrataError::Configuration(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay: Duration::from_secs(5),
        };
        let started = tokio::time::Instant::now();
        let value = policy
            .run("fetch", "b", |attempt| async move {
                if attempt < 3 {
                    Err(StrataError::api(-1, "busy"))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
