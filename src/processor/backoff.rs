//! Bounded retry policy shared by reconnects, block fetches, and writes.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// How long to wait after a failed attempt (attempts are 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSchedule {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// `attempt² × base`.
    Quadratic(Duration),
}

impl BackoffSchedule {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            BackoffSchedule::Fixed(delay) => delay,
            BackoffSchedule::Quadratic(base) => {
                let factor = attempt.saturating_mul(attempt).min(u32::MAX as usize) as u32;
                base.saturating_mul(factor)
            }
        }
    }
}

/// Maximum attempts plus a delay schedule. `max_attempts` counts every try,
/// including the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub schedule: BackoffSchedule,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, schedule: BackoffSchedule) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            schedule,
        }
    }

    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self::new(max_attempts, BackoffSchedule::Fixed(delay))
    }

    pub fn quadratic(max_attempts: usize, base: Duration) -> Self {
        Self::new(max_attempts, BackoffSchedule::Quadratic(base))
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.schedule.delay_for(attempt)
    }

    pub fn is_exhausted(&self, attempt: usize) -> bool {
        attempt >= self.max_attempts
    }
}

/// Error returned when a retry loop observes cancellation.
#[derive(Debug, thiserror::Error)]
#[error("retry cancelled")]
pub struct RetryCancelled;

/// Runs `operation` until it succeeds, the policy is exhausted, or
/// `cancellation` fires. `on_retry` sees every failure together
/// with the delay that follows it and whether another attempt will be made.
pub(crate) async fn retry_with_policy<T, F, Fut, L>(
    policy: RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut on_retry: L,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Some(token) = cancellation {
            if token.is_cancelled() {
                return Err(anyhow!(RetryCancelled));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let exhausted = policy.is_exhausted(attempt);
                let delay = policy.delay_for(attempt);
                on_retry(attempt, delay, &err, !exhausted);

                if exhausted {
                    return Err(err);
                }

                sleep_with_cancellation(delay, cancellation).await?;
            }
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!(RetryCancelled)),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
