use anyhow::{Error as AnyError, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Marker error returned when a retry loop or a paced sleep is interrupted by shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation cancelled by shutdown")
    }
}

impl std::error::Error for Cancelled {}

pub fn is_cancelled(err: &AnyError) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Fixed-delay retry budget. `max_retries` counts retries, so an operation
/// runs at most `max_retries + 1` times.
#[derive(Clone, Copy)]
pub(crate) struct RetryPolicy<'a> {
    pub delay: Duration,
    pub max_retries: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryPolicy<'a> {
    pub(crate) fn fixed(delay: Duration, max_retries: usize) -> Self {
        Self {
            delay,
            max_retries,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, `classify_error` aborts, the budget
/// runs out, or the cancellation token fires. `on_retry` sees every failure
/// that went through the budget along with whether another attempt follows.
pub(crate) async fn retry_fixed<'a, T, F, Fut, L, C>(
    policy: RetryPolicy<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &AnyError, bool),
    C: FnMut(&AnyError) -> RetryDisposition,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if policy.cancellation.is_some_and(|token| token.is_cancelled()) {
            return Err(Cancelled.into());
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(&err) {
                RetryDisposition::Abort => return Err(err),
                RetryDisposition::Retry => {
                    let exhausted = attempt > policy.max_retries;
                    on_retry(attempt, policy.delay, &err, !exhausted);

                    if exhausted {
                        return Err(err);
                    }

                    sleep_with_cancellation(policy.delay, policy.cancellation).await?;
                }
            },
        }
    }
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(Cancelled.into()),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
