//! Bounded retry of operations against eventually-consistent providers.
//!
//! An operation is attempted until it succeeds, until it returns
//! [`Retry::Stop`], or until the overall timeout elapses. The three cases
//! surface as `Ok`, the stop cause unchanged, and [`Error::Timeout`]
//! carrying the last transient cause. Cancellation yields `Aborted`.

use crate::error::{Error, ErrorKind, Result};
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a failed attempt.
#[derive(Debug)]
pub enum Retry {
    /// Transient failure, try again after the delay.
    Again(Error),
    /// Terminal failure, give up immediately with this cause.
    Stop(Error),
}

impl Retry {
    /// Classifies a provider error: conflicts, missing resources and bad
    /// requests stop the loop; rate limiting, timeouts and temporary
    /// unavailability are retried.
    pub fn from_provider(err: Error) -> Self {
        match err.status() {
            Some(404) | Some(409) => return Retry::Stop(err),
            Some(408) | Some(429) | Some(500) | Some(502) | Some(503) | Some(504) => {
                return Retry::Again(err);
            }
            _ => {}
        }
        match err.kind() {
            ErrorKind::NotFound
            | ErrorKind::InvalidRequest
            | ErrorKind::InvalidParameter
            | ErrorKind::Logic
            | ErrorKind::Aborted
            | ErrorKind::Inconsistent => Retry::Stop(err),
            _ => Retry::Again(err),
        }
    }
}

impl From<Error> for Retry {
    fn from(err: Error) -> Self {
        Retry::Again(err)
    }
}

/// Per-attempt delays used across the engine.
pub const MINIMUM_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

enum Failure {
    Exhausted(Error),
    Stopped(Error),
}

/// Fixed delay between attempts, refusing new attempts past the deadline.
/// No deadline when the timeout does not fit in an `Instant`.
struct FixedDelay {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Backoff for FixedDelay {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(deadline) = self.deadline {
            match Instant::now().checked_add(self.delay) {
                Some(next) if next < deadline => {}
                _ => return None,
            }
        }
        Some(self.delay)
    }
}

/// Retries `op` every `delay` until it succeeds, stops, or `timeout` elapses.
///
/// A zero `delay` polls continuously, bounded only by `timeout`.
pub async fn while_unsuccessful<T, F, Fut>(
    mut op: F,
    delay: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Retry>>,
{
    let policy = FixedDelay {
        delay,
        deadline: Instant::now().checked_add(timeout),
    };

    let mut attempts = 0u32;
    let attempt = || {
        attempts += 1;
        let n = attempts;
        let fut = op();
        async move {
            fut.await.map_err(|r| match r {
                Retry::Again(e) => {
                    tracing::trace!("attempt #{} failed, will retry: {}", n, e);
                    backoff::Error::transient(Failure::Exhausted(e))
                }
                Retry::Stop(e) => {
                    tracing::debug!("attempt #{} failed, giving up: {}", n, e);
                    backoff::Error::permanent(Failure::Stopped(e))
                }
            })
        }
    };
    let polling = backoff::future::retry(policy, attempt);

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::aborted()),
        outcome = tokio::time::timeout(timeout, polling) => outcome,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(Failure::Stopped(cause))) => Err(cause),
        Ok(Err(Failure::Exhausted(cause))) => Err(Error::timeout(
            "retries timed out",
            timeout,
            Some(cause),
        )),
        Err(_) => Err(Error::timeout("retries timed out", timeout, None)),
    }
}

/// [`while_unsuccessful`] with a one second delay, for catalog lookups.
pub async fn while_unsuccessful_delay_1s<T, F, Fut>(
    op: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Retry>>,
{
    while_unsuccessful(op, MINIMUM_DELAY, timeout, cancel).await
}

/// [`while_unsuccessful`] with a five second delay, for state transitions.
pub async fn while_unsuccessful_delay_5s<T, F, Fut>(
    op: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Retry>>,
{
    while_unsuccessful(op, DEFAULT_DELAY, timeout, cancel).await
}
