// rust/bsp-core/src/coordinator/retry.rs

//! Retry-until-true commands.
//!
//! A [`RetryCommand`] sleeps, evaluates a caller-supplied predicate, and
//! repeats until the predicate returns `true`. It is how masters and workers
//! wait on each other: the predicate usually reads the store and applies the
//! quorum rule.
//!
//! The loop has no attempt limit; it ends on success, on a predicate error,
//! or on cancellation. In increasing mode the sleep grows as
//! `attempt * unit` without a cap, so a long wait for slow stragglers keeps
//! backing off.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::quorum;
use crate::config::RetryConfig;
use crate::error::{CoordinationError, Result};

/// How the sleep between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Sleep one unit before every attempt.
    Fixed,
    /// Sleep `attempt * unit` before attempt `attempt` (1-based).
    Increasing,
}

/// Backoff policy for a [`RetryCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub delay_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(300))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let unit = Duration::from_millis(config.delay_unit_ms);
        if config.fixed_delay {
            Self::fixed(unit)
        } else {
            Self::increasing(unit)
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay_unit: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed,
            delay_unit,
        }
    }

    pub fn increasing(delay_unit: Duration) -> Self {
        Self {
            backoff: Backoff::Increasing,
            delay_unit,
        }
    }

    /// Sleep before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u64) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay_unit,
            Backoff::Increasing => {
                let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
                self.delay_unit.saturating_mul(factor)
            }
        }
    }
}

/// A retry loop with its own start time.
///
/// The elapsed time is measured from construction, so build the command
/// when the wait it guards begins.
#[derive(Debug)]
pub struct RetryCommand {
    policy: RetryPolicy,
    started: Instant,
    attempts: AtomicU64,
}

impl RetryCommand {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Quorum rule evaluated against this command's elapsed time.
    pub fn is_terminated(
        &self,
        completed: usize,
        total: usize,
        min_ratio: f64,
        timeout: Duration,
    ) -> bool {
        quorum::is_terminated(completed, total, min_ratio, timeout, self.elapsed())
    }

    /// Runs `predicate` until it returns `Ok(true)`.
    ///
    /// Each attempt sleeps first, then evaluates. Cancelling `cancel` while
    /// sleeping or evaluating returns [`CoordinationError::Cancelled`]
    /// promptly; the token stays cancelled for the caller to observe.
    ///
    /// # Errors
    ///
    /// Fatal predicate errors (see [`CoordinationError::is_fatal`]) are
    /// returned as is. Any other predicate error ends the loop wrapped in
    /// [`CoordinationError::Command`]; only `Ok(false)` is retried.
    pub async fn execute<F, Fut>(&self, cancel: &CancellationToken, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.attempts.store(attempt, Ordering::Relaxed);

            let delay = self.policy.delay_for_attempt(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(attempt, "retry command cancelled while sleeping");
                    return Err(CoordinationError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(attempt, "retry command cancelled while evaluating");
                    return Err(CoordinationError::Cancelled);
                }
                outcome = predicate() => outcome,
            };

            match outcome {
                Ok(true) => {
                    tracing::debug!(
                        attempt,
                        elapsed_ms = self.elapsed().as_millis() as u64,
                        "retry command satisfied"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    tracing::trace!(attempt, "retry predicate not yet satisfied");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    return Err(CoordinationError::command_with_source(
                        format!("retry predicate failed on attempt {attempt}"),
                        e,
                    ));
                }
            }
        }
    }
}
