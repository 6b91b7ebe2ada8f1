//! Retry and bounded-poll executors
//!
//! Every control-plane step runs through [`RetryPolicy::execute`]; every
//! "wait until the cluster reports X" loop runs through [`poll_until`].
//! Both suspend only on the configured interval and abort promptly when the
//! cancellation token fires.

use crate::core::{AdminError, BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Spacing strategy between attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same interval between every attempt.
    #[default]
    Fixed,
    /// Interval doubles after each failure, capped at `max_interval_ms`.
    Exponential { max_interval_ms: u64 },
}

/// Configuration for retrying a control-plane step on transient failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Optional upper bound for a single attempt in milliseconds.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
    /// Optional grace period before the first attempt in milliseconds.
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 5_000,
            backoff: Backoff::Fixed,
            attempt_timeout_ms: None,
            initial_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn exponential(max_attempts: u32, interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            backoff: Backoff::Exponential {
                max_interval_ms: max_interval.as_millis() as u64,
            },
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Pause after the given failed 1-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.interval_ms.max(1);
        let millis = match &self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential { max_interval_ms } => {
                let cap = (*max_interval_ms).max(base);
                let mut backoff = base;
                for _ in 1..attempt {
                    backoff = backoff.saturating_mul(2).min(cap);
                }
                backoff
            }
        };
        Duration::from_millis(millis)
    }

    pub fn validate(&self, step: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BootstrapError::InvalidConfig(format!(
                "Retry policy for '{}' must allow at least one attempt",
                step
            )));
        }
        if self.interval_ms == 0 {
            return Err(BootstrapError::InvalidConfig(format!(
                "Retry interval for '{}' must be > 0",
                step
            )));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(BootstrapError::InvalidConfig(format!(
                "Attempt timeout for '{}' must be > 0",
                step
            )));
        }
        Ok(())
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only retryable errors are retried. On exhaustion the last failure is
    /// surfaced as [`BootstrapError::RetryExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        step: &str,
        cancel: &CancellationToken,
        observer: &dyn AttemptObserver,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let started = Instant::now();

        if let Some(delay_ms) = self.initial_delay_ms.filter(|ms| *ms > 0) {
            event!(Level::DEBUG, step, delay_ms, "waiting before first attempt");
            pause(step, Duration::from_millis(delay_ms), cancel).await?;
        }

        let mut last_error: Option<BootstrapError> = None;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(BootstrapError::cancelled(step));
            }
            observer.attempt_started(step, attempt);
            event!(Level::DEBUG, step, attempt, max_attempts, "attempt started");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BootstrapError::cancelled(step)),
                outcome = self.bounded(step, operation(attempt)) => outcome,
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(value) => {
                    event!(Level::DEBUG, step, attempt, elapsed_ms, "attempt succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    event!(
                        Level::WARN,
                        step,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        error = %err,
                        "attempt failed"
                    );
                    observer.attempt_failed(step, attempt, &err);
                    last_error = Some(err);
                    if attempt < max_attempts {
                        pause(step, self.delay_after(attempt), cancel).await?;
                    }
                }
                Err(err) => {
                    event!(
                        Level::ERROR,
                        step,
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "attempt failed permanently"
                    );
                    observer.attempt_failed(step, attempt, &err);
                    return Err(err);
                }
            }
        }

        Err(BootstrapError::RetryExhausted {
            step: step.to_string(),
            attempts: max_attempts,
            last_error: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempt recorded".to_string()),
        })
    }

    async fn bounded<T, Fut>(&self, step: &str, attempt: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match self.attempt_timeout_ms {
            Some(limit_ms) => match timeout(Duration::from_millis(limit_ms), attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BootstrapError::Transient {
                    step: step.to_string(),
                    source: AdminError::Timeout(limit_ms),
                }),
            },
            None => attempt.await,
        }
    }
}

/// Receives per-attempt progress from [`RetryPolicy::execute`].
pub trait AttemptObserver: Send + Sync {
    fn attempt_started(&self, _step: &str, _attempt: u32) {}

    fn attempt_failed(&self, _step: &str, _attempt: u32, _error: &BootstrapError) {}
}

/// Observer that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {}

/// Suspends for `duration` unless `cancel` fires first.
pub async fn pause(step: &str, duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BootstrapError::cancelled(step)),
        _ = sleep(duration) => Ok(()),
    }
}

/// Interval and upper bound for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Satisfied(T),
    TimedOut { last: Option<T>, waited: Duration },
}

/// Probes until `predicate` holds or `settings.max_wait` elapses.
///
/// Transient probe failures are tolerated and polling continues; other
/// failures abort the poll. `probe` receives the 1-based round number.
pub async fn poll_until<T, F, Fut, P>(
    step: &str,
    settings: PollSettings,
    cancel: &CancellationToken,
    mut probe: F,
    predicate: P,
) -> Result<PollOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let deadline = started + settings.max_wait;
    let mut last = None;
    let mut round = 0u32;

    loop {
        round = round.saturating_add(1);
        if cancel.is_cancelled() {
            return Err(BootstrapError::cancelled(step));
        }

        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BootstrapError::cancelled(step)),
            observed = probe(round) => observed,
        };
        match observed {
            Ok(value) if predicate(&value) => return Ok(PollOutcome::Satisfied(value)),
            Ok(value) => last = Some(value),
            Err(err) if err.is_retryable() => {
                event!(Level::DEBUG, step, round, error = %err, "probe failed, polling again");
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut {
                last,
                waited: now - started,
            });
        }
        let remaining = deadline - now;
        pause(step, settings.interval.min(remaining), cancel).await?;
    }
}
