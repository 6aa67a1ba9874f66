//! Bounded retries with exponential backoff around a [`ProcessRunner`]

use super::types::{InvocationResult, Invoke, ProcessRunner};
use crate::config::ClaudeConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Failure messages containing any of these (case-insensitive) are retried
pub const RETRYABLE_KEYWORDS: [&str; 8] = [
    "timeout",
    "connection",
    "network",
    "temporary",
    "rate limit",
    "503",
    "502",
    "504",
];

/// Whether a failure message looks transient
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// `delay(attempt) = min(initial * 2^(attempt-1), max)`, attempt is 1-based
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Negative and NaN inputs become zero, values too large for a
    /// [`Duration`] saturate at [`Duration::MAX`].
    pub fn from_secs_f64(initial: f64, max: f64) -> Self {
        Self::new(secs_to_duration(initial), secs_to_duration(max))
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .min(self.max)
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Counters for status display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub invocations: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    invocations: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Invoker that retries transient failures
pub struct RetryingInvoker {
    runner: Arc<dyn ProcessRunner>,
    max_retries: u32,
    backoff: BackoffPolicy,
    counters: Counters,
}

impl RetryingInvoker {
    /// `max_retries` is the total number of attempts (at least one is made)
    pub fn new(runner: Arc<dyn ProcessRunner>, max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            runner,
            max_retries,
            backoff,
            counters: Counters::default(),
        }
    }

    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &ClaudeConfig) -> Self {
        Self::new(
            runner,
            config.max_retries,
            BackoffPolicy::from_secs_f64(config.initial_backoff, config.max_backoff),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            invocations: self.counters.invocations.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn finish(&self, result: InvocationResult) -> InvocationResult {
        self.counters
            .retries
            .fetch_add(u64::from(result.retry_count), Ordering::Relaxed);
        if !result.success {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

#[async_trait]
impl Invoke for RetryingInvoker {
    async fn invoke(&self, payload: &str) -> InvocationResult {
        self.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let max_attempts = self.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let retries = attempt - 1;

            let (message, retryable) = match self.runner.run_once(payload).await {
                Ok(result) if result.success => {
                    if retries > 0 {
                        tracing::info!(attempt, "Claude call succeeded after retry");
                    }
                    return self.finish(result.with_retry_count(retries));
                }
                Ok(result) => {
                    let retryable = is_retryable(&result.error);
                    (result.error, retryable)
                }
                Err(e) => {
                    let raw = e.to_string();
                    tracing::error!(attempt, error = %raw, "Claude call raised an error");
                    let retryable = is_retryable(&raw);
                    (format!("invocation exception: {}", raw), retryable)
                }
            };

            if !retryable {
                tracing::warn!(attempt, error = %message, "Claude call failed, not retryable");
                return self.finish(InvocationResult::failure(message).with_retry_count(retries));
            }
            last_error = message;

            if attempt < max_attempts {
                let delay = self.backoff.delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %last_error,
                    "Claude call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let retries = max_attempts - 1;
        tracing::error!(retries, error = %last_error, "Claude call failed, retries exhausted");
        self.finish(
            InvocationResult::failure(format!(
                "Claude call failed after {} retries: {}",
                retries, last_error
            ))
            .with_retry_count(retries),
        )
    }
}
