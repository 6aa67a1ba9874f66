//! Invocation result and the invoker seams

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Outcome of one invocation chain (first try plus any retries)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub success: bool,
    /// Response text (empty on failure)
    pub text: String,
    /// Reported cost in USD
    pub cost: f64,
    /// Failure reason (empty on success)
    pub error: String,
    /// Attempts beyond the first
    pub retry_count: u32,
}

impl InvocationResult {
    pub fn success(text: impl Into<String>, cost: f64) -> Self {
        Self {
            success: true,
            text: text.into(),
            cost,
            error: String::new(),
            retry_count: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            cost: 0.0,
            error: error.into(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Runs the CLI exactly once.
///
/// `Err` means the attempt itself blew up (as opposed to the CLI reporting a
/// failure, which is an `Ok` result with `success == false`).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run_once(&self, payload: &str) -> Result<InvocationResult>;
}

/// Full invocation as used by the message router; never fails outright.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, payload: &str) -> InvocationResult;
}
