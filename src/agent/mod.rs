//! Claude Code CLI invocation
//!
//! [`ProcessInvoker`] runs the CLI once; [`RetryingInvoker`] wraps it with
//! bounded retries and exponential backoff for transient failures.

mod launcher;
mod retry;
mod types;

pub use launcher::{parse_cli_output, resolve_cli_binary, ProcessInvoker};
pub use retry::{is_retryable, BackoffPolicy, RetryStats, RetryingInvoker, RETRYABLE_KEYWORDS};
pub use types::{InvocationResult, Invoke, ProcessRunner};
