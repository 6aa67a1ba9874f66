//! Claude Code CLI process invocation
//!
//! Runs `claude -p --output-format json <payload>` once in the configured
//! working directory, under a hard timeout, and classifies what came back.

use super::types::{InvocationResult, ProcessRunner};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Name the CLI is installed under
const CLI_NAME: &str = "claude";

/// Single-shot CLI invoker
pub struct ProcessInvoker {
    cli_path: String,
    work_dir: PathBuf,
    timeout: Duration,
    env: Vec<(&'static str, String)>,
}

impl ProcessInvoker {
    pub fn new(cli_path: impl Into<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cli_path: cli_path.into(),
            work_dir: work_dir.into(),
            timeout,
            env: Vec::new(),
        }
    }

    /// Invoker for the `claude` section, exporting `proxy` to the child
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut invoker = Self::new(
            config.claude.cli_path.clone(),
            config.claude.work_dir.clone(),
            config.claude.timeout(),
        );
        invoker.env = config.proxy.env_vars();
        invoker
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Locate the CLI executable, see [`resolve_cli_binary`]
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        resolve_cli_binary(&self.cli_path)
    }

    /// Run the CLI once and classify the outcome.
    pub async fn call(&self, payload: &str) -> Result<InvocationResult> {
        let Some(binary) = self.resolve_binary() else {
            return Ok(InvocationResult::failure(
                "Claude CLI not found, install it with: npm install -g @anthropic-ai/claude-code",
            ));
        };

        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            Error::Invocation(format!(
                "cannot create work directory {}: {}",
                self.work_dir.display(),
                e
            ))
        })?;

        let preview: String = payload.chars().take(50).collect();
        tracing::info!(
            binary = %binary.display(),
            cwd = %self.work_dir.display(),
            prompt = %preview,
            "Invoking Claude Code CLI"
        );

        let mut command = Command::new(&binary);
        command
            .arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg(payload)
            .current_dir(&self.work_dir)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InvocationResult::failure(format!(
                    "Claude CLI missing: {}",
                    binary.display()
                )));
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to execute Claude Code CLI");
                return Ok(InvocationResult::failure(format!("CLI execution failed: {}", e)));
            }
            Err(_) => {
                return Ok(InvocationResult::failure(format!(
                    "Claude response timeout (exceeded {}s)",
                    self.timeout.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            tracing::warn!(
                exit_code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Claude Code CLI exited with failure status"
            );
        }

        Ok(parse_cli_output(&stdout, &stderr))
    }
}

#[async_trait]
impl ProcessRunner for ProcessInvoker {
    async fn run_once(&self, payload: &str) -> Result<InvocationResult> {
        self.call(payload).await
    }
}

/// Classify CLI output.
///
/// - empty stdout: failure, carrying stderr if there is any
/// - not JSON: the raw text is the answer
/// - JSON object: `success`/`is_error`, `result`/`response`,
///   `cost`/`cost_usd`/`total_cost_usd`, `error`
/// - any other JSON value: its rendering is the answer
pub fn parse_cli_output(stdout: &str, stderr: &str) -> InvocationResult {
    let output = stdout.trim();
    if output.is_empty() {
        let stderr = stderr.trim();
        return if stderr.is_empty() {
            InvocationResult::failure("no response from Claude CLI")
        } else {
            InvocationResult::failure(format!("no response from Claude CLI: {}", stderr))
        };
    }

    let data: Value = match serde_json::from_str(output) {
        Ok(data) => data,
        Err(_) => return InvocationResult::success(output, 0.0),
    };

    let map = match data {
        Value::Object(map) => map,
        Value::String(text) => return InvocationResult::success(text, 0.0),
        other => return InvocationResult::success(other.to_string(), 0.0),
    };

    let str_field = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let is_error = map.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let success = map.get("success").and_then(Value::as_bool).unwrap_or(true) && !is_error;
    let text = str_field("result")
        .or_else(|| str_field("response"))
        .unwrap_or_default();
    let cost = ["cost", "cost_usd", "total_cost_usd"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_f64))
        .unwrap_or(0.0);

    if success {
        return InvocationResult::success(text, cost);
    }

    let error = str_field("error")
        .or_else(|| (!text.is_empty()).then(|| text.clone()))
        .unwrap_or_else(|| "unknown error".to_string());
    InvocationResult {
        success: false,
        text: String::new(),
        cost,
        error,
        retry_count: 0,
    }
}

/// Locate the CLI: explicit path, then `PATH`, then well-known install
/// locations.
pub fn resolve_cli_binary(configured: &str) -> Option<PathBuf> {
    if configured != CLI_NAME {
        let path = Path::new(configured);
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // A bare command name other than the default is looked up as given
    let lookup = if configured.is_empty() || configured.contains(['/', '\\']) {
        CLI_NAME
    } else {
        configured
    };
    if let Ok(path) = which::which(lookup) {
        return Some(path);
    }

    well_known_locations().into_iter().find(|p| p.exists())
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    #[cfg(windows)]
    if let Some(roaming) = dirs_next::data_dir() {
        candidates.push(roaming.join("npm").join("claude.cmd"));
    }

    if let Some(home) = dirs_next::home_dir() {
        candidates.push(home.join(".claude").join("local").join(CLI_NAME));
        candidates.push(home.join(".npm-global").join("bin").join(CLI_NAME));
    }
    candidates.push(PathBuf::from("/usr/local/bin/claude"));
    candidates.push(PathBuf::from("/opt/homebrew/bin/claude"));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_with_cost_usd() {
        let result = parse_cli_output(r#"{"success":true,"result":"hi","cost_usd":0.002}"#, "");
        assert!(result.success);
        assert_eq!(result.text, "hi");
        assert_eq!(result.cost, 0.002);
        assert_eq!(result.retry_count, 0);
    }

    #[test]
    fn test_parse_json_defaults() {
        let result = parse_cli_output(r#"{"response":"from response field"}"#, "");
        assert!(result.success);
        assert_eq!(result.text, "from response field");
        assert_eq!(result.cost, 0.0);

        let result = parse_cli_output(r#"{"result":"x","cost":1.5,"total_cost_usd":9.0}"#, "");
        assert_eq!(result.cost, 1.5);
    }

    #[test]
    fn test_parse_json_reported_failure() {
        let result = parse_cli_output(r#"{"success":false,"error":"rate limit exceeded"}"#, "");
        assert!(!result.success);
        assert_eq!(result.error, "rate limit exceeded");

        let result = parse_cli_output(r#"{"is_error":true,"result":"API Error: 502"}"#, "");
        assert!(!result.success);
        assert_eq!(result.error, "API Error: 502");

        let result = parse_cli_output(r#"{"success":false}"#, "");
        assert_eq!(result.error, "unknown error");
    }

    #[test]
    fn test_parse_plain_text_output() {
        let result = parse_cli_output("  just some text\n", "");
        assert!(result.success);
        assert_eq!(result.text, "just some text");
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_parse_non_object_json() {
        let result = parse_cli_output(r#""quoted answer""#, "");
        assert_eq!(result.text, "quoted answer");

        let result = parse_cli_output("[1,2]", "");
        assert!(result.success);
        assert_eq!(result.text, "[1,2]");
    }

    #[test]
    fn test_parse_empty_output() {
        let result = parse_cli_output("   ", "");
        assert!(!result.success);
        assert_eq!(result.error, "no response from Claude CLI");

        let result = parse_cli_output("", "connection reset by peer\n");
        assert!(!result.success);
        assert!(result.error.ends_with("connection reset by peer"));
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let fake = dir.path().join("my-claude");
        std::fs::write(&fake, "").unwrap();

        let resolved = resolve_cli_binary(fake.to_str().unwrap());
        assert_eq!(resolved, Some(fake));
    }

    #[test]
    fn test_resolve_does_not_panic() {
        // May or may not find claude depending on the environment
        let _ = resolve_cli_binary(CLI_NAME);
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_runs_cli_with_prompt_args() {
        let dir = tempfile::TempDir::new().unwrap();
        // Echo the argument shape back as the result
        let script = write_script(
            dir.path(),
            r#"printf '{"result":"%s|%s|%s|%s","cost_usd":0.01}' "$1" "$2" "$3" "$4""#,
        );
        let work_dir = dir.path().join("work");

        let invoker = ProcessInvoker::new(
            script.to_str().unwrap(),
            &work_dir,
            Duration::from_secs(10),
        );
        let result = invoker.call("hello there").await.unwrap();

        assert!(result.success, "unexpected failure: {}", result.error);
        assert_eq!(result.text, "-p|--output-format|json|hello there");
        assert_eq!(result.cost, 0.01);
        assert!(work_dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = write_script(dir.path(), "sleep 5");

        let invoker = ProcessInvoker::new(
            script.to_str().unwrap(),
            dir.path(),
            Duration::from_millis(200),
        );
        let result = invoker.call("slow").await.unwrap();

        assert!(!result.success);
        assert!(result.error.contains("timeout"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_replaces_invalid_utf8() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = write_script(dir.path(), r"printf 'ok \377 done'");

        let invoker = ProcessInvoker::new(script.to_str().unwrap(), dir.path(), Duration::from_secs(10));
        let result = invoker.call("bytes").await.unwrap();

        assert!(result.success);
        assert_eq!(result.text, "ok \u{FFFD} done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_reports_unusable_work_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo unreachable");
        // A regular file where a directory component is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let invoker = ProcessInvoker::new(
            script.to_str().unwrap(),
            blocker.join("work"),
            Duration::from_secs(10),
        );
        let error = invoker.call("hi").await.unwrap_err();

        assert!(matches!(error, Error::Invocation(_)));
        assert!(error.to_string().contains("work directory"));
    }
}
