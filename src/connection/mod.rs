//! Connection layer for reaching target hosts.
//!
//! The engine treats the transport as a collaborator: anything implementing
//! [`Connection`] can execute an operation's command payload and return
//! structured status. A [`LocalConnection`] is provided for control-node
//! execution and tests; SSH and other remote transports plug in from
//! outside.
//!
//! Transport-level failures are retryable up to a caller-set count
//! ([`RetryConfig`]); a host whose transport cannot be established at all is
//! reported unreachable and excluded from the rest of the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transient transport failure; retryable.
    #[error("connection to '{host}' failed: {message}")]
    Failed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// The transport cannot be established at all.
    #[error("host '{host}' unreachable: {message}")]
    Unreachable {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// The transport timed out; retryable.
    #[error("connection to '{host}' timed out after {timeout_secs}s")]
    Timeout {
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },
}

impl ConnectionError {
    /// Whether retrying the operation can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Failed { .. } | ConnectionError::Timeout { .. }
        )
    }
}

impl From<ConnectionError> for crate::error::Error {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Failed { host, message } => {
                crate::error::Error::ConnectionFailed { host, message }
            }
            ConnectionError::Unreachable { host, message } => {
                crate::error::Error::UnreachableHost { host, message }
            }
            ConnectionError::Timeout { host, timeout_secs } => {
                crate::error::Error::ConnectionFailed {
                    host,
                    message: format!("timed out after {}s", timeout_secs),
                }
            }
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Structured status returned by a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Process exit code
    pub rc: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandResult {
    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.rc == 0
    }
}

/// Options for a single command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory on the target
    pub cwd: Option<String>,
    /// Environment variables for the command
    pub env: HashMap<String, String>,
    /// Per-command timeout
    pub timeout: Option<Duration>,
}

/// A transport capable of executing command payloads on a target host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier for logging and pooling.
    fn identifier(&self) -> String;

    /// Execute a command and return its structured status.
    async fn execute(
        &self,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult>;
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Execute a command, retrying transient transport failures per the policy.
pub async fn execute_with_retry(
    connection: &dyn Connection,
    command: &str,
    options: &ExecuteOptions,
    retry: &RetryConfig,
) -> ConnectionResult<CommandResult> {
    let attempts = retry.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match connection.execute(command, options).await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    error = %err,
                    "transient connection failure, retrying"
                );
                last_err = Some(err);
                tokio::time::sleep(retry.delay).await;
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.expect("retry loop ran at least once"))
}

/// Direct execution on the control node.
#[derive(Debug, Clone, Default)]
pub struct LocalConnection;

impl LocalConnection {
    /// Create a new local connection.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> String {
        "local".to_string()
    }

    async fn execute(
        &self,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult> {
        debug!(command, "executing locally");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let run = async {
            cmd.output().await.map_err(|e| ConnectionError::Failed {
                host: "localhost".to_string(),
                message: e.to_string(),
            })
        };

        let output = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                ConnectionError::Timeout {
                    host: "localhost".to_string(),
                    timeout_secs: timeout.as_secs(),
                }
            })??,
            None => run.await?,
        };

        Ok(CommandResult {
            rc: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
