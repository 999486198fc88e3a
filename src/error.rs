//! Error types for Converge.
//!
//! This module defines the error types used throughout the engine, providing
//! rich error information for debugging and caller feedback.

use thiserror::Error;

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Converge.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// A pattern atom matched no host or group while strict mode was enabled.
    #[error("Pattern atom '{0}' matched no host or group")]
    UnknownGroup(String),

    /// Host not found in inventory.
    #[error("Host '{0}' not found in inventory")]
    HostNotFound(String),

    /// Invalid host pattern.
    #[error("Invalid host pattern: '{0}'")]
    InvalidPattern(String),

    /// The group topology contains a cycle.
    #[error("Circular group dependency detected involving '{0}'")]
    CircularDependency(String),

    // ========================================================================
    // Variable Errors
    // ========================================================================
    /// A template expression referenced a key absent from the effective
    /// mapping at evaluation time.
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Template rendering error.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// Template source or expression
        template: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Task Errors
    // ========================================================================
    /// A task's apply step reported failure.
    #[error("Task '{task}' failed on host '{host}': {message}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A detached task exceeded its wall-clock ceiling.
    #[error("Task '{task}' timed out on host '{host}' after {timeout_secs} seconds")]
    Timeout {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Ceiling in seconds
        timeout_secs: u64,
    },

    // ========================================================================
    // Module Errors
    // ========================================================================
    /// Module not registered.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Invalid module arguments.
    #[error("Invalid arguments for module '{module}': {message}")]
    ModuleArgs {
        /// Module name
        module: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level failure; retryable up to a caller-set count.
    #[error("Failed to connect to '{host}': {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// The transport could not be established at all; the host is excluded
    /// from all subsequent operations in the run.
    #[error("Host '{host}' unreachable: {message}")]
    UnreachableHost {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Run Control Errors
    // ========================================================================
    /// The failure fraction crossed `max_fail_percentage`; remaining batches
    /// are aborted.
    #[error(
        "Maximum failure percentage exceeded: {failed} of {processed} hosts failed (limit {max_percentage}%)"
    )]
    ThresholdExceeded {
        /// Hosts failed so far
        failed: usize,
        /// Hosts processed so far
        processed: usize,
        /// Configured limit
        max_percentage: u8,
    },

    // ========================================================================
    // Handler Errors
    // ========================================================================
    /// Handler not found.
    #[error("Handler '{0}' not found")]
    HandlerNotFound(String),

    // ========================================================================
    // Vault Errors
    // ========================================================================
    /// Vault decryption failed.
    #[error("Failed to decrypt vault value: {0}")]
    VaultDecryption(String),

    /// Vault encryption failed.
    #[error("Failed to encrypt vault value: {0}")]
    VaultEncryption(String),

    /// The vault payload is not in the expected format.
    #[error("Invalid vault format")]
    InvalidVaultFormat,

    /// No vault passphrase was supplied for an encrypted value.
    #[error("Encountered encrypted value but no vault passphrase is set")]
    MissingVaultPassword,

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new task failed error.
    pub fn task_failed(
        task: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            task: task.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new connection failed error.
    pub fn connection_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new unreachable host error.
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnreachableHost {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new module args error.
    pub fn module_args(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleArgs {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new template render error.
    pub fn template_render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts the whole run rather than a single
    /// host or task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ThresholdExceeded { .. })
    }

    /// Returns the error code for a caller's process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TaskFailed { .. } | Error::Timeout { .. } => 2,
            Error::ConnectionFailed { .. } | Error::UnreachableHost { .. } => 3,
            Error::ThresholdExceeded { .. } => 4,
            Error::HostNotFound(_) | Error::UnknownGroup(_) | Error::InvalidPattern(_) => 5,
            Error::VaultDecryption(_) | Error::InvalidVaultFormat | Error::MissingVaultPassword => 6,
            _ => 1,
        }
    }
}
