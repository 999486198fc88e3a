//! Module system for Converge.
//!
//! Modules are the units of declarative intent: each one implements an
//! idempotent apply step that reports whether the desired state was already
//! satisfied (`ok`) or had to be established (`changed`), independent of how
//! many times it runs. Dispatch is registry-based: module implementations
//! register into a [`ModuleRegistry`] at startup and are looked up by name
//! at execution time.

pub mod assert;
pub mod command;
pub mod debug;
pub mod fail;
pub mod set_fact;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::{Connection, RetryConfig};
use crate::template::TemplateEngine;
use crate::vars::Vars;

/// Errors that can occur during module execution.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("module not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Connection(#[from] crate::connection::ConnectionError),

    #[error(transparent)]
    Engine(#[from] crate::error::Error),
}

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Status of a module execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Desired state had to be established
    Changed,
    /// Desired state was already satisfied
    Ok,
    /// The apply step failed
    Failed,
    /// The apply step did not run
    Skipped,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Changed => write!(f, "changed"),
            ModuleStatus::Ok => write!(f, "ok"),
            ModuleStatus::Failed => write!(f, "failed"),
            ModuleStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A difference between current and desired state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    /// State before the apply step
    pub before: String,
    /// State after the apply step
    pub after: String,
}

impl Diff {
    /// Create a diff from before/after state descriptions.
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    /// Render the difference as a unified diff.
    pub fn unified(&self) -> String {
        similar::TextDiff::from_lines(&self.before, &self.after)
            .unified_diff()
            .header("before", "after")
            .to_string()
    }
}

/// Result of a module's apply step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the apply step mutated state
    pub changed: bool,
    /// Human-readable message
    pub msg: String,
    /// Execution status
    pub status: ModuleStatus,
    /// Optional before/after diff (diff mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Additional data returned by the module
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, JsonValue>,
    /// Standard output (command-style modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Standard error (command-style modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Return code (command-style modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
}

impl ModuleOutput {
    fn base(msg: impl Into<String>, status: ModuleStatus, changed: bool) -> Self {
        Self {
            changed,
            msg: msg.into(),
            status,
            diff: None,
            data: IndexMap::new(),
            stdout: None,
            stderr: None,
            rc: None,
        }
    }

    /// State already satisfied, nothing changed.
    pub fn ok(msg: impl Into<String>) -> Self {
        Self::base(msg, ModuleStatus::Ok, false)
    }

    /// State established, something changed.
    pub fn changed(msg: impl Into<String>) -> Self {
        Self::base(msg, ModuleStatus::Changed, true)
    }

    /// Apply step failed.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::base(msg, ModuleStatus::Failed, false)
    }

    /// Apply step did not run.
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self::base(msg, ModuleStatus::Skipped, false)
    }

    /// Attach a diff.
    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Attach a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach command output.
    pub fn with_command_output(
        mut self,
        stdout: Option<String>,
        stderr: Option<String>,
        rc: Option<i32>,
    ) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.rc = rc;
        self
    }
}

/// Parameters passed to a module, already templated.
pub type ModuleParams = IndexMap<String, JsonValue>;

/// Context for a module's apply step.
#[derive(Clone)]
pub struct ModuleContext {
    /// Target host name
    pub host: String,
    /// Dry run: report the would-be result without mutating
    pub check_mode: bool,
    /// Collect before/after diffs
    pub diff_mode: bool,
    /// The host's effective variables
    pub vars: Vars,
    /// Template engine for modules that evaluate expressions
    pub engine: Arc<TemplateEngine>,
    /// Transport for modules that execute remotely
    pub connection: Option<Arc<dyn Connection>>,
    /// Retry policy for transient transport failures
    pub retry: RetryConfig,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("host", &self.host)
            .field("check_mode", &self.check_mode)
            .field("diff_mode", &self.diff_mode)
            .field("vars", &self.vars.len())
            .field(
                "connection",
                &self.connection.as_ref().map(|c| c.identifier()),
            )
            .finish()
    }
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            check_mode: false,
            diff_mode: false,
            vars: Vars::new(),
            engine: Arc::new(TemplateEngine::new()),
            connection: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ModuleContext {
    /// Create a context for a host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set check mode.
    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    /// Set diff mode.
    pub fn with_diff_mode(mut self, diff_mode: bool) -> Self {
        self.diff_mode = diff_mode;
        self
    }

    /// Set the effective variables.
    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.vars = vars;
        self
    }

    /// Set the connection.
    pub fn with_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }
}

/// Trait that all modules implement.
///
/// The apply step must be idempotent: applying the same parameters twice in
/// a row with unchanged inputs never produces `changed` on the second call.
#[async_trait]
pub trait Module: Send + Sync {
    /// Name the module is registered under.
    fn name(&self) -> &'static str;

    /// One-line description of what the module does.
    fn description(&self) -> &'static str;

    /// Apply the desired state.
    async fn apply(&self, params: &ModuleParams, ctx: &ModuleContext)
        -> ModuleResult<ModuleOutput>;

    /// Report the would-be result without mutating (check mode).
    async fn check(&self, params: &ModuleParams, ctx: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let check_ctx = ModuleContext {
            check_mode: true,
            ..ctx.clone()
        };
        self.apply(params, &check_ctx).await
    }

    /// Required parameter names.
    fn required_params(&self) -> &[&'static str] {
        &[]
    }
}

/// Helper trait for extracting parameters.
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>>;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(JsonValue::String(s)) => Ok(Some(s.clone())),
            Some(v) => Ok(Some(v.to_string().trim_matches('"').to_string())),
            None => Ok(None),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            Some(JsonValue::Bool(b)) => Ok(Some(*b)),
            Some(JsonValue::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
            None => Ok(None),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_i64(&self, key: &str) -> ModuleResult<Option<i64>> {
        match self.get(key) {
            Some(JsonValue::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                ModuleError::InvalidParameter(format!("{} must be an integer", key))
            }),
            Some(JsonValue::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| ModuleError::InvalidParameter(format!("{} must be an integer", key))),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an integer",
                key
            ))),
            None => Ok(None),
        }
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(JsonValue::Array(arr)) => {
                let mut result = Vec::new();
                for item in arr {
                    match item {
                        JsonValue::String(s) => result.push(s.clone()),
                        v => result.push(v.to_string().trim_matches('"').to_string()),
                    }
                }
                Ok(Some(result))
            }
            Some(JsonValue::String(s)) => Ok(Some(vec![s.clone()])),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a string or array",
                key
            ))),
            None => Ok(None),
        }
    }
}

/// Registry for looking up modules by name.
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

static BUILTIN_REGISTRY: Lazy<Arc<ModuleRegistry>> =
    Lazy::new(|| Arc::new(ModuleRegistry::with_builtins()));

impl ModuleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Process-wide shared instance of the built-in registry.
    pub fn shared_builtins() -> Arc<ModuleRegistry> {
        BUILTIN_REGISTRY.clone()
    }

    /// Create a registry with all built-in modules.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(fail::FailModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry
    }

    /// Register a module.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All registered module names.
    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    /// Apply a module by name, honoring check mode.
    pub async fn apply(
        &self,
        name: &str,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        for param in module.required_params() {
            if !params.contains_key(*param) {
                return Err(ModuleError::MissingParameter((*param).to_string()));
            }
        }

        if ctx.check_mode {
            module.check(params, ctx).await
        } else {
            module.apply(params, ctx).await
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
