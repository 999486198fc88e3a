//! Per-host task application.
//!
//! The contract for a single (host, task) pair: evaluate the condition
//! guard against the host's effective variables, template the arguments,
//! invoke the module's idempotent apply step, apply
//! `changed_when`/`failed_when` overrides against the raw result, register
//! the outcome, and notify handlers on change. All failures fold into the
//! returned [`TaskResult`]; nothing is silently dropped.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::connection::{ConnectionError, RetryConfig};
use crate::error::Error;
use crate::handlers::HandlerState;
use crate::modules::{ModuleContext, ModuleError, ModuleOutput, ModuleRegistry, ModuleStatus};
use crate::playbook::Task;
use crate::template::TemplateEngine;
use crate::vars::Vars;

use super::async_task;
use super::runtime::{ExecutionContext, RuntimeContext};

/// Outcome of applying one task to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Desired state was already satisfied
    Ok,
    /// Desired state had to be established
    Changed,
    /// The apply step failed
    Failed,
    /// The condition guard was false
    Skipped,
    /// The transport could not be established
    Unreachable,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Changed => "changed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The apply step reported failure
    Operation,
    /// A transport-level error after retries
    Connection,
    /// A detached task exceeded its wall-clock ceiling
    Timeout,
}

/// Result of applying one task to one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Final status
    pub status: TaskStatus,
    /// Whether state was mutated
    pub changed: bool,
    /// Message from the apply step or the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Return code (command-style modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    /// Captured standard output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Module-specific result data
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, JsonValue>,
    /// Rendered unified diff (diff mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Failure recorded but not fatal (`ignore_errors`)
    #[serde(default)]
    pub ignored: bool,
    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl TaskResult {
    fn base(status: TaskStatus, changed: bool) -> Self {
        Self {
            status,
            changed,
            msg: None,
            rc: None,
            stdout: None,
            stderr: None,
            data: IndexMap::new(),
            diff: None,
            ignored: false,
            failure: None,
        }
    }

    /// Successful result without changes.
    pub fn ok() -> Self {
        Self::base(TaskStatus::Ok, false)
    }

    /// Successful result with changes.
    pub fn changed() -> Self {
        Self::base(TaskStatus::Changed, true)
    }

    /// Failed result.
    pub fn failed(msg: impl Into<String>) -> Self {
        let mut result = Self::base(TaskStatus::Failed, false);
        result.msg = Some(msg.into());
        result.failure = Some(FailureKind::Operation);
        result
    }

    /// Skipped result.
    pub fn skipped(msg: impl Into<String>) -> Self {
        let mut result = Self::base(TaskStatus::Skipped, false);
        result.msg = Some(msg.into());
        result
    }

    /// Unreachable-host result.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        let mut result = Self::base(TaskStatus::Unreachable, false);
        result.msg = Some(msg.into());
        result.failure = Some(FailureKind::Connection);
        result
    }

    /// Failed result with a timeout classification.
    pub fn timed_out(msg: impl Into<String>) -> Self {
        let mut result = Self::failed(msg);
        result.failure = Some(FailureKind::Timeout);
        result
    }

    /// Whether this result fails the host (ignored failures do not).
    pub fn is_fatal_failure(&self) -> bool {
        self.status == TaskStatus::Failed && !self.ignored
    }

    /// The shape stored by `register` and exposed to `until`,
    /// `changed_when`, and `failed_when` scopes.
    pub fn registered_value(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        map.insert("changed".into(), JsonValue::Bool(self.changed));
        map.insert(
            "failed".into(),
            JsonValue::Bool(self.status == TaskStatus::Failed),
        );
        map.insert(
            "skipped".into(),
            JsonValue::Bool(self.status == TaskStatus::Skipped),
        );
        if let Some(msg) = &self.msg {
            map.insert("msg".into(), JsonValue::String(msg.clone()));
        }
        if let Some(rc) = self.rc {
            map.insert("rc".into(), JsonValue::Number(rc.into()));
        }
        if let Some(stdout) = &self.stdout {
            map.insert("stdout".into(), JsonValue::String(stdout.clone()));
            map.insert(
                "stdout_lines".into(),
                JsonValue::Array(
                    stdout
                        .lines()
                        .map(|l| JsonValue::String(l.to_string()))
                        .collect(),
                ),
            );
        }
        if let Some(stderr) = &self.stderr {
            map.insert("stderr".into(), JsonValue::String(stderr.clone()));
        }
        for (key, value) in &self.data {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        JsonValue::Object(map)
    }
}

impl From<ModuleOutput> for TaskResult {
    fn from(output: ModuleOutput) -> Self {
        let status = match output.status {
            ModuleStatus::Ok => TaskStatus::Ok,
            ModuleStatus::Changed => TaskStatus::Changed,
            ModuleStatus::Failed => TaskStatus::Failed,
            ModuleStatus::Skipped => TaskStatus::Skipped,
        };
        Self {
            status,
            changed: output.changed,
            msg: Some(output.msg),
            rc: output.rc,
            stdout: output.stdout,
            stderr: output.stderr,
            data: output.data,
            diff: output.diff.map(|d| d.unified()),
            ignored: false,
            failure: if status == TaskStatus::Failed {
                Some(FailureKind::Operation)
            } else {
                None
            },
        }
    }
}

/// Scope for conditions evaluated against a raw result: the effective
/// variables plus the result fields at the top level (and under the
/// register name, when one is set).
fn result_scope(vars: &Vars, result: &TaskResult, register: Option<&str>) -> Vars {
    let mut scope = vars.clone();
    let registered = result.registered_value();

    if let JsonValue::Object(map) = &registered {
        for (key, value) in map {
            scope.insert(key.clone(), value.clone());
        }
    }
    if let Some(name) = register {
        scope.insert(name.to_string(), registered);
    }
    scope
}

/// Apply one task to one host.
#[instrument(skip_all, fields(task = %task.name, host = %ctx.host))]
#[allow(clippy::too_many_arguments)]
pub async fn run_task(
    task: &Task,
    ctx: &ExecutionContext,
    runtime: &RuntimeContext,
    registry: &Arc<ModuleRegistry>,
    engine: &Arc<TemplateEngine>,
    handlers: &Mutex<HandlerState>,
    block_vars: &Vars,
    retry: &RetryConfig,
) -> TaskResult {
    let vars = match runtime.effective_vars(&ctx.host, block_vars, &task.vars) {
        Ok(vars) => vars,
        Err(e) => return TaskResult::failed(e.to_string()),
    };

    // Condition guard: skip without touching the host.
    if let Some(condition) = &task.when {
        match engine.eval_condition(condition, &vars) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%condition, "condition guard false, skipping");
                return TaskResult::skipped(format!("condition '{}' was false", condition));
            }
            Err(e) => return TaskResult::failed(e.to_string()),
        }
    }

    // Lazy consumption point: templates inside arguments resolve here.
    let params = match engine.render_value(&JsonValue::Object(task.args.clone().into_iter().collect()), &vars)
    {
        Ok(JsonValue::Object(map)) => map.into_iter().collect::<IndexMap<_, _>>(),
        Ok(_) => IndexMap::new(),
        Err(e) => return TaskResult::failed(e.to_string()),
    };

    let module_ctx = ModuleContext {
        host: ctx.host.clone(),
        check_mode: ctx.check_mode,
        diff_mode: ctx.diff_mode,
        vars: vars.clone(),
        engine: engine.clone(),
        connection: runtime.connection_for(&ctx.host),
        retry: *retry,
    };

    let attempts = if task.until.is_some() {
        task.retries.unwrap_or(3) + 1
    } else {
        1
    };
    let delay = Duration::from_secs(task.delay.unwrap_or(1));

    let mut result = TaskResult::ok();
    for attempt in 1..=attempts {
        let applied = apply_once(task, registry, &params, &module_ctx).await;

        result = match applied {
            Ok(output) => TaskResult::from(output),
            Err(ApplyError::Timeout) => {
                let ceiling = task
                    .async_spec
                    .map(|spec| spec.timeout)
                    .unwrap_or_default();
                TaskResult::timed_out(format!(
                    "did not complete within {:?}; remote side effect left running",
                    ceiling
                ))
            }
            Err(ApplyError::Module(e)) => module_error_result(e),
        };

        let Some(until) = &task.until else { break };

        let scope = result_scope(&vars, &result, task.register.as_deref());
        match engine.eval_condition(until, &scope) {
            Ok(true) => break,
            Ok(false) if attempt < attempts => {
                debug!(attempt, attempts, %until, "until condition not met, retrying");
                tokio::time::sleep(delay).await;
            }
            Ok(false) => {
                result = TaskResult::failed(format!(
                    "until condition '{}' not met after {} attempts",
                    until, attempts
                ));
            }
            Err(e) => {
                result = TaskResult::failed(e.to_string());
                break;
            }
        }
    }

    // Overrides take precedence over the module's self-reported status and
    // are evaluated against the raw result.
    if result.status != TaskStatus::Unreachable && result.status != TaskStatus::Skipped {
        if let Some(condition) = &task.changed_when {
            let scope = result_scope(&vars, &result, task.register.as_deref());
            match engine.eval_condition(condition, &scope) {
                Ok(is_changed) => {
                    result.changed = is_changed;
                    if result.status != TaskStatus::Failed {
                        result.status = if is_changed {
                            TaskStatus::Changed
                        } else {
                            TaskStatus::Ok
                        };
                    }
                }
                Err(e) => result = TaskResult::failed(e.to_string()),
            }
        }

        if let Some(condition) = &task.failed_when {
            let scope = result_scope(&vars, &result, task.register.as_deref());
            match engine.eval_condition(condition, &scope) {
                Ok(true) => {
                    result.status = TaskStatus::Failed;
                    result.failure = Some(FailureKind::Operation);
                    result.msg = Some(format!("failed_when condition '{}' held", condition));
                }
                Ok(false) => {
                    if result.status == TaskStatus::Failed {
                        result.status = if result.changed {
                            TaskStatus::Changed
                        } else {
                            TaskStatus::Ok
                        };
                        result.failure = None;
                    }
                }
                Err(e) => result = TaskResult::failed(e.to_string()),
            }
        }
    }

    // Fold set_fact data into the registered/set-facts layer.
    if task.module == "set_fact" && result.status != TaskStatus::Failed {
        let cacheable = params
            .get("cacheable")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        for (key, value) in &result.data {
            runtime.set_fact(&ctx.host, key.clone(), value.clone());
            if cacheable {
                runtime.cache_fact(&ctx.host, key, value);
            }
        }
    }

    if let Some(register) = &task.register {
        runtime.register(&ctx.host, register.clone(), result.registered_value());
    }

    if result.changed && result.status != TaskStatus::Failed {
        let mut state = handlers.lock();
        for name in &task.notify {
            if !state.notify(name, &ctx.host) {
                warn!(handler = %name, "notified handler is not registered");
            }
        }
    }

    if result.status == TaskStatus::Failed && task.ignore_errors {
        warn!("task failed but ignore_errors is set");
        result.ignored = true;
    }

    result
}

enum ApplyError {
    Module(ModuleError),
    Timeout,
}

/// One module application, detaching behind a poll loop when the task opts
/// into asynchronous execution.
async fn apply_once(
    task: &Task,
    registry: &Arc<ModuleRegistry>,
    params: &IndexMap<String, JsonValue>,
    module_ctx: &ModuleContext,
) -> Result<ModuleOutput, ApplyError> {
    match task.async_spec {
        None => registry
            .apply(&task.module, params, module_ctx)
            .await
            .map_err(ApplyError::Module),
        Some(spec) => {
            let registry = registry.clone();
            let name = task.module.clone();
            let params = params.clone();
            let module_ctx = module_ctx.clone();
            let fut = async move { registry.apply(&name, &params, &module_ctx).await };

            match async_task::run_with_ceiling(fut, &spec).await {
                Some(applied) => applied.map_err(ApplyError::Module),
                None => Err(ApplyError::Timeout),
            }
        }
    }
}

fn module_error_result(err: ModuleError) -> TaskResult {
    match err {
        ModuleError::Connection(ConnectionError::Unreachable { host, message }) => {
            TaskResult::unreachable(format!("host '{}' unreachable: {}", host, message))
        }
        ModuleError::Connection(conn_err) => {
            let mut result = TaskResult::failed(conn_err.to_string());
            result.failure = Some(FailureKind::Connection);
            result
        }
        ModuleError::Engine(Error::UndefinedVariable(name)) => {
            TaskResult::failed(format!("undefined variable: {}", name))
        }
        other => TaskResult::failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registered_value_shape() {
        let mut result = TaskResult::changed();
        result.rc = Some(0);
        result.stdout = Some("line1\nline2".to_string());

        let value = result.registered_value();
        assert_eq!(value["changed"], json!(true));
        assert_eq!(value["failed"], json!(false));
        assert_eq!(value["rc"], json!(0));
        assert_eq!(value["stdout_lines"], json!(["line1", "line2"]));
    }

    #[test]
    fn test_fatal_failure_classification() {
        let mut result = TaskResult::failed("boom");
        assert!(result.is_fatal_failure());

        result.ignored = true;
        assert!(!result.is_fatal_failure());

        assert!(!TaskResult::skipped("nope").is_fatal_failure());
    }

    #[test]
    fn test_result_scope_exposes_raw_fields() {
        let mut result = TaskResult::changed();
        result.rc = Some(2);

        let mut vars = Vars::new();
        vars.insert("existing".into(), json!("kept"));

        let scope = result_scope(&vars, &result, Some("out"));
        assert_eq!(scope.get("existing"), Some(&json!("kept")));
        assert_eq!(scope.get("rc"), Some(&json!(2)));
        assert_eq!(scope["out"]["rc"], json!(2));
    }

    #[test]
    fn test_timed_out_classification() {
        let result = TaskResult::timed_out("over ceiling");
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Timeout));
    }
}
