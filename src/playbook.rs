//! Play, task, block, and handler definitions.
//!
//! A play maps a host pattern to an ordered list of items, where each item
//! is either a single task or a block with rescue/always sequences. These
//! types are plain data: loading them from YAML files is the job of an
//! external loader, and the executor consumes them as-is.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::strategy::Strategy;
use crate::vars::Vars;

/// A play: a host pattern plus the items to apply to the matched hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Name of the play
    #[serde(default)]
    pub name: String,

    /// Host pattern to match against inventory
    pub hosts: String,

    /// Whether to gather facts before executing items
    #[serde(default = "default_gather_facts")]
    pub gather_facts: bool,

    /// Play-level variables
    #[serde(default)]
    pub vars: Vars,

    /// Pre-loaded contents of the play's vars_files, in file order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars_files: Vec<Vars>,

    /// Tasks and blocks, in document order
    #[serde(default)]
    pub tasks: Vec<TaskItem>,

    /// Handlers that can be notified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<Handler>,

    /// Execution strategy
    #[serde(default)]
    pub strategy: Strategy,

    /// Rolling batch size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialSpec>,

    /// Maximum failure percentage before aborting remaining batches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fail_percentage: Option<u8>,

    /// Run pending handlers even when the play failed
    #[serde(default)]
    pub force_handlers: bool,

    /// Tags inherited by all items in the play
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_gather_facts() -> bool {
    true
}

impl Play {
    /// Creates a new play with the given name and host pattern.
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            gather_facts: true,
            vars: Vars::new(),
            vars_files: Vec::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
            strategy: Strategy::default(),
            serial: None,
            max_fail_percentage: None,
            force_handlers: false,
            tags: Vec::new(),
        }
    }

    /// Append a task.
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(TaskItem::Task(task));
        self
    }

    /// Append a block.
    pub fn block(mut self, block: Block) -> Self {
        self.tasks.push(TaskItem::Block(block));
        self
    }

    /// Register a handler.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Set a play variable.
    pub fn var(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Set the execution strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set rolling batch size.
    pub fn with_serial(mut self, serial: SerialSpec) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Set the failure threshold.
    pub fn with_max_fail_percentage(mut self, percentage: u8) -> Self {
        self.max_fail_percentage = Some(percentage);
        self
    }

    /// All task names in document order, descending into blocks.
    pub fn task_names(&self) -> Vec<&str> {
        fn collect<'a>(items: &'a [TaskItem], out: &mut Vec<&'a str>) {
            for item in items {
                match item {
                    TaskItem::Task(task) => out.push(task.name.as_str()),
                    TaskItem::Block(block) => {
                        collect(&block.block, out);
                        collect(&block.rescue, out);
                        collect(&block.always, out);
                    }
                }
            }
        }

        let mut names = Vec::new();
        collect(&self.tasks, &mut names);
        names
    }

    /// Total number of tasks, descending into blocks.
    pub fn task_count(&self) -> usize {
        self.task_names().len()
    }
}

/// One entry in a play's item list: a task or a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskItem {
    /// A block with optional rescue/always sequences
    Block(Block),
    /// A single task
    Task(Task),
}

/// An ordered sequence of items with structured error handling.
///
/// When an item of the main sequence fails, the rescue sequence runs; the
/// always sequence runs regardless of the outcome. Blocks nest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block name
    #[serde(default)]
    pub name: String,

    /// Main sequence
    pub block: Vec<TaskItem>,

    /// Recovery sequence, run when the main sequence fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rescue: Vec<TaskItem>,

    /// Cleanup sequence, always run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<TaskItem>,

    /// Block-level variables, visible to all items in the block
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    /// Condition guard for the whole block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Tags inherited by all items in the block
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Block {
    /// Creates a new named block.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block: Vec::new(),
            rescue: Vec::new(),
            always: Vec::new(),
            vars: Vars::new(),
            when: None,
            tags: Vec::new(),
        }
    }

    /// Append a task to the main sequence.
    pub fn task(mut self, task: Task) -> Self {
        self.block.push(TaskItem::Task(task));
        self
    }

    /// Append a nested block to the main sequence.
    pub fn nested(mut self, block: Block) -> Self {
        self.block.push(TaskItem::Block(block));
        self
    }

    /// Append a task to the rescue sequence.
    pub fn rescue_task(mut self, task: Task) -> Self {
        self.rescue.push(TaskItem::Task(task));
        self
    }

    /// Append a task to the always sequence.
    pub fn always_task(mut self, task: Task) -> Self {
        self.always.push(TaskItem::Task(task));
        self
    }

    /// Set a block variable.
    pub fn var(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Set the condition guard.
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Opt-in asynchronous detached execution for a long-running task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AsyncSpec {
    /// Wall-clock ceiling; the task counts as failed once exceeded
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Poll interval for completion checks
    #[serde(with = "humantime_serde")]
    pub poll: Duration,
}

/// A named, idempotent unit of declarative intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task name (displayed during execution)
    #[serde(default)]
    pub name: String,

    /// Module to apply
    pub module: String,

    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,

    /// Condition guard evaluated against the host's effective variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Task-level variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    /// Tags for task filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Handlers to notify when the task reports a change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,

    /// Variable name to register the result under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,

    /// Record a failure without failing the host
    #[serde(default)]
    pub ignore_errors: bool,

    /// Override for the change classification, evaluated against the raw
    /// result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_when: Option<String>,

    /// Override for the failure classification, evaluated against the raw
    /// result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_when: Option<String>,

    /// Number of retries when `until` is not yet satisfied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Delay between retries in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Retry-until condition, evaluated against the raw result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,

    /// Detached execution with poll interval and wall-clock ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_spec: Option<AsyncSpec>,
}

impl Task {
    /// Creates a new task.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
            vars: Vars::new(),
            tags: Vec::new(),
            notify: Vec::new(),
            register: None,
            ignore_errors: false,
            changed_when: None,
            failed_when: None,
            retries: None,
            delay: None,
            until: None,
            async_spec: None,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the condition guard.
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// Set a task variable.
    pub fn var(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a handler to notify.
    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    /// Register the result under a variable name.
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    /// Set ignore_errors.
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Set the changed_when override.
    pub fn changed_when(mut self, condition: impl Into<String>) -> Self {
        self.changed_when = Some(condition.into());
        self
    }

    /// Set the failed_when override.
    pub fn failed_when(mut self, condition: impl Into<String>) -> Self {
        self.failed_when = Some(condition.into());
        self
    }

    /// Retry until the condition holds.
    pub fn until(mut self, condition: impl Into<String>, retries: u32, delay_secs: u64) -> Self {
        self.until = Some(condition.into());
        self.retries = Some(retries);
        self.delay = Some(delay_secs);
        self
    }

    /// Run detached with the given ceiling and poll interval.
    pub fn with_async(mut self, timeout: Duration, poll: Duration) -> Self {
        self.async_spec = Some(AsyncSpec { timeout, poll });
        self
    }
}

/// A named deferred task, triggered by notifications and executed at most
/// once per run at a flush point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    /// Handler name (matched against notify entries)
    pub name: String,

    /// Module to apply
    pub module: String,

    /// Module arguments
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,

    /// Optional condition guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Additional notification names this handler responds to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
}

impl Handler {
    /// Creates a new handler.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
            listen: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the condition guard.
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// Add a listen topic.
    pub fn listen(mut self, name: impl Into<String>) -> Self {
        self.listen.push(name.into());
        self
    }

    /// All names this handler responds to.
    pub fn trigger_names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        names.extend(self.listen.iter().map(String::as_str));
        names
    }

    /// View this handler as a task for execution.
    pub fn as_task(&self) -> Task {
        Task {
            name: self.name.clone(),
            module: self.module.clone(),
            args: self.args.clone(),
            when: self.when.clone(),
            ..Task::new(self.name.clone(), self.module.clone())
        }
    }
}

/// Rolling batch specification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerialSpec {
    /// Fixed batch size
    Fixed(usize),
}

impl SerialSpec {
    /// Effective batch size for a host set of the given size.
    pub fn batch_size(&self, total: usize) -> usize {
        match self {
            SerialSpec::Fixed(n) => (*n).max(1).min(total.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_play_builder() {
        let play = Play::new("deploy", "web")
            .var("version", json!("1.0"))
            .task(Task::new("ping", "debug"))
            .handler(Handler::new("restart app", "command").arg("cmd", "restart"));

        assert_eq!(play.name, "deploy");
        assert_eq!(play.tasks.len(), 1);
        assert_eq!(play.handlers.len(), 1);
    }

    #[test]
    fn test_task_names_descend_into_blocks() {
        let play = Play::new("p", "all")
            .task(Task::new("one", "debug"))
            .block(
                Block::new("b")
                    .task(Task::new("two", "debug"))
                    .rescue_task(Task::new("three", "debug"))
                    .always_task(Task::new("four", "debug")),
            );

        assert_eq!(play.task_names(), vec!["one", "two", "three", "four"]);
        assert_eq!(play.task_count(), 4);
    }

    #[test]
    fn test_handler_trigger_names() {
        let handler = Handler::new("restart nginx", "command")
            .listen("restart web services")
            .listen("restart all");

        assert_eq!(
            handler.trigger_names(),
            vec!["restart nginx", "restart web services", "restart all"]
        );
    }

    #[test]
    fn test_serial_batch_size() {
        assert_eq!(SerialSpec::Fixed(2).batch_size(6), 2);
        assert_eq!(SerialSpec::Fixed(10).batch_size(6), 6);
        assert_eq!(SerialSpec::Fixed(0).batch_size(6), 1);
    }

    #[test]
    fn test_task_item_deserialization() {
        let json = serde_json::json!({
            "name": "guarded",
            "block": [
                {"name": "inner", "module": "debug", "args": {}}
            ],
            "rescue": [],
            "always": []
        });
        let item: TaskItem = serde_json::from_value(json).unwrap();
        assert!(matches!(item, TaskItem::Block(_)));

        let json = serde_json::json!({"name": "t", "module": "debug"});
        let item: TaskItem = serde_json::from_value(json).unwrap();
        assert!(matches!(item, TaskItem::Task(_)));
    }
}
