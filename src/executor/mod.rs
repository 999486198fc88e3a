//! Core task execution engine.
//!
//! The executor fans an ordered list of tasks and blocks out over a
//! resolved host set:
//!
//! - **Parallelism** is bounded by the `forks` worker limit.
//! - **Linear strategy** advances operation-by-operation in lock-step with
//!   a barrier before each operation; the **free strategy** lets each host
//!   run the whole list independently.
//! - **Rolling batches** (`serial`) partition the host set; crossing
//!   `max_fail_percentage` aborts the batches that have not started.
//! - **Handlers** flush at the end of each block, at the end of the play,
//!   and at explicit flush directives.
//!
//! The run always finishes with a per-host, per-operation status table
//! ([`PlayRecap`]); a host that fails or becomes unreachable is removed
//! from subsequent operations without aborting the others.

pub mod async_task;
pub mod block;
pub mod result;
pub mod runtime;
pub mod task;

pub use block::{BlockOutcome, BlockState};
pub use result::{HostStats, HostSummary, PlayRecap, RunRecorder, TaskRecord};
pub use runtime::{ExecutionContext, RuntimeContext};
pub use task::{FailureKind, TaskResult, TaskStatus};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::connection::RetryConfig;
use crate::error::{Error, Result};
use crate::handlers::HandlerState;
use crate::modules::ModuleRegistry;
use crate::playbook::{Play, Task, TaskItem};
use crate::strategy::Strategy;
use crate::tags::TagFilter;
use crate::template::TemplateEngine;
use crate::vars::Vars;

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of parallel host executions
    pub forks: usize,
    /// Dry run: apply steps report would-be results without mutating
    pub check_mode: bool,
    /// Collect before/after diffs
    pub diff_mode: bool,
    /// Further restrict the resolved host set
    pub limit: Option<String>,
    /// Only run tasks carrying one of these tags
    pub tags: Vec<String>,
    /// Skip tasks carrying one of these tags
    pub skip_tags: Vec<String>,
    /// Skip all tasks before the named one, in document order
    pub start_at_task: Option<String>,
    /// Override the play's execution strategy
    pub strategy: Option<Strategy>,
    /// Retry policy for transient transport failures
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            forks: 5,
            check_mode: false,
            diff_mode: false,
            limit: None,
            tags: Vec::new(),
            skip_tags: Vec::new(),
            start_at_task: None,
            strategy: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Everything a spawned host task needs, bundled behind one `Arc`.
pub(crate) struct RunEnv {
    pub runtime: Arc<RuntimeContext>,
    pub registry: Arc<ModuleRegistry>,
    pub engine: Arc<TemplateEngine>,
    pub handlers: Arc<Mutex<HandlerState>>,
    pub recorder: Arc<RunRecorder>,
    pub semaphore: Arc<Semaphore>,
    pub retry: RetryConfig,
    pub check_mode: bool,
    pub diff_mode: bool,
}

impl RunEnv {
    fn context_for(&self, host: &str) -> ExecutionContext {
        ExecutionContext {
            host: host.to_string(),
            check_mode: self.check_mode,
            diff_mode: self.diff_mode,
        }
    }
}

/// The main executor engine.
pub struct Executor {
    config: ExecutorConfig,
    registry: Arc<ModuleRegistry>,
    engine: Arc<TemplateEngine>,
}

impl Executor {
    /// Create a new executor with the given configuration and the built-in
    /// module registry.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            registry: ModuleRegistry::shared_builtins(),
            engine: Arc::new(TemplateEngine::new()),
        }
    }

    /// Replace the module registry.
    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// The executor's configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a play against the runtime's inventory.
    #[instrument(skip_all, fields(play = %play.name))]
    pub async fn run_play(&self, play: &Play, runtime: Arc<RuntimeContext>) -> Result<PlayRecap> {
        let started_at = Utc::now();
        info!("starting play");

        runtime.set_play_vars(play.vars.clone(), play.vars_files.clone());

        let mut hosts = runtime.inventory().resolve_pattern(&play.hosts)?;
        if let Some(limit) = &self.config.limit {
            let allowed: HashSet<String> = runtime
                .inventory()
                .resolve_pattern(limit)?
                .into_iter()
                .collect();
            hosts.retain(|h| allowed.contains(h));
        }

        let recorder = Arc::new(RunRecorder::new());
        recorder.register_hosts(hosts.iter().cloned());

        if hosts.is_empty() {
            warn!("no hosts matched");
            return Ok(recorder.snapshot_recap(play.name.clone(), &hosts, started_at, None));
        }

        let items = self.prepare_items(play)?;

        let handlers = Arc::new(Mutex::new(HandlerState::new()));
        handlers.lock().register_all(&play.handlers);

        if play.gather_facts {
            for host in &hosts {
                runtime.ensure_facts(host);
            }
        }

        let env = Arc::new(RunEnv {
            runtime: runtime.clone(),
            registry: self.registry.clone(),
            engine: self.engine.clone(),
            handlers,
            recorder: recorder.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.forks.max(1))),
            retry: self.config.retry,
            check_mode: self.config.check_mode,
            diff_mode: self.config.diff_mode,
        });

        let strategy = self.config.strategy.unwrap_or(play.strategy);
        let batches: Vec<Vec<String>> = match &play.serial {
            Some(spec) => hosts
                .chunks(spec.batch_size(hosts.len()))
                .map(|c| c.to_vec())
                .collect(),
            None => vec![hosts.clone()],
        };

        let mut aborted: Option<Error> = None;
        let mut processed: Vec<String> = Vec::new();

        for (index, batch) in batches.iter().enumerate() {
            debug!(batch = index + 1, hosts = batch.len(), "starting batch");
            match strategy {
                Strategy::Linear => run_linear(&env, &items, batch).await,
                Strategy::Free => run_free(&env, &items, batch).await,
            }

            processed.extend(batch.iter().cloned());

            // The threshold cancels batches that have not started; after
            // the final batch there is nothing left to abort.
            let batches_remain = index + 1 < batches.len();
            if !batches_remain {
                continue;
            }

            if let Some(max_percentage) = play.max_fail_percentage {
                let failed = recorder.failed_count(&processed);
                if failed * 100 > usize::from(max_percentage) * processed.len() {
                    warn!(
                        failed,
                        processed = processed.len(),
                        max_percentage,
                        "failure threshold exceeded, aborting remaining batches"
                    );
                    aborted = Some(Error::ThresholdExceeded {
                        failed,
                        processed: processed.len(),
                        max_percentage,
                    });
                    break;
                }
            }
        }

        // End-of-play flush point. An aborted run reaches no flush point
        // unless the play forces handlers.
        if aborted.is_none() || play.force_handlers {
            flush_handlers(&env).await;
        }

        info!("play finished");
        Ok(recorder.snapshot_recap(play.name.clone(), &hosts, started_at, aborted))
    }

    /// Apply start-at and tag filtering to the play's items.
    fn prepare_items(&self, play: &Play) -> Result<Vec<TaskItem>> {
        let mut items = play.tasks.clone();

        if let Some(target) = &self.config.start_at_task {
            let mut found = false;
            items = prune_before(&items, target, &mut found);
            if !found {
                return Err(Error::Internal(format!(
                    "start-at task '{}' not found in play '{}'",
                    target, play.name
                )));
            }
        }

        let filter = TagFilter::new()
            .with_tags(self.config.tags.clone())
            .with_skip_tags(self.config.skip_tags.clone());
        if filter.is_active() {
            items = filter_items(&items, &filter, &play.tags);
        }

        Ok(items)
    }
}

/// Drop every task before the named one, in document order.
fn prune_before(items: &[TaskItem], target: &str, found: &mut bool) -> Vec<TaskItem> {
    let mut out = Vec::new();
    for item in items {
        if *found {
            out.push(item.clone());
            continue;
        }
        match item {
            TaskItem::Task(task) => {
                if task.name == target {
                    *found = true;
                    out.push(item.clone());
                }
            }
            TaskItem::Block(block) => {
                let mut pruned = block.clone();
                pruned.block = prune_before(&block.block, target, found);
                if !pruned.block.is_empty() {
                    out.push(TaskItem::Block(pruned));
                }
            }
        }
    }
    out
}

/// Filter tasks by tag-set membership; parent tags are inherited.
fn filter_items(items: &[TaskItem], filter: &TagFilter, inherited: &[String]) -> Vec<TaskItem> {
    let mut out = Vec::new();
    for item in items {
        match item {
            TaskItem::Task(task) => {
                let mut tags = inherited.to_vec();
                tags.extend(task.tags.iter().cloned());
                if filter.should_run(&tags) {
                    out.push(item.clone());
                }
            }
            TaskItem::Block(block) => {
                let mut tags = inherited.to_vec();
                tags.extend(block.tags.iter().cloned());
                let mut filtered = block.clone();
                filtered.block = filter_items(&block.block, filter, &tags);
                filtered.rescue = filter_items(&block.rescue, filter, &tags);
                filtered.always = filter_items(&block.always, filter, &tags);
                if !filtered.block.is_empty() {
                    out.push(TaskItem::Block(filtered));
                }
            }
        }
    }
    out
}

/// Whether a task is the explicit handler-flush directive.
fn is_flush_directive(task: &Task) -> bool {
    task.module == "meta"
        && task
            .args
            .values()
            .any(|v| v.as_str() == Some("flush_handlers"))
}

/// Lock-step strategy: a barrier before each operation; hosts that failed
/// are removed from subsequent operations but never block the others from
/// finishing outstanding work at the barrier.
async fn run_linear(env: &Arc<RunEnv>, items: &[TaskItem], batch: &[String]) {
    for item in items {
        let active = env.recorder.active_hosts(batch);
        if active.is_empty() {
            warn!("no active hosts remain in batch");
            break;
        }

        match item {
            TaskItem::Task(task) if is_flush_directive(task) => {
                flush_handlers(env).await;
            }
            TaskItem::Task(task) => {
                let handles: Vec<_> = active
                    .iter()
                    .map(|host| {
                        let env = env.clone();
                        let task = task.clone();
                        let host = host.clone();
                        tokio::spawn(async move {
                            let _permit =
                                env.semaphore.acquire().await.expect("semaphore closed");
                            let ctx = env.context_for(&host);
                            let result = task::run_task(
                                &task,
                                &ctx,
                                &env.runtime,
                                &env.registry,
                                &env.engine,
                                &env.handlers,
                                &Vars::new(),
                                &env.retry,
                            )
                            .await;
                            let fatal = result.is_fatal_failure();
                            env.recorder.record(&host, &task.name, &result);
                            if fatal {
                                env.recorder.mark_failed(&host);
                            }
                        })
                    })
                    .collect();
                join_all(handles).await;
            }
            TaskItem::Block(blk) => {
                let handles: Vec<_> = active
                    .iter()
                    .map(|host| {
                        let env = env.clone();
                        let blk = blk.clone();
                        let host = host.clone();
                        tokio::spawn(async move {
                            let _permit =
                                env.semaphore.acquire().await.expect("semaphore closed");
                            let ctx = env.context_for(&host);
                            let outcome =
                                block::run_block_on_host(&blk, &ctx, &env, &Vars::new()).await;
                            if outcome == BlockOutcome::Failed {
                                env.recorder.mark_failed(&host);
                            }
                        })
                    })
                    .collect();
                join_all(handles).await;

                // End-of-block flush point.
                flush_handlers(env).await;
            }
        }
    }
}

/// Free strategy: each host runs the whole item list independently, bounded
/// only by worker-pool availability.
async fn run_free(env: &Arc<RunEnv>, items: &[TaskItem], batch: &[String]) {
    let handles: Vec<_> = batch
        .iter()
        .map(|host| {
            let env = env.clone();
            let items = items.to_vec();
            let host = host.clone();
            tokio::spawn(async move {
                let _permit = env.semaphore.acquire().await.expect("semaphore closed");
                let ctx = env.context_for(&host);

                for item in &items {
                    if !env.recorder.is_active(&host) {
                        break;
                    }
                    match item {
                        TaskItem::Task(task) if is_flush_directive(task) => {
                            flush_handlers(&env).await;
                        }
                        TaskItem::Task(task) => {
                            let result = task::run_task(
                                task,
                                &ctx,
                                &env.runtime,
                                &env.registry,
                                &env.engine,
                                &env.handlers,
                                &Vars::new(),
                                &env.retry,
                            )
                            .await;
                            let fatal = result.is_fatal_failure();
                            env.recorder.record(&host, &task.name, &result);
                            if fatal {
                                env.recorder.mark_failed(&host);
                                break;
                            }
                        }
                        TaskItem::Block(blk) => {
                            let outcome =
                                block::run_block_on_host(blk, &ctx, &env, &Vars::new()).await;
                            match outcome {
                                BlockOutcome::Failed => {
                                    env.recorder.mark_failed(&host);
                                    break;
                                }
                                BlockOutcome::Unreachable => break,
                                _ => {}
                            }
                        }
                    }
                }
            })
        })
        .collect();

    join_all(handles).await;
}

/// Run every triggered, not-yet-executed handler once, in declaration
/// order, on the hosts that notified it. Safe to call concurrently: a
/// handler is marked executed before it runs.
///
/// Handler tasks do not take worker permits; a flushing host under the
/// free strategy still holds its own permit, and handler fan-out is
/// already bounded by the notifying host count.
async fn flush_handlers(env: &Arc<RunEnv>) {
    loop {
        let next = {
            let mut state = env.handlers.lock();
            match state.pending().into_iter().next() {
                Some((handler, hosts)) => {
                    state.mark_executed(&handler.name);
                    Some((handler, hosts))
                }
                None => None,
            }
        };

        let Some((handler, hosts)) = next else { break };
        info!(handler = %handler.name, hosts = hosts.len(), "running handler");

        let handler_task = handler.as_task();
        let handles: Vec<_> = hosts
            .iter()
            .filter(|host| env.recorder.is_active(host))
            .map(|host| {
                let env = env.clone();
                let handler_task = handler_task.clone();
                let host = host.clone();
                tokio::spawn(async move {
                    let ctx = env.context_for(&host);
                    let result = task::run_task(
                        &handler_task,
                        &ctx,
                        &env.runtime,
                        &env.registry,
                        &env.engine,
                        &env.handlers,
                        &Vars::new(),
                        &env.retry,
                    )
                    .await;
                    let fatal = result.is_fatal_failure();
                    env.recorder.record(&host, &handler_task.name, &result);
                    if fatal {
                        env.recorder.mark_failed(&host);
                    }
                })
            })
            .collect();
        join_all(handles).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::Block;

    #[test]
    fn test_flush_directive_detection() {
        let meta = Task::new("flush", "meta").arg("_raw_params", "flush_handlers");
        assert!(is_flush_directive(&meta));
        assert!(!is_flush_directive(&Task::new("t", "debug")));
    }

    #[test]
    fn test_prune_before_flat_list() {
        let items = vec![
            TaskItem::Task(Task::new("one", "debug")),
            TaskItem::Task(Task::new("two", "debug")),
            TaskItem::Task(Task::new("three", "debug")),
        ];

        let mut found = false;
        let pruned = prune_before(&items, "two", &mut found);
        assert!(found);
        let names: Vec<_> = pruned
            .iter()
            .map(|i| match i {
                TaskItem::Task(t) => t.name.clone(),
                TaskItem::Block(b) => b.name.clone(),
            })
            .collect();
        assert_eq!(names, vec!["two", "three"]);
    }

    #[test]
    fn test_prune_before_inside_block() {
        let items = vec![
            TaskItem::Task(Task::new("early", "debug")),
            TaskItem::Block(
                Block::new("blk")
                    .task(Task::new("skipped-too", "debug"))
                    .task(Task::new("target", "debug"))
                    .task(Task::new("after", "debug")),
            ),
        ];

        let mut found = false;
        let pruned = prune_before(&items, "target", &mut found);
        assert!(found);
        assert_eq!(pruned.len(), 1);
        match &pruned[0] {
            TaskItem::Block(b) => assert_eq!(b.block.len(), 2),
            TaskItem::Task(_) => panic!("expected block"),
        }
    }

    #[test]
    fn test_filter_items_inherits_block_tags() {
        let filter = TagFilter::new().with_tags(vec!["web".to_string()]);
        let items = vec![TaskItem::Block(
            Block::new("tagged-block")
                .tag("web")
                .task(Task::new("inner", "debug")),
        )];

        let filtered = filter_items(&items, &filter, &[]);
        assert_eq!(filtered.len(), 1);

        let filter = TagFilter::new().with_tags(vec!["db".to_string()]);
        let filtered = filter_items(&items, &filter, &[]);
        assert!(filtered.is_empty());
    }
}
