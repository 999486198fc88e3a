//! Block execution: structured main/rescue/always recovery.
//!
//! Each block runs as a small state machine per host. A failure in the main
//! sequence hands control to the rescue sequence when one exists; the
//! always sequence runs regardless of the outcome. A failure inside rescue
//! or always is fatal for the host. An `ignore_errors` failure on an
//! individual task never enters this machine: the task is recorded as
//! failed-but-ignored and the main sequence continues.

use tracing::debug;

use crate::playbook::{Block, TaskItem};
use crate::vars::Vars;

use super::runtime::ExecutionContext;
use super::task::{run_task, TaskStatus};
use super::RunEnv;

/// State machine positions for one block on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    RunningMain,
    RunningRescue,
    RunningAlways,
    Done,
    Aborted,
}

/// Outcome of one block on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Main sequence succeeded
    Completed,
    /// Main sequence failed, rescue recovered; the host is not failed
    Recovered,
    /// Unrecovered failure; the host is failed
    Failed,
    /// Transport lost; the host is excluded from the rest of the run
    Unreachable,
}

/// How one item of a sequence ended.
struct ItemEnd {
    fatal: bool,
    unreachable: bool,
}

/// Run a block on one host.
pub(crate) async fn run_block_on_host(
    block: &Block,
    ctx: &ExecutionContext,
    env: &RunEnv,
    parent_vars: &Vars,
) -> BlockOutcome {
    let mut block_vars = parent_vars.clone();
    for (key, value) in &block.vars {
        block_vars.insert(key.clone(), value.clone());
    }

    // Block-level guard: skip every task without touching the host.
    if let Some(condition) = &block.when {
        let holds = env
            .runtime
            .effective_vars(&ctx.host, &block_vars, &Vars::new())
            .and_then(|vars| env.engine.eval_condition(condition, &vars));
        match holds {
            Ok(true) => {}
            Ok(false) => {
                record_skipped(&block.block, ctx, env, condition);
                return BlockOutcome::Completed;
            }
            Err(e) => {
                let result = super::task::TaskResult::failed(e.to_string());
                env.recorder.record(&ctx.host, &block.name, &result);
                return BlockOutcome::Failed;
            }
        }
    }

    let mut state = BlockState::RunningMain;
    debug!(block = %block.name, host = %ctx.host, ?state, "entering block");

    let mut failed_in_main = false;
    for item in &block.block {
        let end = run_item(item, ctx, env, &block_vars).await;
        if end.unreachable {
            return BlockOutcome::Unreachable;
        }
        if end.fatal {
            failed_in_main = true;
            break;
        }
    }

    let rescued = failed_in_main && !block.rescue.is_empty();
    let mut rescue_failed = false;
    if rescued {
        state = BlockState::RunningRescue;
        debug!(block = %block.name, host = %ctx.host, ?state, "main sequence failed, running rescue");
        for item in &block.rescue {
            let end = run_item(item, ctx, env, &block_vars).await;
            if end.unreachable {
                return BlockOutcome::Unreachable;
            }
            if end.fatal {
                rescue_failed = true;
                break;
            }
        }
    }

    // The always sequence is attempted once, whatever happened before.
    state = BlockState::RunningAlways;
    debug!(block = %block.name, host = %ctx.host, ?state, "running always sequence");
    let mut always_failed = false;
    for item in &block.always {
        let end = run_item(item, ctx, env, &block_vars).await;
        if end.unreachable {
            return BlockOutcome::Unreachable;
        }
        if end.fatal {
            always_failed = true;
            break;
        }
    }

    let outcome = if !failed_in_main && !always_failed {
        BlockOutcome::Completed
    } else if failed_in_main && rescued && !rescue_failed && !always_failed {
        BlockOutcome::Recovered
    } else {
        BlockOutcome::Failed
    };

    state = match outcome {
        BlockOutcome::Failed => BlockState::Aborted,
        _ => BlockState::Done,
    };
    debug!(block = %block.name, host = %ctx.host, ?state, ?outcome, "leaving block");

    outcome
}

/// Run one item of a sequence; blocks recurse.
async fn run_item(
    item: &TaskItem,
    ctx: &ExecutionContext,
    env: &RunEnv,
    block_vars: &Vars,
) -> ItemEnd {
    match item {
        TaskItem::Task(task) => {
            let result = run_task(
                task,
                ctx,
                &env.runtime,
                &env.registry,
                &env.engine,
                &env.handlers,
                block_vars,
                &env.retry,
            )
            .await;
            env.recorder.record(&ctx.host, &task.name, &result);
            ItemEnd {
                fatal: result.is_fatal_failure(),
                unreachable: result.status == TaskStatus::Unreachable,
            }
        }
        TaskItem::Block(nested) => {
            let outcome = Box::pin(run_block_on_host(nested, ctx, env, block_vars)).await;
            ItemEnd {
                fatal: outcome == BlockOutcome::Failed,
                unreachable: outcome == BlockOutcome::Unreachable,
            }
        }
    }
}

/// Record every task of a guarded-out sequence as skipped.
fn record_skipped(items: &[TaskItem], ctx: &ExecutionContext, env: &RunEnv, condition: &str) {
    for item in items {
        match item {
            TaskItem::Task(task) => {
                let result = super::task::TaskResult::skipped(format!(
                    "block condition '{}' was false",
                    condition
                ));
                env.recorder.record(&ctx.host, &task.name, &result);
            }
            TaskItem::Block(nested) => record_skipped(&nested.block, ctx, env, condition),
        }
    }
}
