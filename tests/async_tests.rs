//! Integration tests for opt-in asynchronous detached execution.

mod common;

use common::*;
use converge::executor::{ExecutorConfig, TaskStatus};
use converge::playbook::{Play, Task};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn fast_async_task_completes_normally() {
    let (executor, _log) = test_executor(ExecutorConfig::default());
    let runtime = test_runtime(&["h1"]);

    let play = Play::new("async-ok", "test").task(
        Task::new("quick", "slow")
            .arg("millis", 20)
            .with_async(Duration::from_secs(5), Duration::from_millis(10)),
    );

    let recap = executor.run_play(&play, runtime).await.unwrap();
    assert!(!recap.has_failures());
    assert_eq!(recap.hosts["h1"].stats.changed, 1);
}

#[tokio::test]
async fn ceiling_exceeded_fails_with_timeout_classification() {
    let (executor, _log) = test_executor(ExecutorConfig::default());
    let runtime = test_runtime(&["h1"]);

    let play = Play::new("async-timeout", "test").task(
        Task::new("stuck", "slow")
            .arg("millis", 5_000)
            .with_async(Duration::from_millis(60), Duration::from_millis(10)),
    );

    let recap = executor.run_play(&play, runtime).await.unwrap();

    assert!(recap.hosts["h1"].failed);
    let records = recap.records_for("h1");
    assert_eq!(records[0].status, TaskStatus::Failed);
    assert!(records[0]
        .msg
        .as_deref()
        .unwrap()
        .contains("did not complete within"));
}

#[tokio::test]
async fn timed_out_host_is_removed_like_any_failure() {
    let (executor, log) = test_executor(ExecutorConfig::default());
    let runtime = test_runtime(&["h1", "h2"]);

    let play = Play::new("async-partial", "test")
        .task(
            Task::new("stall on h1", "slow")
                .arg("millis", 5_000)
                .when("inventory_hostname == 'h1'")
                .with_async(Duration::from_millis(60), Duration::from_millis(10)),
        )
        .task(Task::new("continue", "probe").arg("marker", "continue"));

    let recap = executor.run_play(&play, runtime).await.unwrap();

    assert!(recap.hosts["h1"].failed);
    assert!(!recap.hosts["h2"].failed);
    assert_eq!(hosts_with_marker(&log, "continue"), vec!["h2"]);
}
