//! Run result aggregation.
//!
//! The run result is an append-only structure: every (host, task) outcome
//! is recorded and reported, never silently dropped. Per-host slots are
//! disjoint, so host tasks write concurrently without contending; the
//! record list itself takes a short lock per append.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::task::{TaskResult, TaskStatus};
use crate::error::Error;

/// One (host, task) outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Target host
    pub host: String,
    /// Task name
    pub task: String,
    /// Final status
    pub status: TaskStatus,
    /// Whether state was mutated
    pub changed: bool,
    /// Failure recorded but not fatal
    pub ignored: bool,
    /// Message from the apply step
    pub msg: Option<String>,
    /// Rendered diff (diff mode)
    pub diff: Option<String>,
}

/// Per-host status counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HostStats {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
    pub ignored: usize,
}

impl HostStats {
    /// Merge counters from another stats value.
    pub fn merge(&mut self, other: &HostStats) {
        self.ok += other.ok;
        self.changed += other.changed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unreachable += other.unreachable;
        self.ignored += other.ignored;
    }
}

/// Aggregated per-host outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostSummary {
    /// Status counters
    pub stats: HostStats,
    /// The host ended in an unrecovered failure
    pub failed: bool,
    /// The host's transport could not be established
    pub unreachable: bool,
}

impl HostSummary {
    /// Whether the host still participates in subsequent operations.
    pub fn is_active(&self) -> bool {
        !self.failed && !self.unreachable
    }
}

/// Shared, append-only run result collector.
#[derive(Debug, Default)]
pub struct RunRecorder {
    records: Mutex<Vec<TaskRecord>>,
    hosts: DashMap<String, HostSummary>,
}

impl RunRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create zeroed entries so every targeted host appears in the
    /// final table even if it never ran a task.
    pub fn register_hosts<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for host in hosts {
            self.hosts.entry(host.into()).or_default();
        }
    }

    /// Record one (host, task) outcome.
    pub fn record(&self, host: &str, task: &str, result: &TaskResult) {
        self.records.lock().push(TaskRecord {
            host: host.to_string(),
            task: task.to_string(),
            status: result.status,
            changed: result.changed,
            ignored: result.ignored,
            msg: result.msg.clone(),
            diff: result.diff.clone(),
        });

        let mut entry = self.hosts.entry(host.to_string()).or_default();
        match result.status {
            TaskStatus::Ok => entry.stats.ok += 1,
            TaskStatus::Changed => entry.stats.changed += 1,
            TaskStatus::Failed if result.ignored => entry.stats.ignored += 1,
            TaskStatus::Failed => entry.stats.failed += 1,
            TaskStatus::Skipped => entry.stats.skipped += 1,
            TaskStatus::Unreachable => {
                entry.stats.unreachable += 1;
                entry.unreachable = true;
            }
        }
    }

    /// Mark a host as ended in unrecovered failure.
    pub fn mark_failed(&self, host: &str) {
        self.hosts.entry(host.to_string()).or_default().failed = true;
    }

    /// Whether a host still participates in subsequent operations.
    pub fn is_active(&self, host: &str) -> bool {
        self.hosts
            .get(host)
            .map(|summary| summary.is_active())
            .unwrap_or(true)
    }

    /// The subset of `hosts` still participating, order preserved.
    pub fn active_hosts(&self, hosts: &[String]) -> Vec<String> {
        hosts
            .iter()
            .filter(|h| self.is_active(h))
            .cloned()
            .collect()
    }

    /// How many of `hosts` ended failed or unreachable.
    pub fn failed_count(&self, hosts: &[String]) -> usize {
        hosts.iter().filter(|h| !self.is_active(h)).count()
    }

    /// Snapshot into a recap, hosts ordered as given. Records are drained
    /// out of the recorder.
    pub fn snapshot_recap(
        &self,
        play: String,
        host_order: &[String],
        started_at: DateTime<Utc>,
        aborted: Option<Error>,
    ) -> PlayRecap {
        let records = std::mem::take(&mut *self.records.lock());
        let mut hosts = IndexMap::new();
        for host in host_order {
            if let Some(summary) = self.hosts.get(host) {
                hosts.insert(host.clone(), summary.clone());
            }
        }

        PlayRecap {
            run_id: Uuid::new_v4(),
            play,
            started_at,
            finished_at: Utc::now(),
            hosts,
            records,
            aborted,
        }
    }
}

/// Final result of one play: the per-host, per-operation status table.
#[derive(Debug)]
pub struct PlayRecap {
    /// Run identifier
    pub run_id: Uuid,
    /// Play name
    pub play: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Per-host summaries, in targeted-host order
    pub hosts: IndexMap<String, HostSummary>,
    /// Every (host, task) outcome, in completion order
    pub records: Vec<TaskRecord>,
    /// Set when the run aborted (threshold exceeded)
    pub aborted: Option<Error>,
}

impl PlayRecap {
    /// Whether any host ended failed or unreachable without recovery.
    pub fn has_failures(&self) -> bool {
        self.hosts.values().any(|h| h.failed || h.unreachable)
    }

    /// Process exit status for an embedding caller: nonzero when any host
    /// ended failed/unreachable or the run aborted.
    pub fn exit_code(&self) -> i32 {
        if let Some(err) = &self.aborted {
            return err.exit_code();
        }
        if self.hosts.values().any(|h| h.failed) {
            return 2;
        }
        if self.hosts.values().any(|h| h.unreachable) {
            return 3;
        }
        0
    }

    /// Records for one host, in completion order.
    pub fn records_for(&self, host: &str) -> Vec<&TaskRecord> {
        self.records.iter().filter(|r| r.host == host).collect()
    }

    /// Human-readable recap table.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (host, summary) in &self.hosts {
            out.push_str(&format!(
                "{:<24} : ok={} changed={} unreachable={} failed={} skipped={} ignored={}\n",
                host,
                summary.stats.ok,
                summary.stats.changed,
                summary.stats.unreachable,
                summary.stats.failed,
                summary.stats.skipped,
                summary.stats.ignored,
            ));
        }
        if let Some(err) = &self.aborted {
            out.push_str(&format!("aborted: {}\n", err));
        }
        out
    }
}
