//! # Converge - A Host-Fanout Task Execution Engine
//!
//! Converge is an async-first engine for applying idempotent, declarative
//! operations across a set of target hosts. It is the core a
//! configuration-management tool is built around: inventory-driven host
//! selection, layered variable precedence, parallel execution with
//! structured recovery, and deferred handlers.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts organized into groups (a DAG, not a tree), with
//!   pattern-based selection (`web:&prod:!staging`)
//! - **Variables**: nineteen layered sources folded by fixed precedence
//!   into one effective mapping per host
//! - **Modules**: idempotent apply steps, dispatched through a registry
//! - **Tasks and Blocks**: ordered operations with condition guards, tags,
//!   and block/rescue/always recovery
//! - **Handlers**: deferred, deduplicated actions that flush at designated
//!   points
//! - **Strategies**: lock-step (`linear`) or independent (`free`) host
//!   progression under a bounded worker pool, with rolling batches and a
//!   failure threshold
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Inventory     │──▶│  Variable Resolution │──▶│   Task Execution    │
//! │  (pattern → host │   │  (19 layers → one    │   │  (forks, strategies,│
//! │      set)        │   │   mapping per host)  │   │   batches, blocks)  │
//! └──────────────────┘   └─────────────────────┘   └──────────┬──────────┘
//!                                                             │
//!                                      ┌──────────────────────┼──────────┐
//!                                      ▼                      ▼          │
//!                              ┌──────────────┐      ┌──────────────┐    │
//!                              │   Handlers   │      │  Connections │    │
//!                              │ (deferred,   │      │ (local, or   │    │
//!                              │  once/run)   │      │  plugged in) │    │
//!                              └──────────────┘      └──────────────┘    │
//!                                                                        ▼
//!                                                              per-host recap
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use converge::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut inventory = Inventory::new();
//!     inventory.add_group(GroupBuilder::new("web").hosts(["w1", "w2"]).build())?;
//!
//!     let play = Play::new("deploy", "web")
//!         .task(Task::new("announce", "debug").arg("msg", "rolling out"))
//!         .task(Task::new("install", "command").arg("cmd", "install.sh").notify("restart app"))
//!         .handler(Handler::new("restart app", "command").arg("cmd", "restart.sh"));
//!
//!     let runtime = Arc::new(RuntimeContext::new(Arc::new(inventory)));
//!     let executor = Executor::new(ExecutorConfig { forks: 10, ..Default::default() });
//!
//!     let recap = executor.run_play(&play, runtime).await?;
//!     println!("{}", recap.summary());
//!     std::process::exit(recap.exit_code());
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    // Error handling
    pub use crate::error::{Error, Result};

    // Execution engine
    pub use crate::executor::{
        Executor, ExecutorConfig, PlayRecap, RuntimeContext, TaskResult, TaskStatus,
    };

    // Inventory
    pub use crate::inventory::{Group, GroupBuilder, Host, Inventory};

    // Playbook model
    pub use crate::playbook::{Block, Handler, Play, SerialSpec, Task, TaskItem};

    // Strategies
    pub use crate::strategy::Strategy;

    // Module system
    pub use crate::modules::{Module, ModuleOutput, ModuleRegistry};

    // Connections
    pub use crate::connection::{Connection, ConnectionError, LocalConnection, RetryConfig};

    // Facts
    pub use crate::facts::{FactCache, Facts};

    // Variables
    pub use crate::vars::{HashBehaviour, Precedence, Vars};
}

/// Error types and result aliases for engine operations.
pub mod error;

/// Host and group inventory with pattern-based selection.
///
/// The inventory defines the target hosts and their groupings. Groups form
/// a DAG (a group may have several parents); patterns combine names, globs,
/// and regexes with union/intersection/exclusion operators.
pub mod inventory;

/// Variable layering and precedence handling.
///
/// Implements the nineteen-layer precedence order, from role defaults up to
/// command-line extra vars, with configurable mapping merge behaviour.
pub mod vars;

/// Jinja2-compatible expression evaluation via minijinja.
///
/// Two-phase resolution: effective mappings are built eagerly, embedded
/// `{{ expr }}` references evaluate lazily at consumption time.
pub mod template;

/// At-rest encryption for sensitive variable values.
pub mod vault;

/// Host facts and the caller-owned fact cache.
pub mod facts;

/// Connection layer for reaching target hosts.
///
/// Provides the [`Connection`](connection::Connection) trait, a local
/// transport, and the retry policy for transient transport failures.
pub mod connection;

/// Built-in module implementations and the module registry.
pub mod modules;

/// Play, task, block, and handler definitions.
pub mod playbook;

/// Per-run handler notification state.
pub mod handlers;

/// Tag-based task filtering.
pub mod tags;

/// Execution strategies (linear and free).
pub mod strategy;

/// Core task execution engine.
///
/// Fans tasks out over hosts under a bounded worker pool, with lock-step or
/// free strategies, rolling batches, failure thresholds, and block
/// recovery.
pub mod executor;

/// Returns the current version of the crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
