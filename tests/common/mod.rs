//! Shared fixtures for the integration suites: stateful test modules, an
//! unreachable transport, and inventory/runtime helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use converge::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions,
};
use converge::executor::{Executor, ExecutorConfig, RuntimeContext};
use converge::inventory::{GroupBuilder, Host, Inventory};
use converge::modules::{
    Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry, ModuleResult, ParamExt,
};

/// Shared (host, marker) execution log.
pub type Log = Arc<Mutex<Vec<(String, String)>>>;

/// Entries recorded so far.
pub fn log_entries(log: &Log) -> Vec<(String, String)> {
    log.lock().clone()
}

/// Markers recorded for one host, in order.
pub fn markers_for(log: &Log, host: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|(h, _)| h == host)
        .map(|(_, m)| m.clone())
        .collect()
}

/// Hosts that recorded a given marker.
pub fn hosts_with_marker(log: &Log, marker: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|(_, m)| m == marker)
        .map(|(h, _)| h.clone())
        .collect()
}

/// Records a marker per application; optionally fails on selected hosts.
///
/// Parameters: `marker` (string, default "probe"), `changed` (bool, default
/// true), `fail_on` (list of host names that fail).
pub struct ProbeModule {
    pub log: Log,
}

#[async_trait]
impl Module for ProbeModule {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn description(&self) -> &'static str {
        "Record an execution marker"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let marker = params
            .get_string("marker")?
            .unwrap_or_else(|| "probe".to_string());
        self.log.lock().push((ctx.host.clone(), marker.clone()));

        if let Some(fail_on) = params.get_vec_string("fail_on")? {
            if fail_on.contains(&ctx.host) {
                return Ok(ModuleOutput::failed(format!("probe '{}' failed", marker)));
            }
        }

        if params.get_bool_or("changed", true) {
            Ok(ModuleOutput::changed(format!("probe '{}'", marker)))
        } else {
            Ok(ModuleOutput::ok(format!("probe '{}'", marker)))
        }
    }
}

/// Converges a named per-host marker: first apply changes, later applies
/// are satisfied. Check mode reports the would-be change without mutating.
#[derive(Clone, Default)]
pub struct StateModule {
    pub satisfied: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl Module for StateModule {
    fn name(&self) -> &'static str {
        "state"
    }

    fn description(&self) -> &'static str {
        "Converge an in-memory marker"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let key = format!("{}:{}", ctx.host, params.get_string_required("key")?);
        let mut satisfied = self.satisfied.lock();

        if satisfied.contains(&key) {
            return Ok(ModuleOutput::ok("already satisfied"));
        }
        if ctx.check_mode {
            return Ok(ModuleOutput::changed("would be created"));
        }
        satisfied.insert(key);
        Ok(ModuleOutput::changed("created"))
    }

    fn required_params(&self) -> &[&'static str] {
        &["key"]
    }
}

/// Fails until the per-host attempt counter reaches `succeed_after`.
#[derive(Clone, Default)]
pub struct FlakyModule {
    pub attempts: Arc<Mutex<HashMap<String, u32>>>,
}

#[async_trait]
impl Module for FlakyModule {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn description(&self) -> &'static str {
        "Fail a configurable number of times, then succeed"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let succeed_after = params.get_i64("succeed_after")?.unwrap_or(2) as u32;
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(ctx.host.clone()).or_insert(0);
        *count += 1;

        if *count >= succeed_after {
            Ok(ModuleOutput::changed(format!("succeeded on attempt {}", count))
                .with_command_output(None, None, Some(0)))
        } else {
            Ok(ModuleOutput::failed(format!("attempt {} failed", count))
                .with_command_output(None, None, Some(1)))
        }
    }
}

/// Sleeps for `millis` (default 100), then reports a change.
pub struct SlowModule;

#[async_trait]
impl Module for SlowModule {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn description(&self) -> &'static str {
        "Sleep, then report a change"
    }

    async fn apply(
        &self,
        params: &ModuleParams,
        _ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let millis = params.get_i64("millis")?.unwrap_or(100) as u64;
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        Ok(ModuleOutput::changed(format!("slept {}ms", millis)))
    }
}

/// A transport that can never be established.
pub struct UnreachableConnection {
    pub host: String,
}

#[async_trait]
impl Connection for UnreachableConnection {
    fn identifier(&self) -> String {
        format!("unreachable:{}", self.host)
    }

    async fn execute(
        &self,
        _command: &str,
        _options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult> {
        Err(ConnectionError::Unreachable {
            host: self.host.clone(),
            message: "no route to host".to_string(),
        })
    }
}

/// Builtin registry plus all test modules sharing the given log.
pub fn test_registry(log: &Log) -> ModuleRegistry {
    let mut registry = ModuleRegistry::with_builtins();
    registry.register(Arc::new(ProbeModule { log: log.clone() }));
    registry.register(Arc::new(StateModule::default()));
    registry.register(Arc::new(FlakyModule::default()));
    registry.register(Arc::new(SlowModule));
    registry
}

/// An inventory with the given hosts in one `test` group.
pub fn test_inventory(hosts: &[&str]) -> Inventory {
    let mut inventory = Inventory::new();
    for name in hosts {
        inventory.add_host(Host::new(*name)).unwrap();
    }
    inventory
        .add_group(
            GroupBuilder::new("test")
                .hosts(hosts.iter().map(|s| s.to_string()))
                .build(),
        )
        .unwrap();
    inventory
}

/// Runtime over a fresh test inventory.
pub fn test_runtime(hosts: &[&str]) -> Arc<RuntimeContext> {
    Arc::new(RuntimeContext::new(Arc::new(test_inventory(hosts))))
}

/// Executor wired to a registry that logs into the returned log.
pub fn test_executor(config: ExecutorConfig) -> (Executor, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let executor = Executor::new(config).with_registry(test_registry(&log));
    (executor, log)
}
