//! Shared run state and per-host variable assembly.
//!
//! A [`RuntimeContext`] holds everything a run reads: the inventory, the
//! caller-supplied variable layers, per-host facts and registered results,
//! connections, and the optional injected fact cache. Inventory and layer
//! inputs are read-mostly and built before the run starts; per-host facts
//! and registered results are owned by that host's execution task (the maps
//! are keyed by host, so writes never contend across hosts).

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::connection::{Connection, LocalConnection};
use crate::error::Result;
use crate::facts::{FactCache, Facts};
use crate::inventory::{Inventory, Transport};
use crate::vars::{HashBehaviour, Precedence, VarStore, Vars};
use crate::vault;

/// Per-host execution context threaded through task runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Target host name
    pub host: String,
    /// Dry run: apply steps report would-be results without mutating
    pub check_mode: bool,
    /// Collect before/after diffs
    pub diff_mode: bool,
}

/// Shared state for one run.
pub struct RuntimeContext {
    inventory: Arc<Inventory>,
    hash_behaviour: HashBehaviour,
    vault_password: Option<String>,
    fact_cache: Option<Arc<FactCache>>,

    /// Per-host connections; hosts with a local transport fall back to
    /// [`LocalConnection`]
    connections: DashMap<String, Arc<dyn Connection>>,

    // Caller-supplied layer inputs, lowest tiers first.
    role_defaults: Vars,
    inventory_group_vars_all: Vars,
    inventory_group_vars: IndexMap<String, Vars>,
    inventory_host_vars: IndexMap<String, Vars>,
    playbook_group_vars_all: Vars,
    playbook_group_vars: IndexMap<String, Vars>,
    playbook_host_vars: IndexMap<String, Vars>,
    role_vars: Vars,
    included_vars: Vars,
    role_params: Vars,
    include_params: Vars,
    extra_vars: Vars,

    // Play-scoped inputs, set by the executor when a play starts.
    play_vars: RwLock<Vars>,
    play_vars_files: RwLock<Vec<Vars>>,

    // Per-host run state.
    facts: DashMap<String, Facts>,
    set_facts: DashMap<String, Vars>,
}

impl RuntimeContext {
    /// Create a runtime for the given inventory.
    pub fn new(inventory: Arc<Inventory>) -> Self {
        Self {
            inventory,
            hash_behaviour: HashBehaviour::default(),
            vault_password: None,
            fact_cache: None,
            connections: DashMap::new(),
            role_defaults: Vars::new(),
            inventory_group_vars_all: Vars::new(),
            inventory_group_vars: IndexMap::new(),
            inventory_host_vars: IndexMap::new(),
            playbook_group_vars_all: Vars::new(),
            playbook_group_vars: IndexMap::new(),
            playbook_host_vars: IndexMap::new(),
            role_vars: Vars::new(),
            included_vars: Vars::new(),
            role_params: Vars::new(),
            include_params: Vars::new(),
            extra_vars: Vars::new(),
            play_vars: RwLock::new(Vars::new()),
            play_vars_files: RwLock::new(Vec::new()),
            facts: DashMap::new(),
            set_facts: DashMap::new(),
        }
    }

    /// The inventory this run targets.
    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// Set the mapping merge behaviour.
    pub fn with_hash_behaviour(mut self, behaviour: HashBehaviour) -> Self {
        self.hash_behaviour = behaviour;
        self
    }

    /// Set the vault passphrase used to decrypt tagged values at resolution
    /// time.
    pub fn with_vault_password(mut self, password: impl Into<String>) -> Self {
        self.vault_password = Some(password.into());
        self
    }

    /// Inject a caller-owned fact cache.
    pub fn with_fact_cache(mut self, cache: Arc<FactCache>) -> Self {
        self.fact_cache = Some(cache);
        self
    }

    /// Set role defaults (lowest layer).
    pub fn with_role_defaults(mut self, vars: Vars) -> Self {
        self.role_defaults = vars;
        self
    }

    /// Set inventory-adjacent group_vars for a group (`all` goes to its own
    /// tier).
    pub fn with_inventory_group_vars(mut self, group: impl Into<String>, vars: Vars) -> Self {
        let group = group.into();
        if group == "all" {
            self.inventory_group_vars_all = vars;
        } else {
            self.inventory_group_vars.insert(group, vars);
        }
        self
    }

    /// Set inventory-adjacent host_vars for a host.
    pub fn with_inventory_host_vars(mut self, host: impl Into<String>, vars: Vars) -> Self {
        self.inventory_host_vars.insert(host.into(), vars);
        self
    }

    /// Set playbook-adjacent group_vars for a group (`all` goes to its own
    /// tier).
    pub fn with_playbook_group_vars(mut self, group: impl Into<String>, vars: Vars) -> Self {
        let group = group.into();
        if group == "all" {
            self.playbook_group_vars_all = vars;
        } else {
            self.playbook_group_vars.insert(group, vars);
        }
        self
    }

    /// Set playbook-adjacent host_vars for a host.
    pub fn with_playbook_host_vars(mut self, host: impl Into<String>, vars: Vars) -> Self {
        self.playbook_host_vars.insert(host.into(), vars);
        self
    }

    /// Set role vars.
    pub fn with_role_vars(mut self, vars: Vars) -> Self {
        self.role_vars = vars;
        self
    }

    /// Set included vars.
    pub fn with_included_vars(mut self, vars: Vars) -> Self {
        self.included_vars = vars;
        self
    }

    /// Set role params.
    pub fn with_role_params(mut self, vars: Vars) -> Self {
        self.role_params = vars;
        self
    }

    /// Set include params.
    pub fn with_include_params(mut self, vars: Vars) -> Self {
        self.include_params = vars;
        self
    }

    /// Set command-line extra vars (highest layer).
    pub fn with_extra_vars(mut self, vars: Vars) -> Self {
        self.extra_vars = vars;
        self
    }

    /// Install play-scoped variables; called by the executor when a play
    /// starts.
    pub fn set_play_vars(&self, vars: Vars, vars_files: Vec<Vars>) {
        *self.play_vars.write() = vars;
        *self.play_vars_files.write() = vars_files;
    }

    /// Register a connection for a host.
    pub fn set_connection(&self, host: impl Into<String>, connection: Arc<dyn Connection>) {
        self.connections.insert(host.into(), connection);
    }

    /// The connection used to reach a host, if one is available.
    pub fn connection_for(&self, host: &str) -> Option<Arc<dyn Connection>> {
        if let Some(conn) = self.connections.get(host) {
            return Some(conn.value().clone());
        }

        let local = match self.inventory.get_host(host) {
            Some(h) => h.connection.transport == Transport::Local,
            None => false,
        };
        if local || host == "localhost" || host == "127.0.0.1" {
            return Some(Arc::new(LocalConnection::new()));
        }
        None
    }

    /// Seed gathered facts for a host.
    pub fn insert_facts(&self, host: impl Into<String>, facts: Facts) {
        self.facts.insert(host.into(), facts);
    }

    /// Make facts available for a host: cache hit first, then local
    /// gathering for control-node hosts. Gathered facts are written back to
    /// the injected cache.
    pub fn ensure_facts(&self, host: &str) {
        if self.facts.contains_key(host) {
            return;
        }

        if let Some(cache) = &self.fact_cache {
            if let Some(cached) = cache.get(host) {
                self.facts.insert(host.to_string(), cached);
                return;
            }
        }

        let is_local = self
            .inventory
            .get_host(host)
            .map(|h| h.connection.transport == Transport::Local)
            .unwrap_or(false);

        let gathered = if is_local || host == "localhost" {
            Facts::gather_local()
        } else {
            Facts::new()
        };

        if let Some(cache) = &self.fact_cache {
            cache.insert(host, gathered.clone());
        }
        self.facts.insert(host.to_string(), gathered);
    }

    /// Set a fact on a host at the registered/set-facts layer.
    pub fn set_fact(&self, host: &str, key: impl Into<String>, value: JsonValue) {
        self.set_facts
            .entry(host.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    /// Persist a fact into the injected cache, if one exists.
    pub fn cache_fact(&self, host: &str, key: &str, value: &JsonValue) {
        if let Some(cache) = &self.fact_cache {
            let mut facts = cache.get(host).unwrap_or_default();
            facts.set(key.to_string(), value.clone());
            cache.insert(host, facts);
        }
    }

    /// Register a task result under a name for a host.
    pub fn register(&self, host: &str, name: impl Into<String>, value: JsonValue) {
        self.set_facts
            .entry(host.to_string())
            .or_default()
            .insert(name.into(), value);
    }

    /// A registered value or set fact, if present.
    pub fn get_registered(&self, host: &str, name: &str) -> Option<JsonValue> {
        self.set_facts
            .get(host)
            .and_then(|vars| vars.get(name).cloned())
    }

    /// Build the effective variable mapping for a host.
    ///
    /// All nineteen layers fold in ascending precedence order. Within the
    /// inventory and playbook group tiers, groups apply in inventory
    /// declaration order, so for a host in two groups at the same tier the
    /// group declared last wins.
    ///
    /// Vault-tagged values are decrypted here, at resolution time, when a
    /// passphrase is configured. Template expressions embedded in values are
    /// left untouched; they evaluate at consumption time.
    pub fn effective_vars(&self, host: &str, block_vars: &Vars, task_vars: &Vars) -> Result<Vars> {
        let mut store = VarStore::with_hash_behaviour(self.hash_behaviour);

        store.set_many(self.role_defaults.clone(), Precedence::RoleDefaults);

        // Inline inventory vars: the all group first, then the host's groups
        // in declaration order.
        if let Some(all) = self.inventory.get_group("all") {
            store.set_many_with_source(&all.vars, Precedence::InventoryFileVars, "all");
        }
        let host_groups = self.inventory.groups_for_host(host);
        for group in &host_groups {
            store.set_many_with_source(&group.vars, Precedence::InventoryFileVars, &group.name);
        }

        store.set_many(
            self.inventory_group_vars_all.clone(),
            Precedence::InventoryGroupVarsAll,
        );
        for group in &host_groups {
            if let Some(vars) = self.inventory_group_vars.get(&group.name) {
                store.set_many_with_source(vars, Precedence::InventoryGroupVars, &group.name);
            }
        }

        if let Some(h) = self.inventory.get_host(host) {
            store.set_many_with_source(&h.vars, Precedence::InventoryHostVars, host);
        }
        if let Some(vars) = self.inventory_host_vars.get(host) {
            store.set_many_with_source(vars, Precedence::InventoryHostVars, host);
        }

        store.set_many(
            self.playbook_group_vars_all.clone(),
            Precedence::PlaybookGroupVarsAll,
        );
        for group in &host_groups {
            if let Some(vars) = self.playbook_group_vars.get(&group.name) {
                store.set_many_with_source(vars, Precedence::PlaybookGroupVars, &group.name);
            }
        }
        if let Some(vars) = self.playbook_host_vars.get(host) {
            store.set_many_with_source(vars, Precedence::PlaybookHostVars, host);
        }

        if let Some(facts) = self.facts.get(host) {
            for (key, value) in facts.all() {
                store.set(key.clone(), value.clone(), Precedence::Facts);
            }
        }

        store.set_many(self.play_vars.read().clone(), Precedence::PlayVars);
        for file_vars in self.play_vars_files.read().iter() {
            store.set_many(file_vars.clone(), Precedence::PlayVarsFiles);
        }

        store.set_many(self.role_vars.clone(), Precedence::RoleVars);
        store.set_many(block_vars.clone(), Precedence::BlockVars);
        store.set_many(task_vars.clone(), Precedence::TaskVars);
        store.set_many(self.included_vars.clone(), Precedence::IncludedVars);

        if let Some(set_facts) = self.set_facts.get(host) {
            store.set_many(set_facts.clone(), Precedence::SetFacts);
        }

        store.set_many(self.role_params.clone(), Precedence::RoleParams);
        store.set_many(self.include_params.clone(), Precedence::IncludeParams);
        store.set_many(self.extra_vars.clone(), Precedence::ExtraVars);

        let mut merged = store.merged_owned();

        if let Some(password) = &self.vault_password {
            for value in merged.values_mut() {
                *value = vault::decrypt_tagged(value, password)?;
            }
        }

        // Built-in connection variables; not overridable from layers.
        merged.insert(
            "inventory_hostname".to_string(),
            JsonValue::String(host.to_string()),
        );
        let group_names: Vec<JsonValue> = host_groups
            .iter()
            .filter(|g| g.name != "ungrouped")
            .map(|g| JsonValue::String(g.name.clone()))
            .collect();
        merged.insert("group_names".to_string(), JsonValue::Array(group_names));

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{GroupBuilder, Host};
    use serde_json::json;

    fn vars(pairs: &[(&str, JsonValue)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn runtime_with_host() -> RuntimeContext {
        let mut inv = Inventory::new();
        inv.add_host(Host::new("h1")).unwrap();
        RuntimeContext::new(Arc::new(inv))
    }

    #[test]
    fn test_extra_vars_beat_everything() {
        let runtime = runtime_with_host()
            .with_role_defaults(vars(&[("v", json!("defaults"))]))
            .with_extra_vars(vars(&[("v", json!("extra"))]));
        runtime.set_play_vars(vars(&[("v", json!("play"))]), vec![]);

        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("v"), Some(&json!("extra")));
    }

    #[test]
    fn test_task_vars_beat_block_vars() {
        let runtime = runtime_with_host();
        let effective = runtime
            .effective_vars(
                "h1",
                &vars(&[("v", json!("block"))]),
                &vars(&[("v", json!("task"))]),
            )
            .unwrap();
        assert_eq!(effective.get("v"), Some(&json!("task")));
    }

    #[test]
    fn test_set_fact_beats_facts() {
        let runtime = runtime_with_host();
        let mut facts = Facts::new();
        facts.set("v", json!("gathered"));
        runtime.insert_facts("h1", facts);
        runtime.set_fact("h1", "v", json!("set"));

        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("v"), Some(&json!("set")));
    }

    #[test]
    fn test_equal_tier_last_declared_group_wins() {
        let mut inv = Inventory::new();
        inv.add_group(
            GroupBuilder::new("web")
                .hosts(["h1"])
                .var("v", json!("web"))
                .build(),
        )
        .unwrap();
        inv.add_group(
            GroupBuilder::new("prod")
                .hosts(["h1"])
                .var("v", json!("prod"))
                .build(),
        )
        .unwrap();

        let runtime = RuntimeContext::new(Arc::new(inv));
        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("v"), Some(&json!("prod")));
    }

    #[test]
    fn test_builtin_vars_present() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("web").hosts(["h1"]).build())
            .unwrap();

        let runtime = RuntimeContext::new(Arc::new(inv));
        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("inventory_hostname"), Some(&json!("h1")));
        assert_eq!(effective.get("group_names"), Some(&json!(["web"])));
    }

    #[test]
    fn test_vault_decryption_at_resolution() {
        use crate::vault::Vault;

        let mut inv = Inventory::new();
        let mut host = Host::new("h1");
        host.set_var(
            "db_password",
            Vault::encrypt_inline("hunter2", "pw").unwrap(),
        );
        inv.add_host(host).unwrap();

        let runtime = RuntimeContext::new(Arc::new(inv)).with_vault_password("pw");
        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("db_password"), Some(&json!("hunter2")));
    }

    #[test]
    fn test_fact_cache_hit_skips_gathering() {
        let cache = Arc::new(FactCache::new(std::time::Duration::from_secs(60)));
        let mut cached = Facts::new();
        cached.set("cached_marker", json!(true));
        cache.insert("h1", cached);

        let runtime = runtime_with_host().with_fact_cache(cache);
        runtime.ensure_facts("h1");

        let effective = runtime
            .effective_vars("h1", &Vars::new(), &Vars::new())
            .unwrap();
        assert_eq!(effective.get("cached_marker"), Some(&json!(true)));
    }
}
