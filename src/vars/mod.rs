//! Variable system for Converge.
//!
//! Variables flow into a run from nineteen layered sources, from role
//! defaults at the bottom to command-line extra vars at the top. Resolution
//! for any host is a pure function of the host and the layers: folding the
//! layers in ascending precedence order yields one effective mapping, where
//! a key present in several layers takes the value from the highest one.
//!
//! Merging never evaluates template expressions; `{{ expr }}` references are
//! resolved lazily when a consuming operation reads the key (see
//! [`crate::template`]), so an undefined variable only surfaces at read time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A flat mapping of variable names to values.
pub type Vars = IndexMap<String, JsonValue>;

/// Variable precedence levels, lowest to highest.
///
/// A key present in two layers always resolves to the value from the higher
/// one; within a single layer, later insertions win (for inventory group
/// vars that means the group declared last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Precedence {
    /// Role defaults (lowest priority)
    RoleDefaults = 1,
    /// Vars defined inline in the inventory file
    InventoryFileVars = 2,
    /// Inventory group_vars/all
    InventoryGroupVarsAll = 3,
    /// Inventory group_vars/* (specific group)
    InventoryGroupVars = 4,
    /// Inventory host_vars/*
    InventoryHostVars = 5,
    /// Playbook group_vars/all
    PlaybookGroupVarsAll = 6,
    /// Playbook group_vars/* (specific group)
    PlaybookGroupVars = 7,
    /// Playbook host_vars/*
    PlaybookHostVars = 8,
    /// Gathered facts and cached facts
    Facts = 9,
    /// Play vars
    PlayVars = 10,
    /// Play vars_files
    PlayVarsFiles = 11,
    /// Role vars
    RoleVars = 12,
    /// Block vars
    BlockVars = 13,
    /// Task vars
    TaskVars = 14,
    /// Included vars
    IncludedVars = 15,
    /// Registered results and set facts
    SetFacts = 16,
    /// Role params
    RoleParams = 17,
    /// Include params
    IncludeParams = 18,
    /// Command-line extra vars (highest priority)
    ExtraVars = 19,
}

impl Precedence {
    /// All precedence levels in order (lowest to highest).
    pub fn all() -> impl Iterator<Item = Precedence> {
        [
            Precedence::RoleDefaults,
            Precedence::InventoryFileVars,
            Precedence::InventoryGroupVarsAll,
            Precedence::InventoryGroupVars,
            Precedence::InventoryHostVars,
            Precedence::PlaybookGroupVarsAll,
            Precedence::PlaybookGroupVars,
            Precedence::PlaybookHostVars,
            Precedence::Facts,
            Precedence::PlayVars,
            Precedence::PlayVarsFiles,
            Precedence::RoleVars,
            Precedence::BlockVars,
            Precedence::TaskVars,
            Precedence::IncludedVars,
            Precedence::SetFacts,
            Precedence::RoleParams,
            Precedence::IncludeParams,
            Precedence::ExtraVars,
        ]
        .into_iter()
    }

    /// Numeric level of this layer.
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for Precedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Precedence::RoleDefaults => "role defaults",
            Precedence::InventoryFileVars => "inventory file vars",
            Precedence::InventoryGroupVarsAll => "inventory group_vars/all",
            Precedence::InventoryGroupVars => "inventory group_vars/*",
            Precedence::InventoryHostVars => "inventory host_vars/*",
            Precedence::PlaybookGroupVarsAll => "playbook group_vars/all",
            Precedence::PlaybookGroupVars => "playbook group_vars/*",
            Precedence::PlaybookHostVars => "playbook host_vars/*",
            Precedence::Facts => "facts",
            Precedence::PlayVars => "play vars",
            Precedence::PlayVarsFiles => "play vars_files",
            Precedence::RoleVars => "role vars",
            Precedence::BlockVars => "block vars",
            Precedence::TaskVars => "task vars",
            Precedence::IncludedVars => "included vars",
            Precedence::SetFacts => "registered/set facts",
            Precedence::RoleParams => "role params",
            Precedence::IncludeParams => "include params",
            Precedence::ExtraVars => "extra vars",
        };
        write!(f, "{}", name)
    }
}

/// A variable with its source layer information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// The variable value
    pub value: JsonValue,

    /// Source precedence level
    pub precedence: Precedence,

    /// Source description (group name, file, etc.)
    pub source: Option<String>,
}

impl Variable {
    /// Create a new variable.
    pub fn new(value: JsonValue, precedence: Precedence) -> Self {
        Self {
            value,
            precedence,
            source: None,
        }
    }

    /// Create a variable with source information.
    pub fn with_source(
        value: JsonValue,
        precedence: Precedence,
        source: impl Into<String>,
    ) -> Self {
        Self {
            value,
            precedence,
            source: Some(source.into()),
        }
    }
}

/// Strategy for merging mapping-typed variables across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashBehaviour {
    /// The higher layer replaces the value entirely (default)
    #[default]
    Replace,
    /// Nested mappings merge key-wise; non-mapping values still fully
    /// override
    Merge,
}

/// The layered variable store.
///
/// Lower layers are shadowed by higher ones. The merged view is cached and
/// invalidated on every mutation.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    /// Variables organized by precedence level
    layers: HashMap<Precedence, IndexMap<String, Variable>>,

    /// Cached merged variables
    merged_cache: Option<Vars>,

    /// Mapping merge behaviour
    hash_behaviour: HashBehaviour,
}

impl VarStore {
    /// Create a new empty variable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a variable store with the given mapping merge behaviour.
    pub fn with_hash_behaviour(hash_behaviour: HashBehaviour) -> Self {
        Self {
            hash_behaviour,
            ..Default::default()
        }
    }

    /// Set a variable at a specific precedence level.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue, precedence: Precedence) {
        self.merged_cache = None;

        let layer = self.layers.entry(precedence).or_default();
        layer.insert(key.into(), Variable::new(value, precedence));
    }

    /// Set a variable with full metadata.
    pub fn set_variable(&mut self, key: impl Into<String>, variable: Variable) {
        self.merged_cache = None;

        let layer = self.layers.entry(variable.precedence).or_default();
        layer.insert(key.into(), variable);
    }

    /// Set multiple variables at a precedence level.
    pub fn set_many(&mut self, vars: Vars, precedence: Precedence) {
        self.merged_cache = None;

        let layer = self.layers.entry(precedence).or_default();
        for (key, value) in vars {
            layer.insert(key, Variable::new(value, precedence));
        }
    }

    /// Set multiple variables with a source description.
    pub fn set_many_with_source(
        &mut self,
        vars: &Vars,
        precedence: Precedence,
        source: impl Into<String>,
    ) {
        self.merged_cache = None;

        let source = source.into();
        let layer = self.layers.entry(precedence).or_default();
        for (key, value) in vars {
            layer.insert(
                key.clone(),
                Variable::with_source(value.clone(), precedence, &source),
            );
        }
    }

    /// Get a variable, considering precedence.
    pub fn get(&mut self, key: &str) -> Option<&JsonValue> {
        self.ensure_merged();
        self.merged_cache.as_ref().and_then(|cache| cache.get(key))
    }

    /// Get the raw `Variable` with layer metadata; the highest layer wins.
    pub fn get_variable(&self, key: &str) -> Option<&Variable> {
        for precedence in Precedence::all().collect::<Vec<_>>().into_iter().rev() {
            if let Some(layer) = self.layers.get(&precedence) {
                if let Some(var) = layer.get(key) {
                    return Some(var);
                }
            }
        }
        None
    }

    /// Check if a variable exists in any layer.
    pub fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a variable from a specific precedence level.
    pub fn remove(&mut self, key: &str, precedence: Precedence) -> Option<Variable> {
        self.merged_cache = None;

        self.layers
            .get_mut(&precedence)
            .and_then(|layer| layer.swap_remove(key))
    }

    /// Clear all variables at a specific precedence level.
    pub fn clear_precedence(&mut self, precedence: Precedence) {
        self.merged_cache = None;
        self.layers.remove(&precedence);
    }

    /// Clear all variables.
    pub fn clear(&mut self) {
        self.merged_cache = None;
        self.layers.clear();
    }

    /// The effective mapping: all layers folded in ascending precedence
    /// order.
    pub fn merged(&mut self) -> &Vars {
        self.ensure_merged();
        self.merged_cache.as_ref().unwrap()
    }

    /// Owned copy of the effective mapping.
    pub fn merged_owned(&mut self) -> Vars {
        self.merged().clone()
    }

    /// Number of distinct variable names across all layers.
    pub fn len(&mut self) -> usize {
        self.ensure_merged();
        self.merged_cache.as_ref().map_or(0, |c| c.len())
    }

    /// Check if the store is empty.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn ensure_merged(&mut self) {
        if self.merged_cache.is_some() {
            return;
        }

        let mut merged = IndexMap::new();

        for precedence in Precedence::all() {
            if let Some(layer) = self.layers.get(&precedence) {
                for (key, var) in layer {
                    merge_value(&mut merged, key, &var.value, self.hash_behaviour);
                }
            }
        }

        self.merged_cache = Some(merged);
    }
}

/// Merge a value into the effective mapping according to the hash behaviour.
fn merge_value(merged: &mut Vars, key: &str, value: &JsonValue, behaviour: HashBehaviour) {
    match behaviour {
        HashBehaviour::Replace => {
            merged.insert(key.to_string(), value.clone());
        }
        HashBehaviour::Merge => {
            if let Some(existing) = merged.get(key) {
                let new_value = deep_merge(existing, value);
                merged.insert(key.to_string(), new_value);
            } else {
                merged.insert(key.to_string(), value.clone());
            }
        }
    }
}

/// Deep merge two JSON values: mappings merge key-wise, everything else is
/// replaced by the overlay.
pub fn deep_merge(base: &JsonValue, overlay: &JsonValue) -> JsonValue {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                if let Some(base_value) = base_map.get(key) {
                    merged.insert(key.clone(), deep_merge(base_value, value));
                } else {
                    merged.insert(key.clone(), value.clone());
                }
            }
            JsonValue::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Value coercion helpers.
pub mod coerce {
    use super::JsonValue;

    /// Convert a value to a display string.
    pub fn to_string(value: &JsonValue) -> String {
        match value {
            JsonValue::Null => String::new(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::String(s) => s.clone(),
            _ => value.to_string(),
        }
    }

    /// Convert a value to a boolean, if it has a sensible interpretation.
    pub fn to_bool(value: &JsonValue) -> Option<bool> {
        match value {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" | "" => Some(false),
                _ => None,
            },
            JsonValue::Number(n) => n.as_i64().map(|i| i != 0),
            _ => None,
        }
    }

    /// Whether a value counts as truthy in a condition.
    pub fn is_truthy(value: &JsonValue) -> bool {
        match value {
            JsonValue::Null => false,
            JsonValue::Bool(b) => *b,
            JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            JsonValue::String(s) => !s.is_empty() && s.to_lowercase() != "false" && s != "0",
            JsonValue::Array(a) => !a.is_empty(),
            JsonValue::Object(o) => !o.is_empty(),
        }
    }
}
