//! Group definition for the Converge inventory.
//!
//! This module provides the `Group` structure representing a logical grouping
//! of hosts with shared variables and parent-child relationships. Groups form
//! a DAG: a group may have several parents, but never a cycle.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// A group of hosts in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Host names belonging to this group
    #[serde(default)]
    pub hosts: HashSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: HashSet<String>,

    /// Parent group names (computed from children relationships)
    #[serde(skip)]
    pub parents: HashSet<String>,

    /// Group-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
}

impl Group {
    /// Create a new group with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: HashSet::new(),
            children: HashSet::new(),
            parents: HashSet::new(),
            vars: IndexMap::new(),
        }
    }

    /// Create the special "all" group.
    pub fn all() -> Self {
        Self::new("all")
    }

    /// Create the special "ungrouped" group.
    pub fn ungrouped() -> Self {
        Self::new("ungrouped")
    }

    /// Add a host to this group.
    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    /// Remove a host from this group.
    pub fn remove_host(&mut self, host: &str) -> bool {
        self.hosts.remove(host)
    }

    /// Check if a host belongs to this group.
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Add a child group.
    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    /// Check if a group is a child of this group.
    pub fn has_child(&self, child: &str) -> bool {
        self.children.contains(child)
    }

    /// Add a parent group (internal use for reverse lookups).
    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    /// Check if a group is a parent of this group.
    pub fn has_parent(&self, parent: &str) -> bool {
        self.parents.contains(parent)
    }

    /// Set a variable on this group.
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this group.
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Check if group has a specific variable.
    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Check if this group is empty (no hosts and no children).
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.children.is_empty()
    }

    /// Get the number of direct host members.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Merge variables from another source (other takes precedence).
    pub fn merge_vars(&mut self, other: &IndexMap<String, JsonValue>) {
        for (key, value) in other {
            self.vars.insert(key.clone(), value.clone());
        }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Group {}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} hosts", self.name, self.hosts.len())?;
        if !self.children.is_empty() {
            write!(f, ", {} children", self.children.len())?;
        }
        write!(f, ")")
    }
}

/// Builder for creating groups with a fluent API.
#[derive(Debug, Default)]
pub struct GroupBuilder {
    name: String,
    hosts: HashSet<String>,
    children: HashSet<String>,
    vars: IndexMap<String, JsonValue>,
}

impl GroupBuilder {
    /// Create a new group builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a host to the group.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.insert(host.into());
        self
    }

    /// Add multiple hosts to the group.
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for host in hosts {
            self.hosts.insert(host.into());
        }
        self
    }

    /// Add a child group.
    pub fn child(mut self, child: impl Into<String>) -> Self {
        self.children.insert(child.into());
        self
    }

    /// Add a variable.
    pub fn var(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Build the group.
    pub fn build(self) -> Group {
        Group {
            name: self.name,
            hosts: self.hosts,
            children: self.children,
            parents: HashSet::new(),
            vars: self.vars,
        }
    }
}
