//! Inventory management for Converge.
//!
//! The inventory is the declared set of hosts and their group memberships,
//! built once before a run and treated as read-mostly shared state. This
//! module provides:
//!
//! - Programmatic construction of hosts and groups (loading from files is
//!   the job of an external loader)
//! - A group DAG with multiple parents and cycle rejection
//! - Host pattern resolution with union/intersection/exclusion operators
//!
//! Hosts and groups are kept in insertion order; every pattern resolution
//! returns hosts in that order, which makes runs reproducible.

pub mod group;
pub mod host;
pub mod pattern;

pub use group::{Group, GroupBuilder};
pub use host::{ConnectionParams, Host, Transport};
pub use pattern::PatternResolver;

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value as JsonValue;
use std::collections::HashSet;

use crate::error::{Error, Result};

/// The main inventory structure holding all hosts and groups.
#[derive(Debug, Clone)]
pub struct Inventory {
    /// All hosts, in declaration order
    hosts: IndexMap<String, Host>,

    /// All groups, in declaration order
    groups: IndexMap<String, Group>,

    /// Whether unmatched pattern atoms are errors
    strict: bool,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with the implicit `all` and `ungrouped`
    /// groups.
    pub fn new() -> Self {
        let mut inventory = Self {
            hosts: IndexMap::new(),
            groups: IndexMap::new(),
            strict: false,
        };

        inventory.groups.insert("all".to_string(), Group::all());
        inventory
            .groups
            .insert("ungrouped".to_string(), Group::ungrouped());

        inventory
    }

    /// Enable strict mode: resolving a pattern atom that matches nothing
    /// yields [`Error::UnknownGroup`] instead of an empty set.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Whether strict pattern resolution is enabled.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Add a host to the inventory.
    ///
    /// The host is registered with the `all` group and with every group
    /// already named in its membership set; groups that do not exist yet are
    /// created. A host with no explicit groups lands in `ungrouped`.
    pub fn add_host(&mut self, mut host: Host) -> Result<()> {
        let name = host.name.clone();
        host.add_to_group("all");

        if let Some(all_group) = self.groups.get_mut("all") {
            all_group.add_host(name.clone());
        }

        let declared: Vec<String> = host
            .groups
            .iter()
            .filter(|g| g.as_str() != "all" && g.as_str() != "ungrouped")
            .cloned()
            .collect();

        if declared.is_empty() {
            host.add_to_group("ungrouped");
            if let Some(ungrouped) = self.groups.get_mut("ungrouped") {
                ungrouped.add_host(name.clone());
            }
        } else {
            for group_name in declared {
                self.groups
                    .entry(group_name.clone())
                    .or_insert_with(|| Group::new(&group_name))
                    .add_host(name.clone());
            }
        }

        self.hosts.insert(name, host);
        Ok(())
    }

    /// Add a group to the inventory.
    ///
    /// Hosts named by the group that are not in the inventory yet are
    /// created. Parent links are recomputed and the group DAG is validated;
    /// a cycle yields [`Error::CircularDependency`].
    pub fn add_group(&mut self, group: Group) -> Result<()> {
        let name = group.name.clone();
        let member_hosts: Vec<String> = group.hosts.iter().cloned().collect();
        let children: Vec<String> = group.children.iter().cloned().collect();

        self.groups.insert(name.clone(), group);

        for child in children {
            self.groups
                .entry(child.clone())
                .or_insert_with(|| Group::new(&child));
        }

        for host_name in member_hosts {
            match self.hosts.get_mut(&host_name) {
                Some(host) => host.add_to_group(name.clone()),
                None => {
                    let mut host = Host::new(&host_name);
                    host.add_to_group(name.clone());
                    self.add_host(host)?;
                }
            }
        }

        self.compute_group_parents();
        self.validate_topology()?;
        Ok(())
    }

    /// Recompute parent links from children relationships.
    fn compute_group_parents(&mut self) {
        let children_map: Vec<(String, Vec<String>)> = self
            .groups
            .iter()
            .map(|(name, group)| (name.clone(), group.children.iter().cloned().collect()))
            .collect();

        for (parent_name, children) in children_map {
            for child_name in children {
                if let Some(child) = self.groups.get_mut(&child_name) {
                    child.add_parent(parent_name.clone());
                }
            }
        }
    }

    /// Reject cycles in the group topology.
    fn validate_topology(&self) -> Result<()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for group in self.groups.values() {
            graph.add_node(group.name.as_str());
            for child in &group.children {
                graph.add_edge(group.name.as_str(), child.as_str(), ());
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| Error::CircularDependency(cycle.node_id().to_string()))
    }

    /// Get a host by name.
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a mutable reference to a host by name.
    pub fn get_host_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.get_mut(name)
    }

    /// Get a group by name.
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get a mutable reference to a group by name.
    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// All hosts in declaration order.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All groups in declaration order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// All host names in declaration order.
    pub fn host_names(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    /// All group names in declaration order.
    pub fn group_names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    /// Declaration position of a host; unknown hosts sort last.
    pub(crate) fn host_position(&self, name: &str) -> usize {
        self.hosts.get_index_of(name).unwrap_or(usize::MAX)
    }

    /// All hosts in a group, including hosts of child groups, transitively.
    pub fn hosts_in_group_recursive(&self, group: &Group) -> HashSet<String> {
        let mut hosts: HashSet<String> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&Group> = vec![group];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.name.as_str()) {
                continue;
            }
            hosts.extend(current.hosts.iter().cloned());
            for child_name in &current.children {
                if let Some(child) = self.groups.get(child_name) {
                    stack.push(child);
                }
            }
        }

        hosts
    }

    /// Groups whose recursive membership contains the host, in declaration
    /// order, excluding the implicit `all` group.
    ///
    /// Declaration order is the tie-break rule for equal-tier group
    /// variables: when two groups at the same precedence tier define the same
    /// variable, the group declared last wins.
    pub fn groups_for_host(&self, host_name: &str) -> Vec<&Group> {
        self.groups
            .values()
            .filter(|g| g.name != "all")
            .filter(|g| {
                g.has_host(host_name) || self.hosts_in_group_recursive(g).contains(host_name)
            })
            .collect()
    }

    /// Resolve a pattern to an ordered, deduplicated host name list.
    pub fn resolve_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        PatternResolver::new(self).strict(self.strict).resolve(pattern)
    }

    /// Group variables applying to the `all` tier.
    pub fn all_group_vars(&self) -> IndexMap<String, JsonValue> {
        self.groups
            .get("all")
            .map(|g| g.vars.clone())
            .unwrap_or_default()
    }

    /// Count total hosts.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Count total groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl std::fmt::Display for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Inventory ({} hosts, {} groups)",
            self.hosts.len(),
            self.groups.len()
        )?;

        for group in self.groups.values() {
            if group.is_empty() {
                continue;
            }
            writeln!(f, "  [{}]", group.name)?;
            for host_name in &group.hosts {
                if let Some(host) = self.hosts.get(host_name) {
                    writeln!(f, "    {}", host)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inventory() {
        let inv = Inventory::new();
        assert_eq!(inv.host_count(), 0);
        assert!(inv.get_group("all").is_some());
        assert!(inv.get_group("ungrouped").is_some());
    }

    #[test]
    fn test_add_host_lands_in_all_and_ungrouped() {
        let mut inv = Inventory::new();
        inv.add_host(Host::new("webserver1")).unwrap();

        assert_eq!(inv.host_count(), 1);
        assert!(inv.get_group("all").unwrap().has_host("webserver1"));
        assert!(inv.get_group("ungrouped").unwrap().has_host("webserver1"));
    }

    #[test]
    fn test_add_group_creates_missing_hosts() {
        let mut inv = Inventory::new();
        let group = GroupBuilder::new("web").hosts(["web1", "web2"]).build();
        inv.add_group(group).unwrap();

        assert_eq!(inv.host_count(), 2);
        assert!(inv.get_host("web1").unwrap().in_group("web"));
        assert!(!inv.get_group("ungrouped").unwrap().has_host("web1"));
    }

    #[test]
    fn test_child_group_membership_is_transitive() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("web").hosts(["web1"]).build())
            .unwrap();
        inv.add_group(GroupBuilder::new("prod").child("web").build())
            .unwrap();

        let prod = inv.get_group("prod").unwrap();
        assert!(inv.hosts_in_group_recursive(prod).contains("web1"));
        assert!(inv.get_group("web").unwrap().has_parent("prod"));
    }

    #[test]
    fn test_group_cycle_rejected() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("a").child("b").build())
            .unwrap();
        let err = inv
            .add_group(GroupBuilder::new("b").child("a").build())
            .unwrap_err();
        assert!(matches!(err, Error::CircularDependency(_)));
    }

    #[test]
    fn test_diamond_topology_allowed() {
        // A group may have multiple parents; only cycles are rejected.
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("shared").hosts(["s1"]).build())
            .unwrap();
        inv.add_group(GroupBuilder::new("east").child("shared").build())
            .unwrap();
        inv.add_group(GroupBuilder::new("west").child("shared").build())
            .unwrap();

        let shared = inv.get_group("shared").unwrap();
        assert!(shared.has_parent("east"));
        assert!(shared.has_parent("west"));
    }

    #[test]
    fn test_groups_for_host_declaration_order() {
        let mut inv = Inventory::new();
        inv.add_group(GroupBuilder::new("web").hosts(["h1"]).build())
            .unwrap();
        inv.add_group(GroupBuilder::new("prod").hosts(["h1"]).build())
            .unwrap();

        let names: Vec<&str> = inv
            .groups_for_host("h1")
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(names, vec!["web", "prod"]);
    }
}
