//! Host definition for the Converge inventory.
//!
//! This module provides the `Host` structure representing a managed node
//! with connection parameters, variables, facts, and group membership.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Transport used to reach a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Remote execution over SSH (default)
    #[default]
    Ssh,
    /// Direct execution on the control node
    Local,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Ssh => write!(f, "ssh"),
            Transport::Local => write!(f, "local"),
        }
    }
}

/// Connection parameters for a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Transport type
    #[serde(default)]
    pub transport: Transport,

    /// Remote port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u32 {
    10
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            port: default_port(),
            user: None,
            timeout: default_timeout(),
        }
    }
}

/// A managed host in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name (can be hostname, IP, or alias)
    pub name: String,

    /// Actual hostname or IP to connect to (if different from name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Connection parameters
    #[serde(flatten)]
    pub connection: ConnectionParams,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,

    /// Groups this host belongs to
    #[serde(skip)]
    pub groups: HashSet<String>,
}

impl Host {
    /// Create a new host with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            connection: ConnectionParams::default(),
            vars: IndexMap::new(),
            groups: HashSet::new(),
        }
    }

    /// Create a new host with an explicit address.
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.address = Some(address.into());
        host
    }

    /// Get the actual address to connect to.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// Set a variable on this host.
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host.
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Check if host has a specific variable.
    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Add this host to a group.
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Remove this host from a group.
    pub fn remove_from_group(&mut self, group: &str) {
        self.groups.remove(group);
    }

    /// Check if host belongs to a specific group.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Set the transport type.
    pub fn set_transport(&mut self, transport: Transport) {
        self.connection.transport = transport;
    }

    /// Merge variables from another source (other takes precedence).
    pub fn merge_vars(&mut self, other: &IndexMap<String, JsonValue>) {
        for (key, value) in other {
            self.vars.insert(key.clone(), value.clone());
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(addr) = &self.address {
            write!(f, " ({})", addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_new() {
        let host = Host::new("webserver1");
        assert_eq!(host.name, "webserver1");
        assert_eq!(host.address(), "webserver1");
    }

    #[test]
    fn test_host_with_address() {
        let host = Host::with_address("webserver1", "192.168.1.10");
        assert_eq!(host.name, "webserver1");
        assert_eq!(host.address(), "192.168.1.10");
    }

    #[test]
    fn test_host_groups() {
        let mut host = Host::new("test");
        host.add_to_group("webservers");
        host.add_to_group("production");
        assert!(host.in_group("webservers"));
        assert!(host.in_group("production"));
        assert!(!host.in_group("databases"));
        host.remove_from_group("webservers");
        assert!(!host.in_group("webservers"));
    }

    #[test]
    fn test_host_vars() {
        let mut host = Host::new("test");
        host.set_var("http_port", serde_json::json!(80));
        assert!(host.has_var("http_port"));
        assert_eq!(host.get_var("http_port"), Some(&serde_json::json!(80)));
    }
}
