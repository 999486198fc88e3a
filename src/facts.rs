//! Host facts and the caller-owned fact cache.
//!
//! Facts are runtime-gathered properties of a host, folded into variable
//! resolution at the facts layer. Per-host facts are owned exclusively by
//! that host's execution task during a run and discarded at process exit,
//! unless the caller injects a [`FactCache`] to carry them across runs.

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};

/// Facts gathered from a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, JsonValue>,
}

impl Facts {
    /// Create empty facts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
    }

    /// Get a fact.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// All facts.
    pub fn all(&self) -> &IndexMap<String, JsonValue> {
        &self.data
    }

    /// Merge facts from another source (other takes precedence).
    pub fn merge(&mut self, other: &Facts) {
        for (key, value) in &other.data {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether there are no facts.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Gather facts about the control node itself.
    pub fn gather_local() -> Self {
        let mut facts = Self::new();

        facts.set("os_family", serde_json::json!(std::env::consts::OS));
        facts.set("os_arch", serde_json::json!(std::env::consts::ARCH));

        if let Ok(user) = std::env::var("USER") {
            facts.set("user", serde_json::json!(user));
        }

        facts
    }
}

impl FromIterator<(String, JsonValue)> for Facts {
    fn from_iter<T: IntoIterator<Item = (String, JsonValue)>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

struct CacheEntry {
    facts: Facts,
    stored_at: Instant,
}

/// A caller-owned fact store with a declared time-to-live.
///
/// The cache is injected into the engine rather than accessed as ambient
/// state: the engine consults it before gathering and writes gathered facts
/// back, but the caller decides whether a cache exists at all and how long
/// entries live.
pub struct FactCache {
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl FactCache {
    /// Create a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch cached facts for a host; expired entries are evicted and
    /// reported as absent.
    pub fn get(&self, host: &str) -> Option<Facts> {
        let expired = match self.entries.get(host) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(entry.facts.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(host);
        }
        None
    }

    /// Store facts for a host, replacing any previous entry.
    pub fn insert(&self, host: impl Into<String>, facts: Facts) {
        self.entries.insert(
            host.into(),
            CacheEntry {
                facts,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for a host.
    pub fn invalidate(&self, host: &str) {
        self.entries.remove(host);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries (expired entries may still be counted until
    /// their next access).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_facts_basic() {
        let mut facts = Facts::new();
        facts.set("os_family", json!("linux"));
        assert_eq!(facts.get("os_family"), Some(&json!("linux")));
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn test_facts_merge() {
        let mut base = Facts::new();
        base.set("a", json!(1));
        base.set("b", json!(2));

        let mut overlay = Facts::new();
        overlay.set("b", json!(3));

        base.merge(&overlay);
        assert_eq!(base.get("a"), Some(&json!(1)));
        assert_eq!(base.get("b"), Some(&json!(3)));
    }

    #[test]
    fn test_cache_hit() {
        let cache = FactCache::new(Duration::from_secs(60));
        let mut facts = Facts::new();
        facts.set("os_family", json!("linux"));

        cache.insert("web1", facts);
        let cached = cache.get("web1").unwrap();
        assert_eq!(cached.get("os_family"), Some(&json!("linux")));
    }

    #[test]
    fn test_cache_expiry() {
        let cache = FactCache::new(Duration::from_millis(0));
        cache.insert("web1", Facts::new());

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("web1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_invalidate() {
        let cache = FactCache::new(Duration::from_secs(60));
        cache.insert("web1", Facts::new());
        cache.invalidate("web1");
        assert!(cache.get("web1").is_none());
    }
}
