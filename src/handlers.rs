//! Per-run handler notification state.
//!
//! Handlers are deferred, deduplicated side-effecting actions. Tasks notify
//! them by name (or by a listen topic); multiple notifications collapse to
//! one. At a flush point every triggered handler that has not yet executed
//! runs once, in the order handlers were declared, never in the order they
//! were triggered. Handlers do not run if the run aborted before reaching a
//! flush point.

use indexmap::IndexMap;
use tracing::debug;

use crate::playbook::Handler;

#[derive(Debug)]
struct HandlerEntry {
    handler: Handler,
    triggered: bool,
    executed: bool,
    /// Hosts that notified, in notification order
    notified_hosts: Vec<String>,
}

/// Tracks which handlers were notified during a run.
#[derive(Debug, Default)]
pub struct HandlerState {
    /// Entries in declaration order
    entries: IndexMap<String, HandlerEntry>,
}

impl HandlerState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Declaration order determines flush order.
    pub fn register(&mut self, handler: Handler) {
        self.entries.insert(
            handler.name.clone(),
            HandlerEntry {
                handler,
                triggered: false,
                executed: false,
                notified_hosts: Vec::new(),
            },
        );
    }

    /// Register several handlers in order.
    pub fn register_all(&mut self, handlers: &[Handler]) {
        for handler in handlers {
            self.register(handler.clone());
        }
    }

    /// Mark every handler responding to `name` as triggered by `host`.
    ///
    /// Notification is idempotent. Returns whether any handler matched.
    pub fn notify(&mut self, name: &str, host: &str) -> bool {
        let mut matched = false;

        for entry in self.entries.values_mut() {
            if entry.handler.trigger_names().contains(&name) {
                matched = true;
                entry.triggered = true;
                if !entry.notified_hosts.iter().any(|h| h == host) {
                    entry.notified_hosts.push(host.to_string());
                }
                debug!(handler = %entry.handler.name, host, "handler notified");
            }
        }

        matched
    }

    /// Triggered handlers not yet executed, with their notifying hosts, in
    /// declaration order.
    pub fn pending(&self) -> Vec<(Handler, Vec<String>)> {
        self.entries
            .values()
            .filter(|e| e.triggered && !e.executed)
            .map(|e| (e.handler.clone(), e.notified_hosts.clone()))
            .collect()
    }

    /// Whether any handler is waiting for a flush.
    pub fn has_pending(&self) -> bool {
        self.entries.values().any(|e| e.triggered && !e.executed)
    }

    /// Record that a handler ran; it will not run again this run.
    pub fn mark_executed(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.executed = true;
        }
    }

    /// Whether a handler with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restart(name: &str) -> Handler {
        Handler::new(name, "command").arg("cmd", format!("systemctl restart {}", name))
    }

    #[test]
    fn test_notify_is_idempotent() {
        let mut state = HandlerState::new();
        state.register(restart("nginx"));

        assert!(state.notify("nginx", "h1"));
        assert!(state.notify("nginx", "h1"));
        assert!(state.notify("nginx", "h2"));

        let pending = state.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1, vec!["h1", "h2"]);
    }

    #[test]
    fn test_flush_order_is_declaration_order() {
        let mut state = HandlerState::new();
        state.register(restart("first"));
        state.register(restart("second"));
        state.register(restart("third"));

        // Trigger in reverse order.
        state.notify("third", "h1");
        state.notify("first", "h1");

        let names: Vec<String> = state.pending().iter().map(|(h, _)| h.name.clone()).collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[test]
    fn test_executed_handlers_not_pending() {
        let mut state = HandlerState::new();
        state.register(restart("nginx"));
        state.notify("nginx", "h1");
        state.mark_executed("nginx");

        assert!(!state.has_pending());
        // A later notification does not resurrect it: at most once per run.
        state.notify("nginx", "h2");
        assert!(!state.has_pending());
    }

    #[test]
    fn test_listen_topics() {
        let mut state = HandlerState::new();
        state.register(
            Handler::new("restart web stack", "command")
                .arg("cmd", "restart-all")
                .listen("web config changed"),
        );

        assert!(state.notify("web config changed", "h1"));
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn test_unmatched_notification() {
        let mut state = HandlerState::new();
        state.register(restart("nginx"));
        assert!(!state.notify("no such handler", "h1"));
        assert!(!state.has_pending());
    }
}
