//! Execution strategies.

use serde::{Deserialize, Serialize};

/// How tasks are distributed across hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Advance operation-by-operation in lock-step: a barrier before each
    /// operation, all hosts finish it before any host starts the next
    #[default]
    Linear,
    /// Each host proceeds through the entire operation list independently,
    /// bounded only by worker-pool availability
    Free,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Free => write!(f, "free"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_linear() {
        assert_eq!(Strategy::default(), Strategy::Linear);
    }

    #[test]
    fn test_display() {
        assert_eq!(Strategy::Linear.to_string(), "linear");
        assert_eq!(Strategy::Free.to_string(), "free");
    }
}
