//! Host pattern parsing and evaluation.
//!
//! Patterns are boolean expressions over host and group names, evaluated
//! left-to-right as a sequence of set operations:
//!
//! - `web:db` - union
//! - `web:&prod` - intersection
//! - `web:!staging` - exclusion
//!
//! Atoms are exact names, globs (`web*`), or regexes (`~web\d+`). The
//! resolved host list is ordered by inventory insertion order, so resolving
//! the same pattern against an unchanged inventory is deterministic.

use globset::Glob;
use regex::Regex;
use std::collections::HashSet;

use super::Inventory;
use crate::error::{Error, Result};

/// A single step in a pattern expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    /// Add the atom's hosts to the result
    Union,
    /// Keep only hosts also matched by the atom
    Intersect,
    /// Remove the atom's hosts from the result
    Exclude,
}

/// Resolves patterns against a loaded inventory index.
///
/// Resolution is a pure function over the index; the resolver holds no
/// mutable state.
pub struct PatternResolver<'a> {
    inventory: &'a Inventory,
    strict: bool,
}

impl<'a> PatternResolver<'a> {
    /// Create a resolver for the given inventory.
    pub fn new(inventory: &'a Inventory) -> Self {
        Self {
            inventory,
            strict: false,
        }
    }

    /// Enable strict mode: an atom matching nothing yields
    /// [`Error::UnknownGroup`] instead of an empty set.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve a pattern to an ordered, deduplicated list of host names.
    pub fn resolve(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let mut result: HashSet<String> = HashSet::new();

        for (op, atom) in split_pattern(pattern)? {
            let matched = self.expand_atom(atom)?;
            match op {
                SetOp::Union => result.extend(matched),
                SetOp::Intersect => result.retain(|h| matched.contains(h)),
                SetOp::Exclude => result.retain(|h| !matched.contains(h)),
            }
        }

        // Order by inventory insertion position, never by resolution order.
        let mut ordered: Vec<String> = result.into_iter().collect();
        ordered.sort_by_key(|name| self.inventory.host_position(name));
        Ok(ordered)
    }

    /// Expand a single atom to the set of host names it matches.
    fn expand_atom(&self, atom: &str) -> Result<HashSet<String>> {
        let atom = atom.trim();
        if atom.is_empty() {
            return Err(Error::InvalidPattern(atom.to_string()));
        }

        if atom == "all" || atom == "*" {
            return Ok(self.inventory.host_names().cloned().collect());
        }

        let matched = if let Some(regex_src) = atom.strip_prefix('~') {
            let regex = Regex::new(regex_src)
                .map_err(|_| Error::InvalidPattern(atom.to_string()))?;
            self.inventory
                .host_names()
                .filter(|name| regex.is_match(name))
                .cloned()
                .collect()
        } else if atom.contains('*') || atom.contains('?') || atom.contains('[') {
            self.expand_glob(atom)?
        } else if let Some(group) = self.inventory.get_group(atom) {
            self.inventory.hosts_in_group_recursive(group)
        } else if self.inventory.get_host(atom).is_some() {
            std::iter::once(atom.to_string()).collect()
        } else {
            HashSet::new()
        };

        if matched.is_empty() && self.strict {
            return Err(Error::UnknownGroup(atom.to_string()));
        }

        Ok(matched)
    }

    /// Glob atoms match against all host and group names; a matched group
    /// contributes its recursive host membership.
    fn expand_glob(&self, atom: &str) -> Result<HashSet<String>> {
        let matcher = Glob::new(atom)
            .map_err(|_| Error::InvalidPattern(atom.to_string()))?
            .compile_matcher();

        let mut matched: HashSet<String> = self
            .inventory
            .host_names()
            .filter(|name| matcher.is_match(name))
            .cloned()
            .collect();

        for group in self.inventory.groups() {
            if matcher.is_match(&group.name) {
                matched.extend(self.inventory.hosts_in_group_recursive(group));
            }
        }

        Ok(matched)
    }
}

/// Split a pattern into `(operation, atom)` steps, left-to-right.
///
/// `:` separates atoms; a `&` or `!` prefix on an atom selects intersection
/// or exclusion. Separators inside character classes (`[...]`) are literal.
fn split_pattern(pattern: &str) -> Result<Vec<(SetOp, &str)>> {
    let mut steps = Vec::new();
    let mut start = 0;
    let mut bracket_depth: usize = 0;

    let mut parts: Vec<&str> = Vec::new();
    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ':' if bracket_depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&pattern[start..]);

    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (op, atom) = if let Some(rest) = part.strip_prefix('&') {
            (SetOp::Intersect, rest)
        } else if let Some(rest) = part.strip_prefix('!') {
            (SetOp::Exclude, rest)
        } else {
            (SetOp::Union, part)
        };

        if atom.trim().is_empty() {
            return Err(Error::InvalidPattern(pattern.to_string()));
        }
        steps.push((op, atom));
    }

    if steps.is_empty() {
        return Err(Error::InvalidPattern(pattern.to_string()));
    }
    Ok(steps)
}
