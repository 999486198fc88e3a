//! Tag-based task filtering.
//!
//! Tasks carry a tag set; the engine options select or skip tasks by tag
//! before any evaluation happens. The special tags `always`, `never`,
//! `tagged`, `untagged`, and `all` have the usual meanings: `always` runs
//! regardless of selection unless explicitly skipped, `never` only runs when
//! explicitly selected.

/// Special tag constants.
pub mod special {
    /// Runs regardless of tag selection
    pub const ALWAYS: &str = "always";

    /// Never runs unless explicitly selected
    pub const NEVER: &str = "never";

    /// Matches any task that has at least one tag
    pub const TAGGED: &str = "tagged";

    /// Matches any task with no tags
    pub const UNTAGGED: &str = "untagged";

    /// Matches all tasks
    pub const ALL: &str = "all";
}

/// Check if a tag is a special tag.
pub fn is_special_tag(tag: &str) -> bool {
    matches!(
        tag.to_lowercase().as_str(),
        special::ALWAYS | special::NEVER | special::TAGGED | special::UNTAGGED | special::ALL
    )
}

/// Filters tasks by tag-set membership.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    /// Selected tags; empty means everything except `never`
    tags: Vec<String>,
    /// Skipped tags; checked before selection
    skip_tags: Vec<String>,
}

impl TagFilter {
    /// Create a filter that runs everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select tasks carrying any of these tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Skip tasks carrying any of these tags.
    pub fn with_skip_tags(mut self, skip_tags: Vec<String>) -> Self {
        self.skip_tags = skip_tags;
        self
    }

    /// Whether any selection or skip is configured.
    pub fn is_active(&self) -> bool {
        !self.tags.is_empty() || !self.skip_tags.is_empty()
    }

    /// Decide whether a task with the given tags runs.
    pub fn should_run(&self, task_tags: &[String]) -> bool {
        // Skips take precedence over any selection.
        if task_tags.iter().any(|t| self.skip_tags.contains(t)) {
            return false;
        }
        if self.skip_tags.iter().any(|t| t == special::TAGGED) && !task_tags.is_empty() {
            return false;
        }
        if self.skip_tags.iter().any(|t| t == special::UNTAGGED) && task_tags.is_empty() {
            return false;
        }

        let has_never = task_tags.iter().any(|t| t == special::NEVER);
        let has_always = task_tags.iter().any(|t| t == special::ALWAYS);

        if self.tags.is_empty() {
            return !has_never;
        }

        if has_always {
            return true;
        }

        for selector in &self.tags {
            let selected = match selector.as_str() {
                special::ALL => !has_never,
                special::TAGGED => !task_tags.is_empty() && !has_never,
                special::UNTAGGED => task_tags.is_empty(),
                name => task_tags.iter().any(|t| t == name),
            };
            if selected {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_filter_runs_everything_but_never() {
        let filter = TagFilter::new();
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(filter.should_run(&[]));
        assert!(!filter.should_run(&tags(&["never"])));
    }

    #[test]
    fn test_tag_selection() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));
        assert!(filter.should_run(&tags(&["deploy", "web"])));
        assert!(!filter.should_run(&tags(&["debug"])));
        assert!(!filter.should_run(&[]));
    }

    #[test]
    fn test_skip_tags_win() {
        let filter = TagFilter::new()
            .with_tags(tags(&["deploy"]))
            .with_skip_tags(tags(&["slow"]));
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(!filter.should_run(&tags(&["deploy", "slow"])));
    }

    #[test]
    fn test_always_runs_under_selection() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));
        assert!(filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_always_can_be_skipped() {
        let filter = TagFilter::new().with_skip_tags(tags(&["always"]));
        assert!(!filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_never_requires_explicit_selection() {
        let filter = TagFilter::new().with_tags(tags(&["never"]));
        assert!(filter.should_run(&tags(&["never"])));

        let filter = TagFilter::new().with_tags(tags(&["all"]));
        assert!(!filter.should_run(&tags(&["never"])));
    }

    #[test]
    fn test_tagged_untagged_selectors() {
        let filter = TagFilter::new().with_tags(tags(&["tagged"]));
        assert!(filter.should_run(&tags(&["anything"])));
        assert!(!filter.should_run(&[]));

        let filter = TagFilter::new().with_tags(tags(&["untagged"]));
        assert!(!filter.should_run(&tags(&["anything"])));
        assert!(filter.should_run(&[]));
    }

    #[test]
    fn test_is_special_tag() {
        assert!(is_special_tag("always"));
        assert!(is_special_tag("NEVER"));
        assert!(!is_special_tag("deploy"));
    }
}
