//! Caller-supplied rules for the custom merge strategy

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the custom strategy deduplicates permission grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Deduplication {
    /// Only textually identical grants are duplicates
    #[default]
    Strict,
    /// Grants matching the same supplied glob pattern are duplicates
    PatternMatch,
}

/// Per-key resolution rule for conflicting settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingRule {
    /// Keep the earliest source's value
    PreferFirst,
    /// Keep the latest source's value
    PreferLast,
    /// Collect all distinct values (arrays are concatenated)
    Union,
}

/// Permission handling for the custom strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRules {
    /// Deduplication mode
    pub deduplication: Deduplication,

    /// Glob patterns grouping equivalent grants (used by `pattern-match`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

/// Rule set supplied by the caller for [`MergeStrategy::Custom`]
///
/// Settings rules are looked up by the conflict's dotted path first
/// (`editor.tabs.width`), then by its final segment (`width`). Conflicts
/// without a matching rule keep the earliest source's value and carry a
/// suggestion for the reviewer.
///
/// [`MergeStrategy::Custom`]: crate::merge::MergeStrategy::Custom
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMergeRules {
    /// Permission deduplication rules
    #[serde(default)]
    pub permissions: PermissionRules,

    /// Per-setting-key resolution rules
    #[serde(default)]
    pub settings: BTreeMap<String, SettingRule>,
}

impl CustomMergeRules {
    /// Look up the rule for a settings path
    pub fn setting_rule(&self, path: &str) -> Option<SettingRule> {
        if let Some(rule) = self.settings.get(path) {
            return Some(*rule);
        }
        let last = path.rsplit('.').next()?;
        self.settings.get(last).copied()
    }

    /// Compile the permission patterns into a matcher
    ///
    /// Patterns that fail to parse as globs are skipped; a grant matching no
    /// pattern is only deduplicated against textually identical grants.
    pub fn compiled_patterns(&self) -> Option<GlobSet> {
        if self.permissions.deduplication != Deduplication::PatternMatch
            || self.permissions.patterns.is_empty()
        {
            return None;
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.permissions.patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder.build().ok()
    }
}
