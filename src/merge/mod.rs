//! Merge strategies
//!
//! Five policies reconcile N configuration bundles into one [`MergeResult`].
//! All strategies share conflict detection and the union-with-dedup
//! permission merge; they diverge in how conflicting settings and server
//! descriptors are resolved and in which conflicts get flagged for a human.
//!
//! Every strategy is total: zero bundles yield an empty result and a single
//! bundle passes through unchanged.

mod rules;
mod value;

pub use rules::{CustomMergeRules, Deduplication, PermissionRules, SettingRule};
pub use value::{deep_merge_prefer_first, deep_merge_prefer_last, merge_settings_maps, set_at_path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{McpServer, MergeConfig};
use crate::conflict::{
    value_at_path, Conflict, ConflictDetector, ConflictType, Severity,
};

/// A conflict as recorded in a merge result
///
/// Wraps the detector's [`Conflict`] with the merge-side review flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    /// The detected conflict
    #[serde(flatten)]
    pub conflict: Conflict,

    /// Field the conflict applies to (same locator as `path`)
    pub field: String,

    /// Whether the strategy left this conflict for a human reviewer
    pub requires_manual_review: bool,

    /// Reviewer hint, set when the strategy had no rule to apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Counters describing a merge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// Number of input bundles
    pub projects_analyzed: usize,

    /// Number of distinct conflicting fields
    pub conflicts_detected: usize,

    /// Conflicting fields the strategy resolved without flagging
    pub auto_resolved: usize,
}

/// The reconciled configuration plus its conflict record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    /// Merged permission grants, deduplicated per strategy policy
    pub permissions: Vec<String>,

    /// Merged plugin-server registrations
    pub mcp_servers: BTreeMap<String, McpServer>,

    /// Merged settings tree
    pub settings: Map<String, Value>,

    /// Every conflict encountered, with review flags
    pub conflicts: Vec<MergeConflict>,

    /// Merge counters
    pub stats: MergeStats,
}

/// A named merge policy
///
/// The closed set of strategies; adding one is a compile-time concern for
/// every match site, not a string comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "rules", rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Heuristic single-value choice for conflicting settings: the value
    /// defined by the most projects wins, ties falling back to the earliest
    /// source. Only conflicts the detector itself defers (`manual-review`)
    /// are flagged.
    Recommended,
    /// Last source wins on every conflict; nothing is flagged for review.
    Default,
    /// First source wins and no value is ever silently overwritten; every
    /// conflict is flagged for manual review.
    Conservative,
    /// Conflicts below `high` severity auto-resolve last-wins; `high` and
    /// `critical` conflicts keep the first value and are flagged.
    Hybrid,
    /// Caller-supplied per-key rules; conflicts without a matching rule keep
    /// the first value, are flagged, and carry a suggestion.
    Custom(CustomMergeRules),
}

impl MergeStrategy {
    /// Strategy name as used in serialized output
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::Recommended => "recommended",
            MergeStrategy::Default => "default",
            MergeStrategy::Conservative => "conservative",
            MergeStrategy::Hybrid => "hybrid",
            MergeStrategy::Custom(_) => "custom",
        }
    }

    /// Merge the given bundles under this policy
    pub fn merge(&self, configs: &[MergeConfig]) -> MergeResult {
        let mut result = MergeResult {
            stats: MergeStats {
                projects_analyzed: configs.len(),
                ..MergeStats::default()
            },
            ..MergeResult::default()
        };
        if configs.is_empty() {
            return result;
        }

        let report = ConflictDetector::new().detect_conflicts(configs);

        result.permissions = self.merge_permissions(configs);
        result.settings = self.merge_settings(configs, &report.conflicts);
        result.mcp_servers = self.merge_mcp_servers(configs);
        result.conflicts = self.flag_conflicts(report.conflicts);

        let fields: BTreeSet<&str> = result.conflicts.iter().map(|c| c.field.as_str()).collect();
        let flagged: BTreeSet<&str> = result
            .conflicts
            .iter()
            .filter(|c| c.requires_manual_review)
            .map(|c| c.field.as_str())
            .collect();
        result.stats.conflicts_detected = fields.len();
        result.stats.auto_resolved = fields.len() - flagged.len();

        result
    }

    fn merge_permissions(&self, configs: &[MergeConfig]) -> Vec<String> {
        let pattern_set = match self {
            MergeStrategy::Custom(rules) => rules.compiled_patterns(),
            _ => None,
        };

        let mut merged: Vec<String> = Vec::new();
        let mut matched_patterns: BTreeSet<usize> = BTreeSet::new();

        for config in configs {
            for permission in &config.permissions {
                if merged.contains(permission) {
                    continue;
                }
                if let Some(set) = &pattern_set {
                    let matches = set.matches(permission);
                    if matches.iter().any(|idx| matched_patterns.contains(idx)) {
                        continue;
                    }
                    matched_patterns.extend(matches);
                }
                merged.push(permission.clone());
            }
        }
        merged
    }

    fn merge_settings(
        &self,
        configs: &[MergeConfig],
        conflicts: &[Conflict],
    ) -> Map<String, Value> {
        let layers: Vec<&Map<String, Value>> = configs.iter().map(|c| &c.settings).collect();

        if matches!(self, MergeStrategy::Default) {
            return merge_settings_maps(&layers, true);
        }

        // Everything else starts from a first-wins base and overrides
        // individual conflicting paths per policy.
        let mut merged = merge_settings_maps(&layers, false);

        for conflict in conflicts {
            if conflict.conflict_type != ConflictType::SettingValue {
                continue;
            }
            let Some(path) = conflict.path.strip_prefix("settings.") else {
                continue;
            };
            let chosen = match self {
                MergeStrategy::Recommended => Some(most_common_value(configs, path)),
                MergeStrategy::Conservative => None,
                MergeStrategy::Hybrid => {
                    if conflict.severity < Severity::High {
                        last_value(configs, path)
                    } else {
                        None
                    }
                }
                MergeStrategy::Custom(rules) => match rules.setting_rule(path) {
                    Some(SettingRule::PreferFirst) | None => None,
                    Some(SettingRule::PreferLast) => last_value(configs, path),
                    Some(SettingRule::Union) => Some(union_values(&conflict.values)),
                },
                MergeStrategy::Default => None,
            };
            if let Some(value) = chosen {
                set_at_path(&mut merged, path, value);
            }
        }
        merged
    }

    fn merge_mcp_servers(&self, configs: &[MergeConfig]) -> BTreeMap<String, McpServer> {
        let mut names = BTreeSet::new();
        for config in configs {
            names.extend(config.mcp_servers.keys().cloned());
        }

        let mut merged = BTreeMap::new();
        for name in names {
            let defined: Vec<&McpServer> = configs
                .iter()
                .filter_map(|c| c.mcp_servers.get(&name))
                .collect();
            let first = defined[0].clone();
            if defined.len() == 1 || defined.iter().all(|s| **s == first) {
                merged.insert(name, first);
                continue;
            }

            let chosen = match self {
                MergeStrategy::Default => defined[defined.len() - 1].clone(),
                MergeStrategy::Recommended => most_common_server(&defined),
                // Descriptor collisions are high severity: keep the first
                MergeStrategy::Conservative | MergeStrategy::Hybrid => first,
                MergeStrategy::Custom(rules) => {
                    let rule = rules
                        .setting_rule(&format!("mcpServers.{name}"))
                        .or_else(|| rules.setting_rule(&name));
                    match rule {
                        Some(SettingRule::PreferLast) => defined[defined.len() - 1].clone(),
                        Some(SettingRule::Union) => union_servers(&defined),
                        Some(SettingRule::PreferFirst) | None => first,
                    }
                }
            };
            merged.insert(name, chosen);
        }
        merged
    }

    fn flag_conflicts(&self, conflicts: Vec<Conflict>) -> Vec<MergeConflict> {
        conflicts
            .into_iter()
            .map(|conflict| {
                let field = conflict.path.clone();
                let (requires_manual_review, suggestion) = match self {
                    MergeStrategy::Recommended => {
                        (conflict.recommended_resolution == "manual-review", None)
                    }
                    MergeStrategy::Default => (false, None),
                    MergeStrategy::Conservative => (true, None),
                    MergeStrategy::Hybrid => (conflict.severity >= Severity::High, None),
                    MergeStrategy::Custom(rules) => custom_review(rules, &conflict),
                };
                MergeConflict {
                    conflict,
                    field,
                    requires_manual_review,
                    suggestion,
                }
            })
            .collect()
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Review decision for the custom strategy: unmatched conflicts are flagged
/// and carry a concrete suggestion.
fn custom_review(rules: &CustomMergeRules, conflict: &Conflict) -> (bool, Option<String>) {
    match conflict.conflict_type {
        ConflictType::SettingValue => {
            let path = conflict.path.strip_prefix("settings.").unwrap_or(&conflict.path);
            if rules.setting_rule(path).is_some() {
                (false, None)
            } else {
                (
                    true,
                    Some(format!(
                        "No custom rule matched '{path}'; add a settings rule \
                         (prefer-first, prefer-last, or union) or resolve manually"
                    )),
                )
            }
        }
        ConflictType::McpConfig => {
            let name = conflict.path.strip_prefix("mcpServers.").unwrap_or(&conflict.path);
            let matched = rules
                .setting_rule(&format!("mcpServers.{name}"))
                .or_else(|| rules.setting_rule(name))
                .is_some();
            if matched {
                (false, None)
            } else {
                (
                    true,
                    Some(format!(
                        "No custom rule matched server '{name}'; add a rule or \
                         pick one descriptor manually"
                    )),
                )
            }
        }
        ConflictType::PermissionOverlap | ConflictType::PermissionHierarchy => (
            true,
            Some(
                "Custom permission rules only control deduplication; review \
                 the overlapping grants manually"
                    .to_string(),
            ),
        ),
    }
}

/// Most frequent value at a settings path, ties going to the earliest source.
fn most_common_value(configs: &[MergeConfig], path: &str) -> Value {
    let mut distinct: Vec<(Value, usize)> = Vec::new();
    for config in configs {
        let Some(value) = value_at_path(&config.settings, path) else {
            continue;
        };
        if let Some(entry) = distinct.iter_mut().find(|(v, _)| v == value) {
            entry.1 += 1;
        } else {
            distinct.push((value.clone(), 1));
        }
    }
    // Strictly-greater comparison keeps the earliest entry on ties
    distinct
        .into_iter()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .map(|(value, _)| value)
        .unwrap_or(Value::Null)
}

/// Value at a settings path from the last source that defines it.
fn last_value(configs: &[MergeConfig], path: &str) -> Option<Value> {
    configs
        .iter()
        .rev()
        .find_map(|c| value_at_path(&c.settings, path).cloned())
}

/// Union of conflicting values: arrays concatenate, scalars collect.
fn union_values(distinct: &[Value]) -> Value {
    let mut out: Vec<Value> = Vec::new();
    for value in distinct {
        match value {
            Value::Array(items) => {
                for item in items {
                    if !out.contains(item) {
                        out.push(item.clone());
                    }
                }
            }
            other => {
                if !out.contains(other) {
                    out.push(other.clone());
                }
            }
        }
    }
    Value::Array(out)
}

/// Most frequent descriptor among colliding registrations, earliest on ties.
fn most_common_server(defined: &[&McpServer]) -> McpServer {
    let mut distinct: Vec<(&McpServer, usize)> = Vec::new();
    for server in defined {
        if let Some(entry) = distinct.iter_mut().find(|(s, _)| s == server) {
            entry.1 += 1;
        } else {
            distinct.push((server, 1));
        }
    }
    distinct
        .into_iter()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .map(|(server, _)| server.clone())
        .unwrap_or_default()
}

/// Field-wise union of colliding descriptors, later sources filling gaps.
fn union_servers(defined: &[&McpServer]) -> McpServer {
    let mut merged = serde_json::to_value(defined[0]).unwrap_or(Value::Null);
    for server in &defined[1..] {
        let overlay = serde_json::to_value(server).unwrap_or(Value::Null);
        merged = deep_merge_prefer_first(merged, overlay);
    }
    serde_json::from_value(merged).unwrap_or_else(|_| defined[0].clone())
}
