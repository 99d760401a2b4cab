//! Conflict detection across configuration bundles
//!
//! The detector is a pure structural diff: given N [`MergeConfig`] bundles it
//! reports every field-level disagreement, classified by type and severity,
//! with candidate resolutions attached. It performs no I/O and never fails
//! for well-typed input; zero or one bundles yield an empty report.

mod permission;

pub use permission::{scope_covers, Permission, ScopeRelation};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::MergeConfig;

/// Classification of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Same or nested scope granted under different verbs across projects
    PermissionOverlap,
    /// A broader grant subsumes a narrower grant on the same verb
    PermissionHierarchy,
    /// A settings leaf path defined with unequal values
    SettingValue,
    /// A plugin-server name registered with differing descriptors
    McpConfig,
}

impl ConflictType {
    /// String form used in report summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::PermissionOverlap => "permission-overlap",
            ConflictType::PermissionHierarchy => "permission-hierarchy",
            ConflictType::SettingValue => "setting-value",
            ConflictType::McpConfig => "mcp-config",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity scale shared by conflicts and audit issues
///
/// Ordered so that `max()` over a set of findings yields the overall risk
/// level and threshold checks are plain comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// String form used in report summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Projects touched by a conflict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictContext {
    /// Identifiers of the projects that define the conflicting field
    pub affected_projects: Vec<String>,
}

/// One detected disagreement between two or more bundles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Conflict classification
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,

    /// Dotted field locator, e.g. `settings.theme`
    pub path: String,

    /// The distinct values observed across projects
    pub values: Vec<Value>,

    /// Severity of the disagreement
    pub severity: Severity,

    /// Which projects are involved
    pub context: ConflictContext,

    /// Candidate resolutions; always includes `manual-review`
    pub resolution_strategies: Vec<String>,

    /// The resolution the detector recommends
    pub recommended_resolution: String,

    /// Human-readable explanation of the recommendation
    pub resolution_rationale: String,
}

/// Per-type and per-severity tallies for a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    /// Total number of conflicts
    pub total: usize,

    /// Conflict counts keyed by type name
    pub by_type: BTreeMap<String, usize>,

    /// Conflict counts keyed by severity name
    pub by_severity: BTreeMap<String, usize>,
}

/// Output of a detection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// All detected conflicts, ordered by type then path
    pub conflicts: Vec<Conflict>,

    /// Aggregate tallies
    pub summary: ConflictSummary,
}

/// Structural conflict detector over N configuration bundles
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Create a detector
    pub fn new() -> Self {
        Self
    }

    /// Detect every conflict across the given bundles
    ///
    /// Deterministic and pure: the same input always produces the same
    /// report, with conflicts ordered by type and path.
    pub fn detect_conflicts(&self, configs: &[MergeConfig]) -> ConflictReport {
        if configs.len() < 2 {
            return ConflictReport::default();
        }

        let mut conflicts = Vec::new();
        conflicts.extend(detect_permission_conflicts(configs));
        conflicts.extend(detect_setting_conflicts(configs));
        conflicts.extend(detect_mcp_conflicts(configs));

        let summary = summarize(&conflicts);
        ConflictReport { conflicts, summary }
    }
}

fn summarize(conflicts: &[Conflict]) -> ConflictSummary {
    let mut summary = ConflictSummary {
        total: conflicts.len(),
        ..ConflictSummary::default()
    };
    for conflict in conflicts {
        *summary
            .by_type
            .entry(conflict.conflict_type.as_str().to_string())
            .or_insert(0) += 1;
        *summary
            .by_severity
            .entry(conflict.severity.as_str().to_string())
            .or_insert(0) += 1;
    }
    summary
}

/// Fixed candidate resolutions per conflict type
pub fn resolution_strategies(conflict_type: ConflictType) -> Vec<String> {
    let candidates: &[&str] = match conflict_type {
        ConflictType::PermissionOverlap => &["keep-both", "keep-broadest", "manual-review"],
        ConflictType::PermissionHierarchy => {
            &["keep-broadest", "keep-narrowest", "manual-review"]
        }
        ConflictType::SettingValue => {
            &["prefer-first", "prefer-last", "most-common", "manual-review"]
        }
        ConflictType::McpConfig => &["prefer-first", "prefer-last", "manual-review"],
    };
    candidates.iter().map(|s| (*s).to_string()).collect()
}

fn recommendation(conflict_type: ConflictType) -> (&'static str, &'static str) {
    match conflict_type {
        ConflictType::PermissionOverlap => (
            "keep-both",
            "The verbs grant different capabilities over overlapping scopes; \
             keeping both preserves each project's intent",
        ),
        ConflictType::PermissionHierarchy => (
            "keep-broadest",
            "The broader grant already subsumes the narrower one; keeping only \
             the broader entry removes the redundancy",
        ),
        ConflictType::SettingValue => (
            "most-common",
            "The value shared by the most projects is the least surprising \
             choice; ties fall back to the earliest source",
        ),
        ConflictType::McpConfig => (
            "manual-review",
            "Server descriptors identify live endpoints; an automatic pick \
             could silently route tooling to the wrong service",
        ),
    }
}

fn build_conflict(
    conflict_type: ConflictType,
    path: String,
    values: Vec<Value>,
    severity: Severity,
    affected_projects: Vec<String>,
) -> Conflict {
    let (recommended, rationale) = recommendation(conflict_type);
    Conflict {
        conflict_type,
        path,
        values,
        severity,
        context: ConflictContext { affected_projects },
        resolution_strategies: resolution_strategies(conflict_type),
        recommended_resolution: recommended.to_string(),
        resolution_rationale: rationale.to_string(),
    }
}

fn detect_permission_conflicts(configs: &[MergeConfig]) -> Vec<Conflict> {
    let parsed: Vec<Vec<Permission>> = configs
        .iter()
        .map(|c| c.permissions.iter().map(|p| Permission::parse(p)).collect())
        .collect();

    // Deduplicated by (type, path) so a grant pair repeated across many
    // projects is one conflict with all projects attached.
    let mut found: BTreeMap<(ConflictType, String), (Severity, Vec<Value>, BTreeSet<String>)> =
        BTreeMap::new();

    for i in 0..configs.len() {
        for j in (i + 1)..configs.len() {
            for a in &parsed[i] {
                for b in &parsed[j] {
                    // Identical duplicate grants across projects are normal
                    if a.raw == b.raw {
                        continue;
                    }
                    let relation = a.scope_relation(b);
                    if relation == ScopeRelation::Disjoint {
                        continue;
                    }

                    let conflict_type = if a.verb == b.verb {
                        // Same capability, nested scopes: redundancy, not overlap
                        if relation == ScopeRelation::Equal {
                            continue;
                        }
                        ConflictType::PermissionHierarchy
                    } else {
                        ConflictType::PermissionOverlap
                    };

                    let severity = match conflict_type {
                        ConflictType::PermissionHierarchy => Severity::Low,
                        _ if a.is_global() || b.is_global() => Severity::High,
                        _ => Severity::Medium,
                    };

                    let (first, second) = if a.raw <= b.raw {
                        (a, b)
                    } else {
                        (b, a)
                    };
                    let path = format!("permissions[{} vs {}]", first.raw, second.raw);

                    let entry = found
                        .entry((conflict_type, path))
                        .or_insert_with(|| (severity, Vec::new(), BTreeSet::new()));
                    entry.0 = entry.0.max(severity);
                    for raw in [&first.raw, &second.raw] {
                        let value = Value::String(raw.clone());
                        if !entry.1.contains(&value) {
                            entry.1.push(value);
                        }
                    }
                    entry.2.insert(configs[i].project.clone());
                    entry.2.insert(configs[j].project.clone());
                }
            }
        }
    }

    found
        .into_iter()
        .map(|((conflict_type, path), (severity, values, projects))| {
            build_conflict(
                conflict_type,
                path,
                values,
                severity,
                projects.into_iter().collect(),
            )
        })
        .collect()
}

fn detect_setting_conflicts(configs: &[MergeConfig]) -> Vec<Conflict> {
    let mut paths = BTreeSet::new();
    for config in configs {
        collect_leaf_paths(&config.settings, "", &mut paths);
    }

    let mut conflicts = Vec::new();
    for path in paths {
        let mut projects = Vec::new();
        let mut distinct = Vec::new();
        for config in configs {
            let Some(value) = value_at_path(&config.settings, &path) else {
                continue;
            };
            projects.push(config.project.clone());
            if !distinct.contains(value) {
                distinct.push(value.clone());
            }
        }
        if projects.len() >= 2 && distinct.len() >= 2 {
            conflicts.push(build_conflict(
                ConflictType::SettingValue,
                format!("settings.{path}"),
                distinct,
                Severity::Medium,
                projects,
            ));
        }
    }
    conflicts
}

fn detect_mcp_conflicts(configs: &[MergeConfig]) -> Vec<Conflict> {
    let mut names = BTreeSet::new();
    for config in configs {
        names.extend(config.mcp_servers.keys().cloned());
    }

    let mut conflicts = Vec::new();
    for name in names {
        let defined: Vec<_> = configs
            .iter()
            .filter_map(|c| c.mcp_servers.get(&name).map(|s| (c.project.clone(), s)))
            .collect();
        if defined.len() < 2 {
            continue;
        }
        if defined.iter().all(|(_, s)| *s == defined[0].1) {
            continue;
        }

        let mut distinct = Vec::new();
        for (_, server) in &defined {
            let value = serde_json::to_value(server).unwrap_or(Value::Null);
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        conflicts.push(build_conflict(
            ConflictType::McpConfig,
            format!("mcpServers.{name}"),
            distinct,
            Severity::High,
            defined.into_iter().map(|(p, _)| p).collect(),
        ));
    }
    conflicts
}

/// Enumerate every leaf path in a settings tree
///
/// Objects recurse; scalars, arrays, and empty objects are leaves.
pub fn collect_leaf_paths(map: &Map<String, Value>, prefix: &str, out: &mut BTreeSet<String>) {
    for (key, value) in map {
        let segment = escape_segment(key);
        let path = if prefix.is_empty() {
            segment
        } else {
            format!("{prefix}.{segment}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => collect_leaf_paths(inner, &path, out),
            _ => {
                out.insert(path);
            }
        }
    }
}

/// Escape a map key for use as one segment of a dotted path
///
/// Keys may contain literal dots; without escaping, `{"a.b": 1}` and
/// `{"a": {"b": 1}}` would enumerate to the same path.
fn escape_segment(key: &str) -> String {
    key.replace('\\', "\\\\").replace('.', "\\.")
}

/// Split a dotted path into unescaped key segments
///
/// Inverse of the escaping done during leaf-path enumeration: `\.` is a
/// literal dot inside a key, `\\` a literal backslash.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

/// Navigate a settings tree by dotted path
pub fn value_at_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = split_path(path).into_iter();
    let mut current = map.get(&segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(&segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(project: &str, json: serde_json::Value) -> MergeConfig {
        let mut config = MergeConfig::new(project);
        if let Some(perms) = json.get("permissions") {
            config.permissions = serde_json::from_value(perms.clone()).unwrap();
        }
        if let Some(servers) = json.get("mcpServers") {
            config.mcp_servers = serde_json::from_value(servers.clone()).unwrap();
        }
        if let Some(Value::Object(settings)) = json.get("settings") {
            config.settings = settings.clone();
        }
        config
    }

    #[test]
    fn test_empty_and_single_input_yield_no_conflicts() {
        let detector = ConflictDetector::new();
        assert!(detector.detect_conflicts(&[]).conflicts.is_empty());

        let one = config("a", json!({"settings": {"theme": "dark"}}));
        let report = detector.detect_conflicts(&[one]);
        assert!(report.conflicts.is_empty());
        assert_eq!(report.summary.total, 0);
    }

    #[test]
    fn test_identical_settings_produce_no_conflicts() {
        let shared = json!({"settings": {
            "theme": "dark",
            "editor": {"tabs": {"width": 4, "soft": true}}
        }});
        let a = config("a", shared.clone());
        let b = config("b", shared);

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_setting_value_conflict_carries_all_distinct_values() {
        let a = config("a", json!({"settings": {"theme": "dark"}}));
        let b = config("b", json!({"settings": {"theme": "light"}}));
        let c = config("c", json!({"settings": {"theme": "dark"}}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b, c]);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::SettingValue);
        assert_eq!(conflict.path, "settings.theme");
        assert_eq!(conflict.values, vec![json!("dark"), json!("light")]);
        assert_eq!(conflict.context.affected_projects, vec!["a", "b", "c"]);
        assert!(conflict
            .resolution_strategies
            .contains(&"manual-review".to_string()));
        assert!(!conflict.resolution_rationale.is_empty());
    }

    #[test]
    fn test_nested_setting_conflict_uses_dotted_path() {
        let a = config("a", json!({"settings": {"editor": {"tabs": {"width": 4}}}}));
        let b = config("b", json!({"settings": {"editor": {"tabs": {"width": 2}}}}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].path, "settings.editor.tabs.width");
    }

    #[test]
    fn test_object_vs_scalar_at_same_path_conflicts() {
        let a = config("a", json!({"settings": {"proxy": {"host": "p1"}}}));
        let b = config("b", json!({"settings": {"proxy": "direct"}}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].conflict_type, ConflictType::SettingValue);
    }

    #[test]
    fn test_dotted_setting_key_conflict_detected() {
        let a = config("a", json!({"settings": {"a.b": 1}}));
        let b = config("b", json!({"settings": {"a.b": 2}}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::SettingValue);
        assert_eq!(conflict.path, "settings.a\\.b");
        assert_eq!(conflict.values, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_dotted_key_distinct_from_nested_path() {
        // {"a.b": 1} and {"a": {"b": 1}} are different shapes, not a match
        let flat = config("flat", json!({"settings": {"a.b": 1}}));
        let nested = config("nested", json!({"settings": {"a": {"b": 1}}}));

        let report = ConflictDetector::new().detect_conflicts(&[flat, nested]);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_split_path_unescapes_dotted_keys() {
        assert_eq!(split_path("editor.tabs"), vec!["editor", "tabs"]);
        assert_eq!(split_path("a\\.b.c"), vec!["a.b", "c"]);
        assert_eq!(split_path("plain"), vec!["plain"]);
    }

    #[test]
    fn test_duplicate_identical_permissions_are_not_conflicts() {
        let a = config("a", json!({"permissions": ["Read(*)", "Write(src/*)"]}));
        let b = config("b", json!({"permissions": ["Read(*)", "Write(src/*)"]}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_permission_overlap_on_differing_verbs() {
        let a = config("a", json!({"permissions": ["Read(src/*)"]}));
        let b = config("b", json!({"permissions": ["Write(src/*)"]}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::PermissionOverlap);
        assert_eq!(conflict.severity, Severity::Medium);
        assert_eq!(conflict.context.affected_projects, vec!["a", "b"]);
    }

    #[test]
    fn test_permission_overlap_with_global_scope_is_high() {
        let a = config("a", json!({"permissions": ["Read(*)"]}));
        let b = config("b", json!({"permissions": ["Write(src/*)"]}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, Severity::High);
    }

    #[test]
    fn test_permission_hierarchy_distinct_from_overlap() {
        let a = config("a", json!({"permissions": ["Read(*)"]}));
        let b = config("b", json!({"permissions": ["Read(src/*)"]}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::PermissionHierarchy);
        assert_eq!(conflict.recommended_resolution, "keep-broadest");
    }

    #[test]
    fn test_mcp_conflict_per_colliding_name() {
        let a = config(
            "a",
            json!({"mcpServers": {
                "search": {"enabled": true, "url": "https://a"},
                "db": {"enabled": true}
            }}),
        );
        let b = config(
            "b",
            json!({"mcpServers": {
                "search": {"enabled": true, "url": "https://b"},
                "db": {"enabled": true}
            }}),
        );

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::McpConfig);
        assert_eq!(conflict.path, "mcpServers.search");
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.values.len(), 2);
    }

    #[test]
    fn test_mcp_enabled_flag_difference_is_a_conflict() {
        let a = config("a", json!({"mcpServers": {"db": {"enabled": true}}}));
        let b = config("b", json!({"mcpServers": {"db": {"enabled": false}}}));

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].path, "mcpServers.db");
    }

    #[test]
    fn test_summary_tallies() {
        let a = config(
            "a",
            json!({
                "permissions": ["Read(*)"],
                "settings": {"theme": "dark"},
                "mcpServers": {"db": {"enabled": true}}
            }),
        );
        let b = config(
            "b",
            json!({
                "permissions": ["Write(src/*)"],
                "settings": {"theme": "light"},
                "mcpServers": {"db": {"enabled": false}}
            }),
        );

        let report = ConflictDetector::new().detect_conflicts(&[a, b]);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.by_type["permission-overlap"], 1);
        assert_eq!(report.summary.by_type["setting-value"], 1);
        assert_eq!(report.summary.by_type["mcp-config"], 1);
        assert_eq!(report.summary.by_severity["high"], 2);
        assert_eq!(report.summary.by_severity["medium"], 1);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let a = config(
            "a",
            json!({
                "permissions": ["Read(*)", "Bash(npm test)"],
                "settings": {"theme": "dark", "lang": "en"}
            }),
        );
        let b = config(
            "b",
            json!({
                "permissions": ["Write(*)", "Read(src/*)"],
                "settings": {"theme": "light", "lang": "de"}
            }),
        );

        let detector = ConflictDetector::new();
        let first = detector.detect_conflicts(&[a.clone(), b.clone()]);
        let second = detector.detect_conflicts(&[a, b]);
        assert_eq!(first, second);
    }
}
