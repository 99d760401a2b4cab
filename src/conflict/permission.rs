//! Permission grant expressions
//!
//! Permissions are written `Verb(scope)`, e.g. `Read(*)`, `Write(src/*)`,
//! `Bash(npm test)`. The scope is a path pattern; `*` grants the verb
//! globally and `dir/*` grants it under a directory prefix. A bare verb with
//! no parenthesized scope is treated as a global grant.

/// How two permission scopes relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRelation {
    /// Neither scope contains the other
    Disjoint,
    /// Scopes are textually identical
    Equal,
    /// The first scope is contained within the second
    Subset,
    /// The first scope contains the second
    Superset,
}

/// A parsed permission grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// Original expression as written in the bundle
    pub raw: String,
    /// Capability verb, e.g. `Read`, `Write`, `Bash`
    pub verb: String,
    /// Resource scope; `*` for global grants
    pub scope: String,
}

impl Permission {
    /// Parse a permission expression
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(open) = raw.find('(') {
            if let Some(stripped) = raw.strip_suffix(')') {
                let verb = raw[..open].trim().to_string();
                let scope = stripped[open + 1..].trim().to_string();
                if !verb.is_empty() {
                    return Self {
                        raw: raw.to_string(),
                        verb,
                        scope: if scope.is_empty() {
                            "*".to_string()
                        } else {
                            scope
                        },
                    };
                }
            }
        }

        // Bare verb: global scope
        Self {
            raw: raw.to_string(),
            verb: raw.to_string(),
            scope: "*".to_string(),
        }
    }

    /// Whether the scope is the global wildcard
    pub fn is_global(&self) -> bool {
        self.scope == "*"
    }

    /// Relation of this permission's scope to another's
    pub fn scope_relation(&self, other: &Self) -> ScopeRelation {
        if self.scope == other.scope {
            ScopeRelation::Equal
        } else if scope_covers(&other.scope, &self.scope) {
            ScopeRelation::Subset
        } else if scope_covers(&self.scope, &other.scope) {
            ScopeRelation::Superset
        } else {
            ScopeRelation::Disjoint
        }
    }
}

/// Whether `outer` fully contains `inner`
///
/// `*` contains every scope; `dir/*` contains any scope under `dir/`,
/// including narrower patterns like `dir/sub/*`. Literal scopes contain
/// only themselves.
pub fn scope_covers(outer: &str, inner: &str) -> bool {
    if outer == inner {
        return true;
    }
    if outer == "*" {
        return true;
    }
    if let Some(prefix) = outer.strip_suffix('*') {
        return !prefix.is_empty() && inner.starts_with(prefix);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scoped() {
        let p = Permission::parse("Write(src/*)");
        assert_eq!(p.verb, "Write");
        assert_eq!(p.scope, "src/*");
        assert_eq!(p.raw, "Write(src/*)");
    }

    #[test]
    fn test_parse_global() {
        let p = Permission::parse("Read(*)");
        assert_eq!(p.verb, "Read");
        assert!(p.is_global());
    }

    #[test]
    fn test_parse_bare_verb_is_global() {
        let p = Permission::parse("Read");
        assert_eq!(p.verb, "Read");
        assert_eq!(p.scope, "*");
    }

    #[test]
    fn test_parse_command_scope() {
        let p = Permission::parse("Bash(npm run build)");
        assert_eq!(p.verb, "Bash");
        assert_eq!(p.scope, "npm run build");
    }

    #[test]
    fn test_scope_covers_global() {
        assert!(scope_covers("*", "src/*"));
        assert!(scope_covers("*", "README.md"));
    }

    #[test]
    fn test_scope_covers_prefix() {
        assert!(scope_covers("src/*", "src/main.rs"));
        assert!(scope_covers("src/*", "src/sub/*"));
        assert!(!scope_covers("src/*", "tests/lib.rs"));
        assert!(!scope_covers("src/main.rs", "src/*"));
    }

    #[test]
    fn test_scope_relation() {
        let global = Permission::parse("Read(*)");
        let narrow = Permission::parse("Read(src/*)");
        let other = Permission::parse("Read(tests/*)");

        assert_eq!(narrow.scope_relation(&global), ScopeRelation::Subset);
        assert_eq!(global.scope_relation(&narrow), ScopeRelation::Superset);
        assert_eq!(narrow.scope_relation(&other), ScopeRelation::Disjoint);
        assert_eq!(
            narrow.scope_relation(&Permission::parse("Write(src/*)")),
            ScopeRelation::Equal
        );
    }
}
