//! Versioned audit rule table
//!
//! The destructive-command signatures live here as data so the table can be
//! unit-tested independently of the permission traversal. Bumping a rule or
//! adding one is a change to this table and to [`RULES_VERSION`], nothing
//! else.

use crate::conflict::Severity;

/// Version of the rule table below
pub const RULES_VERSION: u32 = 1;

/// A matcher/severity/recommendation record
#[derive(Debug, Clone, Copy)]
pub struct SignatureRule {
    /// Stable rule identifier
    pub name: &'static str,
    /// Regex applied to the command inside a `Bash(...)` grant
    pub pattern: &'static str,
    /// Severity of a match
    pub severity: Severity,
    /// What the match means
    pub description: &'static str,
    /// What the operator should do about it
    pub recommendation: &'static str,
}

/// Destructive-command signatures for `Bash(...)` grants
pub const BASH_SIGNATURES: &[SignatureRule] = &[
    SignatureRule {
        name: "recursive-root-delete",
        pattern: r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+(/|~)(\s|\*|$)",
        severity: Severity::Critical,
        description: "Recursive delete of a root-like path",
        recommendation: "Remove the grant; recursive deletes must target an explicit project path",
    },
    SignatureRule {
        name: "remote-pipe-shell",
        pattern: r"(curl|wget)[^|]*\|\s*(sudo\s+)?\w*sh\b",
        severity: Severity::Critical,
        description: "Pipes a remote download directly into a shell",
        recommendation: "Download to a file, review it, then execute from a pinned checksum",
    },
    SignatureRule {
        name: "eval-external-input",
        pattern: r"\beval\b",
        severity: Severity::Critical,
        description: "Evaluates externally supplied input as shell code",
        recommendation: "Replace eval with an explicit command; never execute untrusted text",
    },
    SignatureRule {
        name: "shell-injection",
        pattern: r"\$\{[^}]*\}|\$\([^)]*\)",
        severity: Severity::Critical,
        description: "Shell variable or command substitution in a granted command",
        recommendation: "Grant a fully literal command; substitution makes the grant open-ended",
    },
    SignatureRule {
        name: "privilege-escalation",
        pattern: r"\bsudo\b",
        severity: Severity::Critical,
        description: "Privilege escalation via sudo",
        recommendation: "Run the command unprivileged or move it outside the merged grant set",
    },
];
