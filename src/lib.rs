//! confmerge - Merge & conflict resolution engine for configuration bundles
//!
//! This crate reconciles directory-scoped configuration bundles (permission
//! lists, plugin-server registrations, and free-form settings) from multiple
//! independent projects into a single reviewed configuration. It provides:
//!
//! - [`ConflictDetector`]: structural diff over N config bundles
//! - [`MergeStrategy`]: five resolution policies producing a [`MergeResult`]
//! - [`SecurityAuditor`]: rule-based risk scoring of a merge result
//! - [`BackupManager`]: compressed, checksummed backups and content snapshots
//!
//! The interactive UI, CLI parsing, and dashboard layers live outside this
//! crate; they consume the JSON-serializable types exported here.

pub mod audit;
pub mod backup;
pub mod config;
pub mod conflict;
pub mod merge;

pub use audit::{AuditError, IssueType, SecurityAuditResult, SecurityAuditor, SecurityIssue};
pub use backup::{BackupError, BackupManager, BackupMetadata, SnapshotFile, SnapshotInfo};
pub use config::{ConfigError, McpServer, MergeConfig};
pub use conflict::{
    Conflict, ConflictDetector, ConflictReport, ConflictSummary, ConflictType, Severity,
};
pub use merge::{CustomMergeRules, MergeConflict, MergeResult, MergeStats, MergeStrategy};
