//! Directory content snapshots
//!
//! A snapshot is an uncompressed, content-addressed listing of a directory:
//! one checksum per file. Two snapshots of identical content report identical
//! checksums, which is how backup/restore fidelity is verified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::BackupError;

/// One file in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    /// Path relative to the snapshot root
    pub path: String,

    /// SHA-256 of the file contents, hex encoded
    pub checksum: String,

    /// Size in bytes
    pub size: u64,

    /// Last modification time
    pub modified_time: DateTime<Utc>,
}

/// Content-addressed listing of a directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// The directory that was walked
    pub source_path: String,

    /// Number of files in the listing
    pub file_count: usize,

    /// Per-file entries, sorted by path
    pub files: Vec<SnapshotFile>,
}

impl SnapshotInfo {
    /// Find a file entry by relative path
    pub fn find_file(&self, path: &str) -> Option<&SnapshotFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Whether two snapshots describe identical content
    ///
    /// Compares relative paths and checksums only; timestamps and source
    /// paths are expected to differ across a backup/restore round-trip.
    pub fn same_content(&self, other: &Self) -> bool {
        self.file_count == other.file_count
            && self
                .files
                .iter()
                .zip(other.files.iter())
                .all(|(a, b)| a.path == b.path && a.checksum == b.checksum)
    }
}

/// Walk a directory and checksum every file
pub(super) fn take_snapshot(source: &Path) -> Result<SnapshotInfo, BackupError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        let contents = fs::read(entry.path())?;
        let checksum = {
            let mut hasher = Sha256::new();
            hasher.update(&contents);
            hex::encode(hasher.finalize())
        };

        let metadata = entry.metadata()?;
        let modified_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        files.push(SnapshotFile {
            path: rel_path,
            checksum,
            size: contents.len() as u64,
            modified_time,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(SnapshotInfo {
        timestamp: Utc::now(),
        source_path: source.to_string_lossy().to_string(),
        file_count: files.len(),
        files,
    })
}
