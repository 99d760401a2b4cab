//! Backup and snapshot subsystem
//!
//! Archives a configuration directory to a gzip-compressed, checksummed tar
//! plus a sidecar metadata file, and can validate and restore the result.
//! Independent of the merge logic: callers take a backup before a merge is
//! materialized to disk so the merge stays reversible. Each operation is
//! self-contained; concurrent backups of independent directories do not
//! interact.

mod snapshot;

pub use snapshot::{SnapshotFile, SnapshotInfo};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use walkdir::WalkDir;

/// Sidecar file suffix appended to the archive path
pub const METADATA_SUFFIX: &str = ".meta";

/// Default (maximum) gzip compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Gzip stream magic header
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors for backup operations
///
/// Integrity problems found by [`BackupManager::validate_backup`] are not
/// errors; they are reported in [`BackupMetadata::errors`] so callers can
/// present several problems at once.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("source path does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("source path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid backup archive: {0}")]
    InvalidArchive(String),

    #[error("failed to create backup archive: {0}")]
    ArchiveFailed(#[source] io::Error),

    #[error("failed to write backup metadata: {0}")]
    MetadataFailed(#[source] io::Error),

    #[error("failed to restore backup: {0}")]
    RestoreFailed(#[source] io::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("walk error: {0}")]
    WalkError(#[from] walkdir::Error),
}

/// Sidecar metadata written next to every archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarMetadata {
    /// When the backup was created
    timestamp: DateTime<Utc>,

    /// Directory that was archived
    source_path: String,

    /// Gzip compression level used
    compression_level: u32,

    /// SHA-256 of the archive bytes, hex encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

/// Result of validating an archive
///
/// Always returned, never thrown: `is_valid` is false iff `errors` is
/// non-empty. A missing sidecar is a supported degraded state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Whether the archive passed every integrity check
    pub is_valid: bool,

    /// Every integrity problem found, in check order
    pub errors: Vec<String>,

    /// Number of file entries in the archive listing
    pub file_count: usize,

    /// Backup creation time (sidecar), falling back to the archive mtime
    pub timestamp: DateTime<Utc>,

    /// Directory the archive was created from; empty without a sidecar
    pub source_path: String,

    /// Compression level recorded in the sidecar, default otherwise
    pub compression_level: u32,

    /// Archive checksum recorded in the sidecar, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Creates, validates, restores, and snapshots directory backups
///
/// Stateless per operation: the only persisted state is the archive and its
/// sidecar on disk.
#[derive(Debug, Clone, Copy)]
pub struct BackupManager {
    compression_level: u32,
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupManager {
    /// Create a manager with the default (maximum) compression level
    pub fn new() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Override the gzip compression level (clamped to 0..=9)
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Archive `source` into a `.tar.gz` with a `.meta` sidecar
    ///
    /// The archive lands in `output_dir` (the system temp directory when
    /// `None`), named after the source directory plus a timestamp. Returns
    /// the archive path.
    pub fn create_backup(
        &self,
        source: &Path,
        output_dir: Option<&Path>,
    ) -> Result<PathBuf, BackupError> {
        check_source_dir(source)?;

        let out_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(env::temp_dir);
        fs::create_dir_all(&out_dir).map_err(BackupError::ArchiveFailed)?;

        let stem = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backup".to_string());
        let timestamp = Utc::now();
        let archive_path = out_dir.join(format!(
            "{stem}-{}.tar.gz",
            timestamp.format("%Y%m%dT%H%M%S%.9f")
        ));

        self.write_archive(source, &archive_path)
            .map_err(BackupError::ArchiveFailed)?;

        let checksum = file_sha256(&archive_path).map_err(BackupError::ArchiveFailed)?;

        let sidecar = SidecarMetadata {
            timestamp,
            source_path: source.to_string_lossy().to_string(),
            compression_level: self.compression_level,
            checksum: Some(checksum),
        };
        write_sidecar(&archive_path, &sidecar)?;

        Ok(archive_path)
    }

    fn write_archive(&self, source: &Path, archive_path: &Path) -> io::Result<()> {
        let file = File::create(archive_path)?;
        let encoder = GzEncoder::new(file, Compression::new(self.compression_level));
        let mut builder = Builder::new(encoder);

        for entry in WalkDir::new(source)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry.map_err(io::Error::other)?;
            let rel_path = match entry.path().strip_prefix(source) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                _ => continue,
            };
            if entry.file_type().is_dir() {
                builder.append_dir(&rel_path, entry.path())?;
            } else if entry.file_type().is_file() {
                builder.append_path_with_name(entry.path(), &rel_path)?;
            }
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }

    /// Check an archive's integrity without extracting it
    ///
    /// Never fails: every problem is collected into the returned metadata.
    /// Checks, in order: existence, gzip magic header, archive-listing
    /// integrity, sidecar presence (absence tolerated), and the sidecar
    /// checksum when one was recorded.
    pub fn validate_backup(&self, archive_path: &Path) -> BackupMetadata {
        let mut metadata = BackupMetadata {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            ..BackupMetadata::default()
        };

        if !archive_path.is_file() {
            metadata
                .errors
                .push(format!("backup file does not exist: {}", archive_path.display()));
            return metadata;
        }
        metadata.timestamp = file_mtime(archive_path);

        match read_magic(archive_path) {
            Ok(magic) if magic == GZIP_MAGIC => {}
            Ok(_) => {
                metadata
                    .errors
                    .push("not a gzip archive (bad magic header)".to_string());
                return metadata;
            }
            Err(e) => {
                metadata.errors.push(format!("unreadable backup file: {e}"));
                return metadata;
            }
        }

        match count_entries(archive_path) {
            Ok(count) => metadata.file_count = count,
            Err(e) => metadata.errors.push(format!("corrupted archive: {e}")),
        }

        match read_sidecar(archive_path) {
            Ok(Some(sidecar)) => {
                metadata.timestamp = sidecar.timestamp;
                metadata.source_path = sidecar.source_path;
                metadata.compression_level = sidecar.compression_level;
                metadata.checksum = sidecar.checksum.clone();

                if let Some(recorded) = sidecar.checksum {
                    match file_sha256(archive_path) {
                        Ok(actual) if actual == recorded => {}
                        Ok(_) => metadata
                            .errors
                            .push("archive checksum does not match sidecar".to_string()),
                        Err(e) => metadata
                            .errors
                            .push(format!("failed to checksum archive: {e}")),
                    }
                }
            }
            // Missing sidecar: degraded but supported
            Ok(None) => {}
            Err(e) => metadata.errors.push(format!("corrupt sidecar metadata: {e}")),
        }

        metadata.is_valid = metadata.errors.is_empty();
        metadata
    }

    /// Validate, then extract an archive into `restore_path`
    ///
    /// An invalid archive aborts before any extraction; the restore directory
    /// (and intermediate directories) are created, but nothing is written
    /// into them unless validation passed.
    pub fn restore_backup(&self, archive_path: &Path, restore_path: &Path) -> Result<(), BackupError> {
        let metadata = self.validate_backup(archive_path);
        if !metadata.is_valid {
            return Err(BackupError::InvalidArchive(metadata.errors.join("; ")));
        }

        fs::create_dir_all(restore_path).map_err(BackupError::RestoreFailed)?;

        let file = File::open(archive_path).map_err(BackupError::RestoreFailed)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        archive
            .unpack(restore_path)
            .map_err(BackupError::RestoreFailed)?;
        Ok(())
    }

    /// Take a content-addressed snapshot of a directory
    ///
    /// An empty directory yields a snapshot with zero files, not an error.
    pub fn create_snapshot(&self, source: &Path) -> Result<SnapshotInfo, BackupError> {
        check_source_dir(source)?;
        snapshot::take_snapshot(source)
    }
}

fn check_source_dir(source: &Path) -> Result<(), BackupError> {
    if !source.exists() {
        return Err(BackupError::SourceNotFound(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(BackupError::NotADirectory(source.to_path_buf()));
    }
    Ok(())
}

fn sidecar_path(archive_path: &Path) -> PathBuf {
    let mut os = archive_path.as_os_str().to_os_string();
    os.push(METADATA_SUFFIX);
    PathBuf::from(os)
}

fn write_sidecar(archive_path: &Path, sidecar: &SidecarMetadata) -> Result<(), BackupError> {
    let json = serde_json::to_string_pretty(sidecar)
        .map_err(|e| BackupError::MetadataFailed(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(sidecar_path(archive_path), json).map_err(BackupError::MetadataFailed)
}

fn read_sidecar(archive_path: &Path) -> Result<Option<SidecarMetadata>, serde_json::Error> {
    let path = sidecar_path(archive_path);
    let Ok(json) = fs::read_to_string(&path) else {
        return Ok(None);
    };
    serde_json::from_str(&json).map(Some)
}

fn read_magic(path: &Path) -> io::Result<[u8; 2]> {
    use std::io::Read;
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)?;
    Ok(magic)
}

/// Walk the archive listing end to end; a corrupted body fails here even
/// when the gzip header is intact.
fn count_entries(path: &Path) -> io::Result<usize> {
    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            count += 1;
        }
        // Drain the entry so body corruption surfaces
        io::copy(&mut entry, &mut io::sink())?;
    }
    Ok(count)
}

fn file_sha256(path: &Path) -> io::Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
