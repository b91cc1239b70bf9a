use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::atomic_io::{move_aside, write_text_atomic};
use crate::ToolPaths;

pub const STORE_FORMAT_VERSION: u16 = 1;
pub const SNAPSHOT_EXTENSION: &str = "json";

const CORRUPT_SUFFIX: &str = "corrupt";
const MAX_SNAPSHOT_NAME_LEN: usize = 64;
const SESSION_NONCE_HEX_LEN: usize = 16;

static NEXT_NONCE_SEED: AtomicU64 = AtomicU64::new(0);

/// One reference entry as written to disk. The live handle is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub identity: String,
    #[serde(default)]
    pub type_tag: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_asset_backed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFile {
    pub format_version: u16,
    /// Nonce of the store that wrote the file. Instance ids inside the
    /// entries are only meaningful to that store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_nonce: Option<String>,
    pub entries: Vec<PersistedEntry>,
}

impl StoreFile {
    pub fn new(entries: Vec<PersistedEntry>) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            session_nonce: None,
            entries,
        }
    }

    pub fn written_by(mut self, session_nonce: &str) -> Self {
        self.session_nonce = Some(session_nonce.to_string());
        self
    }

    pub fn is_from_session(&self, session_nonce: &str) -> bool {
        self.session_nonce.as_deref() == Some(session_nonce)
    }
}

/// Fresh nonce for one store's lifetime, distinct across processes and
/// across stores within a process.
pub(crate) fn new_session_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(NEXT_NONCE_SEED.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(SESSION_NONCE_HEX_LEN);
    for byte in digest.iter().take(SESSION_NONCE_HEX_LEN / 2) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read/write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode reference list for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {path} at {json_path}: {message}")]
    Parse {
        path: PathBuf,
        json_path: String,
        message: String,
        quarantined_to: Option<PathBuf>,
    },
    #[error("{path} uses store format {found}, expected {expected}")]
    UnsupportedFormat {
        path: PathBuf,
        found: u16,
        expected: u16,
        quarantined_to: Option<PathBuf>,
    },
    #[error("session file {path} could not be read or set aside; refusing to overwrite it")]
    SessionLocked { path: PathBuf },
    #[error("invalid snapshot name {name:?}: {reason}")]
    InvalidSnapshotName { name: String, reason: &'static str },
    #[error("snapshot {name:?} does not exist at {path}")]
    SnapshotMissing { name: String, path: PathBuf },
    #[error(
        "failed to write snapshot {name:?} to {path}: {source}; references were saved to the session file {session_path} instead"
    )]
    SnapshotFellBack {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
        session_path: PathBuf,
    },
    #[error("reference store has no storage location")]
    Detached,
}

/// The two persistence tiers: one auto-saved session file and a directory
/// of named snapshots.
#[derive(Debug, Clone)]
pub struct StoreStorage {
    session_path: PathBuf,
    snapshot_dir: PathBuf,
}

impl StoreStorage {
    pub fn new(session_path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    pub fn from_tool_paths(paths: &ToolPaths) -> Self {
        Self::new(paths.session_file(), paths.snapshot_dir.clone())
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn write_session(&self, file: &StoreFile) -> Result<PathBuf, StorageError> {
        write_store_file(&self.session_path, file)?;
        Ok(self.session_path.clone())
    }

    /// `Ok(None)` when no session has been written yet. A file that exists but
    /// cannot be used is renamed out of the way so the next auto-save cannot
    /// destroy it.
    pub fn read_session(&self) -> Result<Option<StoreFile>, StorageError> {
        if !self.session_path.exists() {
            return Ok(None);
        }
        match read_store_file(&self.session_path) {
            Ok(file) => Ok(Some(file)),
            Err(error) => {
                warn!(
                    path = %self.session_path.display(),
                    error = %error,
                    "reference_session_unreadable"
                );
                let moved = self.quarantine_session();
                Err(match error {
                    StorageError::Parse {
                        path,
                        json_path,
                        message,
                        ..
                    } => StorageError::Parse {
                        path,
                        json_path,
                        message,
                        quarantined_to: moved,
                    },
                    StorageError::UnsupportedFormat {
                        path,
                        found,
                        expected,
                        ..
                    } => StorageError::UnsupportedFormat {
                        path,
                        found,
                        expected,
                        quarantined_to: moved,
                    },
                    other => other,
                })
            }
        }
    }

    fn quarantine_session(&self) -> Option<PathBuf> {
        match move_aside(&self.session_path, CORRUPT_SUFFIX) {
            Ok(moved) => {
                info!(
                    path = %self.session_path.display(),
                    moved_to = %moved.display(),
                    "reference_session_quarantined"
                );
                Some(moved)
            }
            Err(error) => {
                warn!(
                    path = %self.session_path.display(),
                    error = %error,
                    "reference_session_quarantine_failed"
                );
                None
            }
        }
    }

    /// Writes a named snapshot. When the durable write fails the same list is
    /// written to the session tier and `SnapshotFellBack` reports both.
    pub fn write_snapshot(&self, name: &str, file: &StoreFile) -> Result<PathBuf, StorageError> {
        let path = self.snapshot_path(name)?;
        match write_store_file(&path, file) {
            Ok(()) => Ok(path),
            Err(StorageError::Io { source, .. }) => {
                warn!(
                    snapshot = name,
                    path = %path.display(),
                    error = %source,
                    "reference_snapshot_write_failed_falling_back"
                );
                let session_path = self.write_session(file)?;
                Err(StorageError::SnapshotFellBack {
                    name: name.to_string(),
                    path,
                    source,
                    session_path,
                })
            }
            Err(error) => Err(error),
        }
    }

    pub fn read_snapshot(&self, name: &str) -> Result<StoreFile, StorageError> {
        let path = self.snapshot_path(name)?;
        if !path.is_file() {
            return Err(StorageError::SnapshotMissing {
                name: name.to_string(),
                path,
            });
        }
        read_store_file(&path)
    }

    /// Sorted snapshot names; a missing directory lists as empty.
    pub fn list_snapshots(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.snapshot_dir.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: self.snapshot_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_snapshot = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SNAPSHOT_EXTENSION));
            if !is_snapshot {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if validate_snapshot_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a snapshot file was removed.
    pub fn delete_snapshot(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.snapshot_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    pub fn snapshot_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let name = validate_snapshot_name(name)?;
        Ok(self
            .snapshot_dir
            .join(format!("{name}.{SNAPSHOT_EXTENSION}")))
    }
}

fn validate_snapshot_name(name: &str) -> Result<&str, StorageError> {
    let invalid = |reason| StorageError::InvalidSnapshotName {
        name: name.to_string(),
        reason,
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if trimmed.len() > MAX_SNAPSHOT_NAME_LEN {
        return Err(invalid("name is longer than 64 bytes"));
    }
    if trimmed.starts_with('.') {
        return Err(invalid("name cannot start with '.'"));
    }
    if trimmed
        .chars()
        .any(|ch| matches!(ch, '/' | '\\' | ':') || ch.is_control())
    {
        return Err(invalid("name cannot contain path separators"));
    }
    Ok(trimmed)
}

fn write_store_file(path: &Path, file: &StoreFile) -> Result<(), StorageError> {
    let text = serde_json::to_string_pretty(file).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_text_atomic(path, &text).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        entry_count = file.entries.len(),
        "reference_store_saved"
    );
    Ok(())
}

fn read_store_file(path: &Path) -> Result<StoreFile, StorageError> {
    let raw = fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_store_file(&raw, path)
}

pub(crate) fn parse_store_file(raw: &str, path: &Path) -> Result<StoreFile, StorageError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file = serde_path_to_error::deserialize::<_, StoreFile>(&mut deserializer).map_err(
        |error| {
            let json_path = error.path().to_string();
            StorageError::Parse {
                path: path.to_path_buf(),
                json_path: if json_path.is_empty() {
                    ".".to_string()
                } else {
                    json_path
                },
                message: error.into_inner().to_string(),
                quarantined_to: None,
            }
        },
    )?;
    if file.format_version != STORE_FORMAT_VERSION {
        return Err(StorageError::UnsupportedFormat {
            path: path.to_path_buf(),
            found: file.format_version,
            expected: STORE_FORMAT_VERSION,
            quarantined_to: None,
        });
    }
    Ok(file)
}
