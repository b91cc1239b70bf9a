use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod atomic_io;
pub mod host;
pub mod identity;
pub mod session;
pub mod store;

pub use host::{
    AssetGuid, AssetRepository, DocumentContext, EditorHost, EntityId, EntityIntrospection,
    InstanceId, MemoryWorld, SceneGraph,
};
pub use identity::{
    compute_display_name, decode, decode_optional, encode, extract_local_name,
    fallback_display_name, identify, Confidence, EntityIdentity, Resolution, ResolveHints,
    Resolver, Strategy,
};
pub use session::{
    LifecycleEvent, LifecycleReport, ReferenceBoxSession, ReferenceBoxSettings, SessionError,
    SettingsError, ToolSettings, WindowSettings,
};
pub use store::{
    missing_objects_message, AddOutcome, EntryState, LoadReport, LoadSource, PersistedEntry, ReattachReport,
    ReferenceEntry, ReferenceStore, RefreshReport, StorageError, StoreError, StoreFile,
    StoreStorage,
};

pub const PROJECT_ROOT_ENV_VAR: &str = "REFBOX_PROJECT_ROOT";

const TOOL_DIR_NAME: &str = "reference_box";
const SESSION_FILE_NAME: &str = "session.json";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Where the reference box keeps its files inside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub root: PathBuf,
    /// Tool-private cache: session tier and settings.
    pub cache_dir: PathBuf,
    /// Durable named snapshots, meant to be checked in with the project.
    pub snapshot_dir: PathBuf,
}

impl ToolPaths {
    pub fn under_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join("cache").join(TOOL_DIR_NAME),
            snapshot_dir: root.join("tools").join(TOOL_DIR_NAME).join("snapshots"),
            root,
        }
    }

    pub fn session_file(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE_NAME)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.cache_dir.join(SETTINGS_FILE_NAME)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("failed to create cache directory at {path}: {source}")]
    CreateCacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "REFBOX_PROJECT_ROOT is set but does not point to a valid project root: {path}\n\
A valid root must contain an assets/ directory."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not detect project root by walking upward from {start_dir}\n\
Expected a directory containing assets/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/path/to/project\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

/// Locates the project root and makes sure the cache directory exists.
/// The snapshot directory is created lazily by the first snapshot save.
pub fn resolve_tool_paths() -> Result<ToolPaths, StartupError> {
    let paths = ToolPaths::under_root(resolve_root()?);
    fs::create_dir_all(&paths.cache_dir).map_err(|source| StartupError::CreateCacheDir {
        path: paths.cache_dir.clone(),
        source,
    })?;
    Ok(paths)
}

fn resolve_root() -> Result<PathBuf, StartupError> {
    match env::var(PROJECT_ROOT_ENV_VAR) {
        Ok(value) => {
            let normalized = normalize_path(&PathBuf::from(value));
            if is_project_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let start_dir = env::current_dir().map_err(StartupError::CurrentDir)?;
            find_root_upward(&start_dir).ok_or_else(|| StartupError::RootNotFound {
                start_dir: normalize_path(&start_dir),
                env_var: PROJECT_ROOT_ENV_VAR,
            })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: PROJECT_ROOT_ENV_VAR,
            source,
        }),
    }
}

fn find_root_upward(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .find(|candidate| is_project_marker(candidate))
        .map(normalize_path)
}

fn is_project_marker(path: &Path) -> bool {
    path.join("assets").is_dir()
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
