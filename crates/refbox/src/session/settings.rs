use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::atomic_io::write_text_atomic;

pub const DEFAULT_WINDOW_WIDTH: u32 = 420;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 640;
pub const MIN_WINDOW_EXTENT: u32 = 120;

/// Persisted tool configuration. Loaded when the panel opens, saved when it
/// closes, and handed to the session explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub reference_box: ReferenceBoxSettings,
    pub window: WindowSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceBoxSettings {
    /// Only list entries with this type tag.
    pub type_filter: Option<String>,
    pub group_by_type: bool,
    pub last_snapshot: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WINDOW_WIDTH,
            height: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read/write settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode settings for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse settings {path} at {json_path}: {message}")]
    Parse {
        path: PathBuf,
        json_path: String,
        message: String,
    },
    #[error("invalid settings {path} at {field}: {message}")]
    Invalid {
        path: PathBuf,
        field: &'static str,
        message: String,
    },
}

impl ToolSettings {
    /// Never fails: a missing file gives defaults, an unreadable one gives
    /// defaults plus a warning.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!(path = %path.display(), "reference_settings_missing_using_defaults");
                Self::default()
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "reference_settings_unreadable_using_defaults"
                );
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Option<Self>, SettingsError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings = parse_settings(&raw, path)?;
        settings.validate(path)?;
        Ok(Some(settings))
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        write_text_atomic(path, &text).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "reference_settings_saved");
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<(), SettingsError> {
        let check = |field: &'static str, value: u32| {
            if value < MIN_WINDOW_EXTENT {
                Err(SettingsError::Invalid {
                    path: path.to_path_buf(),
                    field,
                    message: format!("expected at least {MIN_WINDOW_EXTENT}, got {value}"),
                })
            } else {
                Ok(())
            }
        };
        check("window.width", self.window.width)?;
        check("window.height", self.window.height)?;
        if let Some(filter) = &self.reference_box.type_filter {
            if filter.trim().is_empty() {
                return Err(SettingsError::Invalid {
                    path: path.to_path_buf(),
                    field: "reference_box.type_filter",
                    message: "expected a type tag or null, got an empty string".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_settings(raw: &str, path: &Path) -> Result<ToolSettings, SettingsError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, ToolSettings>(&mut deserializer).map_err(|error| {
        let json_path = error.path().to_string();
        SettingsError::Parse {
            path: path.to_path_buf(),
            json_path: if json_path.is_empty() {
                ".".to_string()
            } else {
                json_path
            },
            message: error.into_inner().to_string(),
        }
    })
}
