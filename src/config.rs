use crate::errors::{AppError, AppResult};
use crate::models::UserProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "OPSDASH_CONFIG";
pub const DB_PATH_ENV: &str = "OPSDASH_DB_PATH";

/// Bootstrap settings, read once at startup. Runtime-tunable behavior lives in
/// `EngineSettings` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_filter: String,
    pub users: Vec<UserProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/opsdash.db"),
            log_dir: None,
            log_filter: "info".to_string(),
            users: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|error| AppError::Io(format!("failed to read config {}: {}", path.display(), error)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// `OPSDASH_CONFIG` names the YAML file (defaults apply when unset);
    /// `OPSDASH_DB_PATH` overrides the database location either way.
    pub fn from_env() -> AppResult<Self> {
        let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let db_override = std::env::var_os(DB_PATH_ENV).map(PathBuf::from);
        Self::resolve(config_path.as_deref(), db_override)
    }

    fn resolve(config_path: Option<&Path>, db_override: Option<PathBuf>) -> AppResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(path) = db_override.filter(|path| !path.as_os_str().is_empty()) {
            config.database_path = path;
        }
        Ok(config)
    }
}
