//! TOML configuration with environment overrides.
//!
//! Everything has a default, so a missing file yields a working
//! configuration that mirrors into `scmsync.db` next to the process.
//! `SCMSYNC_DB` and `SCMSYNC_SECRET` override the file so deployments
//! can keep the secret out of it.

use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;

pub const DB_ENV_VAR: &str = "SCMSYNC_DB";
pub const SECRET_ENV_VAR: &str = "SCMSYNC_SECRET";
const DEFAULT_CONFIG_FILE: &str = "scmsync.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Secret the credential cipher derives its key from. Blank
    /// disables encryption at rest.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub scm: ScmConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub references: ReferenceConfig,
    /// User directory for committer resolution.
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScmConfig {
    /// Backends repositories may be registered with. Names that no
    /// adapter factory claims are tolerated here and fail at sync
    /// time instead.
    #[serde(default = "default_enabled_backends")]
    pub enabled: Vec<String>,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_backends(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Upper bound on repositories synced concurrently by a batch run.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReferenceConfig {
    /// Regular expressions for work item references in commit
    /// messages; group 1 (or the whole match) is the token.
    #[serde(default = "default_reference_patterns")]
    pub patterns: Vec<String>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            patterns: default_reference_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("scmsync.db")
}

fn default_enabled_backends() -> Vec<String> {
    vec!["git".to_string()]
}

fn default_workers() -> usize {
    4
}

fn default_reference_patterns() -> Vec<String> {
    crate::refscan::ReferenceScanner::default_patterns()
}

impl Config {
    /// Load from `path`, or from `scmsync.toml` in the working
    /// directory when no path is given, falling back to defaults when
    /// neither exists. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DB_ENV_VAR) {
            if !path.trim().is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
        if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
            if !secret.trim().is_empty() {
                self.secret = secret;
            }
        }
    }

    /// Sync worker count, never zero.
    pub fn workers(&self) -> usize {
        self.sync.workers.max(1)
    }
}
