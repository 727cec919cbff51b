use std::path::PathBuf;
use std::time::Duration;

use crate::checkpoint::CheckpointStoreArguments;

const IN_MEMORY_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse env var {key}={value}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// SQLite URL for the checkpoint database
    pub database_url: String,
    /// Registry catalog override; the built-in catalog is used when unset
    pub registry_path: Option<PathBuf>,
    /// Default for runs started without an explicit revision flag
    pub enable_revision: bool,
    /// Overrides the catalog's revision extension
    pub revision_extension: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: IN_MEMORY_DATABASE_URL.to_string(),
            registry_path: None,
            enable_revision: false,
            revision_extension: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env_str(&lookup, "ORCHESTRATOR_DATABASE_URL", &defaults.database_url),
            registry_path: lookup("ORCHESTRATOR_REGISTRY_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            enable_revision: env_parse(&lookup, "ORCHESTRATOR_ENABLE_REVISION", false)?,
            revision_extension: env_opt::<u64>(&lookup, "ORCHESTRATOR_REVISION_EXTENSION_MS")?
                .map(Duration::from_millis),
            log_format: env_parse(&lookup, "ORCHESTRATOR_LOG_FORMAT", LogFormat::Pretty)?,
        })
    }

    /// Map the database URL onto checkpoint actor arguments.
    ///
    /// `sqlite::memory:` (or `:memory:`) selects an in-memory database; any
    /// other value is a file path with an optional `sqlite:` / `sqlite://`
    /// prefix.
    pub fn checkpoint_arguments(&self) -> CheckpointStoreArguments {
        let url = self.database_url.trim();
        if url == IN_MEMORY_DATABASE_URL || url == ":memory:" {
            return CheckpointStoreArguments::InMemory;
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        CheckpointStoreArguments::File(path.to_string())
    }
}

fn env_str(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    Ok(env_opt(lookup, key)?.unwrap_or(default))
}

fn env_opt<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: val.clone(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}
