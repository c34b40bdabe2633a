//! Engine configuration.
//!
//! Layered with figment: built-in defaults, then the TOML config file, then
//! `CATALOG_SCAN_*` environment variables (`__` separates nested keys, e.g.
//! `CATALOG_SCAN_RETRY__MAX_ATTEMPTS=5`). CLI flags are applied last by the
//! binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::catalog::database::IN_MEMORY;
use crate::scheduler::SchedulerOptions;
use crate::walker::RetryPolicy;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CATALOG_SCAN_";

/// Errors raised while loading or saving configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be read or has the wrong shape.
    #[error("cannot load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Writing the config file failed.
    #[error("cannot write configuration to {path}: {message}")]
    Save {
        /// Target file
        path: PathBuf,
        /// Reason
        message: String,
    },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite catalog file; `:memory:` for a throwaway catalog. Defaults to
    /// `catalog.db` in the platform data directory.
    pub database: Option<String>,
    /// Scan worker threads.
    pub workers: usize,
    /// Terminal job statuses kept for polling.
    pub retained_statuses: usize,
    /// Depth used for roots registered with `max_depth = 0`.
    pub default_max_depth: u32,
    /// Backoff for transient protocol errors.
    pub retry: RetryPolicy,
    /// Deadline for every job that does not set its own, in seconds.
    pub job_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            workers: 4,
            retained_statuses: 256,
            default_max_depth: 10,
            retry: RetryPolicy::default(),
            job_timeout_secs: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "catalog-scan", "catalog-scan")
}

impl Config {
    /// The platform config file (`config.toml` in the config directory).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The figment stack: defaults, then `file` (or the default config file
    /// if it exists), then the environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let file = file.map(Path::to_path_buf).or_else(Self::default_path);
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the layered configuration.
    ///
    /// # Errors
    ///
    /// Malformed layers or out-of-range values.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(file))
    }

    /// Extract and validate from an explicit figment.
    ///
    /// # Errors
    ///
    /// Malformed layers or out-of-range values.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        log::debug!("Loaded configuration: {config:?}");
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retained_statuses == 0 {
            return Err(ConfigError::Invalid(
                "retained_statuses must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "job_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Where the catalog lives: the configured value, else the platform data
    /// directory, else `catalog.db` in the working directory.
    #[must_use]
    pub fn database_location(&self) -> String {
        if let Some(database) = &self.database {
            return database.clone();
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("catalog.db"))
            .unwrap_or_else(|| PathBuf::from("catalog.db"))
            .to_string_lossy()
            .into_owned()
    }

    /// Whether the catalog is a throwaway in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.database.as_deref() == Some(IN_MEMORY)
    }

    /// Worker pool settings derived from this configuration.
    #[must_use]
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            workers: self.workers,
            retained_statuses: self.retained_statuses,
            retry: self.retry,
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Write this configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Save`] when the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_error = |e: std::io::Error| ConfigError::Save {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(save_error)?;
        }
        fs::write(path, self.to_toml()?).map_err(save_error)
    }
}
