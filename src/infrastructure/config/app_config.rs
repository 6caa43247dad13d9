//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::infrastructure::image::CellSize;

pub(super) const APP_NAME: &str = "kittyimg";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    #[default]
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI
/// arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Root of the persistent payload cache.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Terminal cell width in pixels.
    #[serde(default)]
    pub cell_width: Option<f32>,

    /// Terminal cell height in pixels.
    #[serde(default)]
    pub cell_height: Option<f32>,

    /// Idle time after which a placement is evicted from the session.
    #[serde(default = "default_eviction_max_age_secs")]
    pub eviction_max_age_secs: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

const fn default_eviction_max_age_secs() -> u64 {
    30 * 60
}

const fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::default(),
            base_dir: None,
            cell_width: None,
            cell_height: None,
            eviction_max_age_secs: default_eviction_max_age_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(base_dir) = &args.base_dir {
            self.base_dir = Some(base_dir.clone());
        }
        if let Some(cell_width) = args.cell_width {
            self.cell_width = Some(cell_width);
        }
        if let Some(cell_height) = args.cell_height {
            self.cell_height = Some(cell_height);
        }
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Returns default payload cache root.
    #[must_use]
    pub fn default_base_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("images"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective payload cache root.
    #[must_use]
    pub fn effective_base_dir(&self) -> Option<PathBuf> {
        self.base_dir.clone().or_else(Self::default_base_dir)
    }

    /// Returns the configured cell size if both dimensions are set and
    /// positive.
    #[must_use]
    pub fn cell_size(&self) -> Option<CellSize> {
        match (self.cell_width, self.cell_height) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some(CellSize::new(w, h)),
            _ => None,
        }
    }

    /// Returns the eviction age as a duration.
    #[must_use]
    pub const fn eviction_max_age(&self) -> Duration {
        Duration::from_secs(self.eviction_max_age_secs)
    }

    /// Returns the HTTP timeout as a duration.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
