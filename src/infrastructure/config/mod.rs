//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, LogLevel};
pub use args::{CacheCommand, CliArgs, Command, DEFAULT_DIRECTORY, ShowArgs};
pub use storage::{ConfigError, ConfigStore};
