//! Infrastructure layer with adapters for the filesystem, network and terminal
//! graphics protocol.

/// Application configuration.
pub mod config;
/// Filesystem adapters.
pub mod fs;
/// Image decoding, caching and display.
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, ConfigStore, LogLevel};
pub use fs::{MemoryFileSystem, OsFileSystem};
pub use self::image::{CellSize, DisplayManager, HttpImageSource, PayloadCacheStats};
