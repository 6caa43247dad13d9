use super::app_config::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default cache directory for `show` and `cache stats`.
pub const DEFAULT_DIRECTORY: &str = "default";

#[derive(Debug, Parser)]
#[command(
    name = "kittyimg",
    version,
    about = "Display images inline in kitty-compatible terminals",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Root of the persistent payload cache.
    #[arg(long, value_name = "PATH", global = true)]
    pub base_dir: Option<PathBuf>,

    /// Terminal cell width in pixels.
    #[arg(long, value_name = "PX", global = true)]
    pub cell_width: Option<f32>,

    /// Terminal cell height in pixels.
    #[arg(long, value_name = "PX", global = true)]
    pub cell_height: Option<f32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the commands and placeholder text displaying each source.
    Show(ShowArgs),

    /// Inspect or purge the payload cache.
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Print the command deleting every image from the terminal.
    Cleanup,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Logical image id. Defaults to a hash of the source. Only valid with a
    /// single source.
    #[arg(long)]
    pub id: Option<String>,

    /// Cache directory (image category).
    #[arg(long, default_value = DEFAULT_DIRECTORY)]
    pub directory: String,

    /// Decode every frame of animated GIF, WebP and AVIF images.
    #[arg(long)]
    pub animated: bool,

    /// Content type overriding the server header or file extension.
    #[arg(long, value_name = "MIME")]
    pub content_type: Option<String>,

    /// Transparent pixels appended to the right of each frame.
    #[arg(long, value_name = "PX", default_value_t = 0)]
    pub right_padding: u32,

    /// Image URLs or file paths.
    #[arg(required = true, value_name = "SOURCE")]
    pub sources: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print size and entry counts of cache directories.
    Stats {
        /// Cache directories to summarize.
        #[arg(long = "directory", default_values_t = [DEFAULT_DIRECTORY.to_string()])]
        directories: Vec<String>,
    },

    /// Delete cache directories.
    Clear {
        /// Cache directories to delete.
        #[arg(long = "directory", required = true)]
        directories: Vec<String>,
    },
}
