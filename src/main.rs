use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kittyimg::domain::entities::{DisplayUnit, ImageId, Loader};
use kittyimg::infrastructure::config::{CacheCommand, Command, ShowArgs};
use kittyimg::infrastructure::image::file_loader;
use kittyimg::infrastructure::{
    AppConfig, CellSize, CliArgs, ConfigStore, DisplayManager, HttpImageSource, OsFileSystem,
};

/// Used when neither the config nor the terminal reports a cell size.
const FALLBACK_CELL_SIZE: CellSize = CellSize::new(10.0, 20.0);

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn detect_cell_size(config: &AppConfig) -> CellSize {
    if let Some(cell) = config.cell_size() {
        return cell;
    }

    match crossterm::terminal::window_size() {
        Ok(size) if size.width > 0 && size.height > 0 && size.columns > 0 && size.rows > 0 => {
            let cell = CellSize::new(
                f32::from(size.width) / f32::from(size.columns),
                f32::from(size.height) / f32::from(size.rows),
            );
            debug!(?cell, "Detected terminal cell size");
            cell
        }
        Ok(_) => {
            warn!("Terminal did not report its pixel size, using fallback cell size");
            FALLBACK_CELL_SIZE
        }
        Err(e) => {
            warn!(error = %e, "Failed to query terminal size, using fallback cell size");
            FALLBACK_CELL_SIZE
        }
    }
}

fn create_manager(config: &AppConfig) -> Result<Arc<DisplayManager>> {
    let base_dir = config
        .effective_base_dir()
        .ok_or_else(|| eyre!("failed to determine cache directory, set base_dir"))?;
    debug!(path = %base_dir.display(), "Using payload cache");

    Ok(Arc::new(DisplayManager::new(
        Arc::new(OsFileSystem),
        base_dir,
        detect_cell_size(config),
    )))
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn source_loader(http: &HttpImageSource, source: &str, content_type: Option<String>) -> Loader {
    if !is_url(source) {
        return file_loader(source, content_type);
    }

    let fetch = http.loader(source);
    let Some(content_type) = content_type else {
        return fetch;
    };
    Box::new(move || {
        fetch().map(|mut fetched| {
            fetched.content_type = content_type;
            fetched
        })
    })
}

async fn show(config: &AppConfig, args: ShowArgs) -> Result<()> {
    if args.id.is_some() && args.sources.len() > 1 {
        bail!("--id can only be used with a single source");
    }

    let manager = create_manager(config)?;
    let http = HttpImageSource::new(tokio::runtime::Handle::current(), config.http_timeout())
        .wrap_err("failed to create HTTP client")?;

    let total = args.sources.len();
    let mut failed = 0usize;
    let mut stdout = std::io::stdout();

    for source in &args.sources {
        let id = args
            .id
            .as_deref()
            .map_or_else(|| ImageId::from_url(source), ImageId::new);
        let unit = DisplayUnit {
            id,
            directory: args.directory.clone(),
            is_animated: args.animated,
            right_padding: args.right_padding,
            loader: source_loader(&http, source, args.content_type.clone()),
        };

        let worker = manager.clone();
        let converted = tokio::task::spawn_blocking(move || worker.convert(unit))
            .await
            .wrap_err("conversion task panicked")?;

        match converted {
            Ok(kitty) => {
                if let Some(warning) = &kitty.persist_warning {
                    warn!(source, error = %warning, "Image shown but not cached");
                }
                write!(stdout, "{}{}", kitty.setup_command, kitty.replacement_text)?;
                writeln!(stdout)?;
            }
            Err(e) => {
                error!(source, error = %e, "Failed to display image");
                failed += 1;
            }
        }
    }

    write!(
        stdout,
        "{}",
        manager.cleanup_old_images_command(config.eviction_max_age())
    )?;
    stdout.flush()?;

    if failed > 0 {
        bail!("{failed} of {total} images could not be displayed");
    }
    Ok(())
}

fn cache(config: &AppConfig, command: CacheCommand) -> Result<()> {
    let manager = create_manager(config)?;
    let cache = manager.payload_cache();
    let mut stdout = std::io::stdout().lock();

    match command {
        CacheCommand::Stats { directories } => {
            for directory in &directories {
                let stats = cache.stats(directory)?;
                writeln!(stdout, "{directory}: {stats}")?;
            }
        }
        CacheCommand::Clear { directories } => {
            for directory in &directories {
                cache.clear(directory)?;
                info!(directory, "Cleared cache directory");
                writeln!(stdout, "{directory}: cleared")?;
            }
        }
    }

    Ok(())
}

fn cleanup(config: &AppConfig) -> Result<()> {
    let manager = create_manager(config)?;
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{}", manager.cleanup_all_images_command())?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = kittyimg::VERSION, "Starting kittyimg");

    match args.command {
        Command::Show(show_args) => show(&config, show_args).await,
        Command::Cache(cache_command) => cache(&config, cache_command),
        Command::Cleanup => cleanup(&config),
    }
}
