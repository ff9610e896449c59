use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::{App, BackendHandle};
use crate::config::{AppConfig, ConfigLoader, CONFIG_ENV, SERVER_ENV};
use crate::storage::HttpBackend;

pub mod commands;

use self::commands::{AddArgs, CopyArgs, DeleteArgs, EditArgs, ListArgs};

#[derive(Parser, Debug)]
#[command(
    name = "pintrav",
    version,
    about = "Place, filter and curate travel pins from the terminal"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over PINTRAV_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the server base URL (takes precedence over PINTRAV_SERVER)
    #[arg(long)]
    pub server: Option<String>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive map (default)
    Tui,
    /// Print your pins, or the public ones, after filtering
    List(ListArgs),
    /// Create a pin at a coordinate
    Add(AddArgs),
    /// Change one of your pins
    Edit(EditArgs),
    /// Delete one of your pins
    Delete(DeleteArgs),
    /// Copy a public pin into your own collection
    Copy(CopyArgs),
    /// Print per-status and per-category totals
    Stats,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(server) = &cli.server {
        env::set_var(SERVER_ENV, server);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    let log_target = match command {
        Commands::Tui => LogTarget::File(paths.log_dir.join("pintrav.log")),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, &log_target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = Arc::new(loader.load_or_init()?);
    let backend = http_backend(&config)?;
    tracing::debug!(server = %backend.base_url(), "configured server");

    match command {
        Commands::Tui => {
            let handle = BackendHandle::spawn(backend)?;
            let mut app = App::new(config, handle);
            commands::run_tui(&mut app)
        }
        Commands::List(args) => commands::list_pins(&config, &backend, args),
        Commands::Add(args) => commands::add_pin(&config, &backend, args),
        Commands::Edit(args) => commands::edit_pin(&config, &backend, args),
        Commands::Delete(args) => commands::delete_pin(&config, &backend, args),
        Commands::Copy(args) => commands::copy_pin(&config, &backend, args),
        Commands::Stats => commands::show_stats(&backend),
    }
}

fn http_backend(config: &AppConfig) -> Result<HttpBackend> {
    HttpBackend::new(
        &config.server.base_url,
        config.server.session_cookie.as_deref(),
        config.server.timeout(),
    )
    .with_context(|| format!("connecting to {}", config.server.base_url))
}

enum LogTarget {
    Stderr,
    /// The map owns the terminal, so its logs go to a file.
    File(PathBuf),
}

fn init_tracing(level: &str, target: &LogTarget) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(path) => {
                let file = open_log_file(path)?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
