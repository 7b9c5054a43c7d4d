mod analytics;
mod api;
mod auth;
mod config;
mod models;
mod protection;
mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analytics::reporter::AccessReporter;
use crate::api::state::AppState;
use crate::config::defaults::default_admin_password_hash;
use crate::config::settings::Settings;
use crate::protection::geoip::GeoIpLookup;
use crate::storage::sqlite::SqliteStore;

enum Command {
    Serve { config_path: String },
    HashPassword(String),
}

/// Parse CLI flags. `--config <path>` defaults to `config/sitewarden.toml`;
/// `--hash-password <pw>` prints a hash for the admin config and exits.
fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("config/sitewarden.toml");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    config_path = path.clone();
                }
                i += 2;
            }
            "--hash-password" => {
                if let Some(pw) = args.get(i + 1) {
                    return Command::HashPassword(pw.clone());
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    Command::Serve { config_path }
}

/// Initialise the `tracing` subscriber with stdout and a non-blocking file
/// writer. The returned guard must live until shutdown to flush the file.
fn init_tracing(level: &str, log_file: &str) -> Result<WorkerGuard> {
    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .context("Log file path has no file name")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sitewarden=debug", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = match parse_args() {
        Command::HashPassword(pw) => {
            println!("{}", auth::password::hash_password(&pw));
            return Ok(());
        }
        Command::Serve { config_path } => config_path,
    };

    // ---------------------------------------------------------------
    // 1. Configuration and logging
    // ---------------------------------------------------------------
    let settings = Settings::load(&config_path)?;
    let _log_guard = init_tracing(&settings.logging.level, &settings.logging.file)?;

    info!("Starting sitewarden");
    if Path::new(&config_path).exists() {
        info!("Config loaded from {}", config_path);
    } else {
        warn!("Config file {} not found, running on defaults", config_path);
    }

    if settings.admin.password_hash == default_admin_password_hash() {
        warn!("Admin password is the built-in default; set admin.password_hash before exposing this server");
    }

    // ---------------------------------------------------------------
    // 2. Storage
    // ---------------------------------------------------------------
    if let Some(dir) = Path::new(&settings.storage.sqlite_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        }
    }
    let sqlite = Arc::new(
        SqliteStore::new(&settings.storage.sqlite_path)
            .with_context(|| format!("Failed to open {}", settings.storage.sqlite_path))?,
    );
    info!("Storage layer initialised");

    // ---------------------------------------------------------------
    // 3. Request gate and shared state
    // ---------------------------------------------------------------
    let geoip = Arc::new(GeoIpLookup::new(&settings.geoip.country_db));
    if !settings.gate.blocked_countries.is_empty() && !geoip.is_loaded() {
        warn!("Country blocking configured but no GeoIP database is loaded");
    }

    let state = AppState::build(settings, sqlite, geoip)?;
    info!("Request gate initialised");

    // ---------------------------------------------------------------
    // 4. Background reporter
    // ---------------------------------------------------------------
    let reporter = AccessReporter::new(
        state.gate.monitor.clone(),
        state.gate.rate_limiter.clone(),
        state.settings.gate.report_interval_secs,
    );
    let reporter_handle = tokio::spawn(async move {
        reporter.run().await;
    });

    // ---------------------------------------------------------------
    // 5. Serve until Ctrl-C
    // ---------------------------------------------------------------
    let result = api::server::serve(state).await;
    reporter_handle.abort();

    if let Err(ref e) = result {
        error!("Server error: {:#}", e);
    }
    info!("sitewarden shut down");
    result
}
