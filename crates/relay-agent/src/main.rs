//! # relay-agent
//!
//! Workspace relay binary. Loads settings, opens the event database and
//! starts the HTTP/WebSocket server together with the presence sweeper and
//! the fan-out worker.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_events::{ConnectionConfig, EventStore, SessionStore};
use relay_presence::{PresencePolicy, PresenceRegistry, RetentionPolicy, Sweeper};
use relay_server::{DispatcherConfig, RelayServer, ServerConfig};
use relay_settings::RelaySettings;

/// Workspace change relay.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Workspace change relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` event database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `relay_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<RelaySettings> {
    let mut settings = match &cli.config {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    Ok(settings)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn db_path(settings: &RelaySettings) -> PathBuf {
    settings
        .database
        .path
        .clone()
        .unwrap_or_else(relay_settings::default_db_path)
}

fn connection_config(settings: &RelaySettings) -> ConnectionConfig {
    ConnectionConfig {
        pool_size: settings.database.pool_size,
        busy_timeout_ms: settings.database.busy_timeout_ms,
        ..ConnectionConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    relay_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);

    // Database
    let db_path = db_path(&settings);
    ensure_parent_dir(&db_path)?;
    let pool = relay_events::new_file(&db_path.to_string_lossy(), &connection_config(&settings))
        .context("Failed to open database")?;
    {
        let conn = pool.get().context("Failed to get DB connection")?;
        let applied = relay_events::run_migrations(&conn).context("Failed to run migrations")?;
        tracing::info!(path = %db_path.display(), applied, "database ready");
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    // Core services
    let events = EventStore::new(pool.clone());
    let presence = PresenceRegistry::new(
        SessionStore::new(pool),
        PresencePolicy::from_settings(&settings.presence),
    );
    let sweeper = Sweeper::new(
        presence.clone(),
        events.clone(),
        RetentionPolicy::from_settings(&settings.retention),
        settings.presence.sweep_interval(),
        Duration::from_secs(settings.retention.prune_interval_secs),
    );

    let server = RelayServer::new(
        ServerConfig::from_settings(&settings),
        events,
        presence,
        DispatcherConfig::from_settings(&settings.dispatch),
        settings.publish.retry_config(),
    )
    .with_metrics(metrics);

    let (addr, server_handle) = server.listen().await.context("Failed to bind server")?;
    let sweeper_handle = sweeper.spawn(server.shutdown().token());

    tracing::info!("relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let clean = server
        .shutdown()
        .graceful_shutdown(vec![server_handle, sweeper_handle], None)
        .await;
    if !clean {
        tracing::warn!("background tasks did not stop in time");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
