// SPDX-License-Identifier: GPL-3.0-only

//! Crash Reporter Daemon - watches storage locations for crash dumps
//!
//! The daemon follows the user's privacy settings to decide whether new
//! crash dumps are offered through the crash reporter UI or queued for
//! automatic upload, and keeps duplicate dumps of the same crash in check.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};
use zbus::Connection;

mod adapters;
mod config;
mod contracts;
mod daemon;
mod error;
mod lifelog;
mod monitor;
mod registry;
mod retention;
mod service;
mod settings;
mod timer;

#[cfg(test)]
mod test_support;

use daemon::DaemonController;
use registry::ProcMountProbe;
use service::DbusRegistrar;
use settings::FileSettingsStore;

#[derive(Parser)]
#[command(name = "crash-reporter-daemon")]
#[command(about = "Watches crash dump locations and dispatches new crash reports", long_about = None)]
struct Cli {
    /// Daemon configuration file
    #[arg(long, default_value = "/etc/crash-reporter/daemon.toml")]
    config: PathBuf,

    /// Privacy settings file, overriding the configured one
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Seconds to wait before starting up
    #[arg(long)]
    delay: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crash_service=info,crash_sys=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tracing::info!(
        "Starting Crash Reporter Daemon v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(settings_file) = cli.settings {
        config.settings_file = settings_file;
    }

    let connection = Connection::session()
        .await
        .context("Session bus not available")?;

    let collaborators = adapters::build_dbus_collaborators(&connection, &config.dbus).await?;
    let settings = Box::new(FileSettingsStore::new(config.settings_file.clone()));
    let mut registrar = DbusRegistrar::new(connection, config.dbus.clone());

    let mut controller =
        DaemonController::new(config, settings, collaborators, Arc::new(ProcMountProbe));
    controller
        .run(&mut registrar, cli.delay.map(Duration::from_secs))
        .await
        .context("Daemon startup failed")?;

    tracing::info!("Crash Reporter Daemon stopped");
    Ok(())
}
