//! # courier-relay
//!
//! Courier relay binary: loads settings, opens the account directory and
//! starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use courier_core::SystemClock;
use courier_directory::{ConnectionConfig, SqliteDirectory};
use courier_server::CourierServer;
use courier_settings::CourierSettings;

/// How long in-flight tasks get to finish after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Courier message relay.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier message relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` account database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (default: `~/.courier/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Fold CLI overrides into loaded settings.
    fn apply(&self, settings: &mut CourierSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.directory.db_path = path.to_string_lossy().into_owned();
        }
    }
}

/// Relative database paths live under `home`.
fn resolve_db_path(db_path: &str, home: &Path) -> PathBuf {
    let path = PathBuf::from(db_path);
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_directory(settings: &CourierSettings, home: &Path) -> Result<SqliteDirectory> {
    let db_path = resolve_db_path(&settings.directory.db_path, home);
    ensure_parent_dir(&db_path)?;
    let db_str = db_path.to_string_lossy();
    let pool = courier_directory::new_file(&db_str, &ConnectionConfig::default())
        .context("Failed to open account database")?;
    let directory = SqliteDirectory::open(pool).context("Failed to run directory migrations")?;
    tracing::info!(path = %db_path.display(), "account directory opened");

    match &settings.directory.root_password {
        Some(password) => {
            let _ = directory
                .ensure_root(&settings.directory.root_name, password)
                .context("Failed to bootstrap root account")?;
        }
        None => {
            if directory.count().context("Failed to count accounts")? == 0 {
                tracing::warn!(
                    "account directory is empty and no root password is configured; \
                     nobody can log in"
                );
            }
        }
    }
    Ok(directory)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(courier_settings::settings_path);
    let mut settings = courier_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    courier_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let directory = open_directory(&settings, &courier_settings::courier_home())?;

    let metrics_handle =
        courier_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let server = CourierServer::new(
        settings.server.clone(),
        &settings.relay,
        Arc::new(directory),
        Arc::new(SystemClock),
        metrics_handle,
    );
    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        retention_secs = settings.relay.retention_window_secs,
        "Courier relay listening on ws://{addr}/ws"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["courier"]);
        let mut settings = CourierSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9600);
        assert_eq!(settings.directory.db_path, "courier.db");
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "courier",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--db-path",
            "/tmp/test.db",
        ]);
        let mut settings = CourierSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.directory.db_path, "/tmp/test.db");
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["courier", "--settings", "/etc/courier.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/etc/courier.json")));
    }

    #[test]
    fn relative_db_path_resolves_under_home() {
        let home = Path::new("/home/u/.courier");
        assert_eq!(
            resolve_db_path("courier.db", home),
            PathBuf::from("/home/u/.courier/courier.db")
        );
        assert_eq!(
            resolve_db_path("/var/lib/courier.db", home),
            PathBuf::from("/var/lib/courier.db")
        );
    }

    #[test]
    fn open_directory_bootstraps_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = CourierSettings::default();
        settings.directory.db_path = "nested/courier.db".into();
        settings.directory.root_password = Some("secret".into());

        let directory = open_directory(&settings, dir.path()).unwrap();
        assert_eq!(directory.count().unwrap(), 1);
        assert!(dir.path().join("nested/courier.db").exists());

        // Reopening keeps the single root account.
        drop(directory);
        let directory = open_directory(&settings, dir.path()).unwrap();
        assert_eq!(directory.count().unwrap(), 1);
    }

    #[test]
    fn open_directory_without_root_password() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CourierSettings::default();
        let directory = open_directory(&settings, dir.path()).unwrap();
        assert_eq!(directory.count().unwrap(), 0);
    }
}
