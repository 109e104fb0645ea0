//! fleetd — the fleetgrid daemon.
//!
//! Single binary that assembles the coordinator:
//! - State store (redb)
//! - Capability catalog
//! - Health policy and status projector
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd serve --config /etc/fleetgrid/fleet.toml --port 8443
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleet_cluster::{Coordinator, StaticReleases};
use fleet_core::FleetConfig;
use fleet_health::{HealthPolicy, StatusProjector};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleetgrid node admission daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the admission API.
    Serve {
        /// Path to fleet.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Published release an upgrade may target. Repeatable; when
        /// omitted every well-formed version is accepted.
        #[arg(long = "release")]
        releases: Vec<String>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the effective configuration and exit.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            releases,
            json_logs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            config.server.json_logs |= json_logs;
            init_tracing(config.server.json_logs);
            serve(config, releases).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleet_cluster=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => FleetConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display())),
        None => Ok(FleetConfig::default()),
    }
}

/// Wire the coordinator from `config`.
fn build_coordinator(
    config: &FleetConfig,
    store: fleet_state::StateStore,
    releases: Vec<String>,
) -> anyhow::Result<Coordinator> {
    let catalog = Arc::new(config.feature_catalog()?);
    let projector = StatusProjector::new(catalog.clone())
        .with_policy(HealthPolicy::from_config(&config.health))
        .with_connection_timeout(config.status.connection_timeout());

    let releases = if releases.is_empty() {
        warn!("no releases configured; any well-formed version is an upgrade target");
        StaticReleases::any()
    } else {
        StaticReleases::new(releases)
    };

    Ok(Coordinator::new(store, catalog)
        .with_projector(projector)
        .with_releases(Arc::new(releases)))
}

async fn serve(config: FleetConfig, releases: Vec<String>) -> anyhow::Result<()> {
    info!("fleetgrid daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("fleet.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = fleet_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let coordinator = build_coordinator(&config, store, releases)?;
    info!(
        connection_timeout_secs = config.status.connection_timeout_secs,
        fail_on_missing_expected = config.health.fail_on_missing_expected,
        "coordinator initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = fleet_api::build_router(Arc::new(coordinator));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("fleetgrid daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_parse() {
        let cli = Cli::try_parse_from([
            "fleetd",
            "serve",
            "--port",
            "9000",
            "--release",
            "v1.15.0",
            "--release",
            "v1.16.0",
        ])
        .unwrap();
        match cli.command {
            Command::Serve { port, releases, .. } => {
                assert_eq!(port, Some(9000));
                assert_eq!(releases, vec!["v1.15.0", "v1.16.0"]);
            }
            Command::Config { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn releases_restrict_upgrade_targets() {
        let store = fleet_state::StateStore::open_in_memory().unwrap();
        let coordinator =
            build_coordinator(&FleetConfig::default(), store, vec!["v1.16.0".into()]).unwrap();
        assert!(coordinator.check_upgrade_eligibility(&[], "v1.16.0").is_ok());
        let err = coordinator
            .check_upgrade_eligibility(&[], "v1.17.0")
            .unwrap_err();
        assert_eq!(err.kind(), fleet_cluster::ErrorKind::NotFound);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/fleet.toml"))).is_err());
        assert_eq!(load_config(None).unwrap().server.port, 8443);
    }
}
