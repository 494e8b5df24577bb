//! scribed — the ScribeGrid daemon.
//!
//! Single binary that assembles the ScribeGrid subsystems:
//! - State store (redb)
//! - Job orchestrator (placement + assignment)
//! - Status sweeper
//! - Reconciler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! scribed serve --config /etc/scribegrid/scribed.toml --port 8080
//! scribed seed --from ./fixtures --data-dir /var/lib/scribegrid
//! ```

mod config;
mod seed;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use config::DaemonConfig;
use scribegrid_api::{ApiState, build_router};
use scribegrid_state::StateStore;

#[derive(Parser)]
#[command(name = "scribed", about = "ScribeGrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run the background sweeper and reconciler.
    Serve {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Replace the store content with users.json, servers.json, and jobs.json.
    Seed {
        /// Directory holding the JSON fixture files.
        #[arg(long)]
        from: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/scribegrid")]
        data_dir: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,scribed=debug,scribegrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let config = DaemonConfig::load(config.as_deref())?.with_overrides(port, data_dir);
            run_serve(config).await
        }
        Command::Seed { from, data_dir } => {
            std::fs::create_dir_all(&data_dir)?;
            let db_path = data_dir.join("scribegrid.redb");
            let store = StateStore::open(&db_path)?;
            info!(path = ?db_path, from = ?from, "seeding state store");
            seed::seed(&store, &from)?;
            Ok(())
        }
    }
}

async fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("ScribeGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let sweep_interval = config.sweeper.interval();
    let reconcile_interval = config.sweeper.reconcile_interval();
    let state = ApiState::new(store, config.scheduler, config.sweeper);
    info!(
        placement = ?state.orchestrator.balancer().policy(),
        job_duration_secs = state.orchestrator.config().job_duration_secs,
        "orchestrator initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_shutdown = shutdown_rx.clone();
    let reconcile_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let sweeper = state.orchestrator.sweeper().clone();
    let sweep_handle = tokio::spawn(async move {
        sweeper.run(sweep_interval, sweep_shutdown).await;
    });

    let reconciler = state.reconciler.clone();
    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(reconcile_interval, reconcile_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for CTRL+C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = sweep_handle.await;
    let _ = reconcile_handle.await;

    info!("ScribeGrid daemon stopped");
    Ok(())
}
