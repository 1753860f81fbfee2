//! FireServer - fire-sensor ingestion, history and realtime dashboard feed.
//!
//! Run with: `cargo run -p fireserver-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fireserver_service::{AppState, Config, HistoryStore, PersistQueue};

/// FireServer - fire-sensor ingestion and realtime dashboard feed.
#[derive(Parser, Debug)]
#[command(name = "fireserver")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server in the foreground (default behavior).
    Run,

    /// Load and validate the configuration, then print the effective settings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => check_config(&args),
        Some(Command::Run) | None => run_server(args).await,
    }
}

/// Load configuration and apply CLI overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }

    config.validate()?;
    Ok(config)
}

fn check_config(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    println!("Configuration OK\n");
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fireserver_service=info".parse()?)
                .add_directive("fireserver_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    let history = HistoryStore::open(&config.storage.path)
        .with_context(|| format!("opening {}", config.storage.path.display()))?;

    let cancel = CancellationToken::new();
    let (persist, writer) =
        PersistQueue::start(history.clone(), config.persistence.clone(), cancel.clone());

    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::new(config, history, persist);
    let app = fireserver_service::app(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    // The writer drains whatever is still queued before it exits.
    cancel.cancel();
    writer.await?;
    info!("Server stopped");

    Ok(())
}
