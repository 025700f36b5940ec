use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqharvest::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "seqharvest",
    version,
    about = "Distributed harvester for sequence-numbered Dota 2 match records",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "SEQHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator: batch allocation, demand monitor and worker API
    Coordinator {
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<u64>,

        /// Override the HTTP bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a harvesting worker
    Worker {
        /// Override the worker identity
        #[arg(long)]
        identity: Option<String>,
    },

    /// Persist harvested records from the matches topic
    Store,

    /// Manage worker credentials
    Workers {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Print the effective configuration with secrets masked
    ShowConfig,
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Provision a worker, replacing its secret if it exists
    Add {
        identity: String,

        /// Shared secret; read from WORKER_SECRET when omitted
        #[arg(env = "WORKER_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// List provisioned workers
    List,

    /// Remove a worker
    Revoke { identity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;

    if let Err(e) = seqharvest::metrics::init_metrics() {
        tracing::warn!("Failed to initialize metrics: {}", e);
    }

    match cli.command {
        Commands::Coordinator { batch_size, bind } => {
            if let Some(size) = batch_size {
                config.coordinator.batch_size = size;
            }
            if let Some(bind) = bind {
                config.coordinator.bind_address = bind;
            }
            config.validate()?;
            tracing::info!(
                bind = %config.coordinator.bind_address,
                batch_size = config.coordinator.batch_size,
                "Starting coordinator command"
            );
            commands::coordinator(config, shutdown_token()).await?;
        }

        Commands::Worker { identity } => {
            if let Some(identity) = identity {
                config.worker.identity = identity;
            }
            config.validate()?;
            tracing::info!(identity = %config.worker.identity, "Starting worker command");
            commands::worker(config, shutdown_token()).await?;
        }

        Commands::Store => {
            config.validate()?;
            tracing::info!(records = %config.storage.records_path.display(), "Starting store command");
            commands::store(config, shutdown_token()).await?;
        }

        Commands::Workers { action } => match action {
            WorkerAction::Add { identity, secret } => {
                commands::add_worker(&config, &identity, &secret)?
            }
            WorkerAction::List => commands::list_workers(&config)?,
            WorkerAction::Revoke { identity } => commands::revoke_worker(&config, &identity)?,
        },

        Commands::ShowConfig => println!("{}", config.display()),
    }

    Ok(())
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    commands::spawn_shutdown_listener(token.clone());
    token
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("seqharvest=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("seqharvest={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
