use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::info;

use vecem_quota::config::QuotaConfig;
use vecem_quota::ratelimit::Sweeper;
use vecem_quota::replay::Replayer;
use vecem_quota::telemetry;

/// Per-user usage limits for the Vecem chat assistant.
#[derive(Debug, Parser)]
#[command(name = "vecem-quota", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// Replay a request log through the configured limiter
    Replay {
        /// Request log to read (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = QuotaConfig::load(cli.config.as_deref())?;
    telemetry::init(&config.logging)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match cli.config.as_deref() {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file given, using defaults and environment"),
    }

    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::Replay { input } => replay(&config, input.as_deref()).await,
    }
}

/// `QuotaConfig::load` has already validated `config`.
fn check_config(config: &QuotaConfig) -> anyhow::Result<()> {
    info!(strategy = ?config.limiter.strategy, "Configuration is valid");
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

async fn replay(config: &QuotaConfig, input: Option<&Path>) -> anyhow::Result<()> {
    let limiter = config.limiter.build()?;
    info!(strategy = ?config.limiter.strategy, "Rate limiter initialized");

    let mut replayer = Replayer::new(limiter.clone());
    let sweeper = if config.sweeper.enabled {
        let settings = config.sweeper.settings()?;
        Some(Sweeper::spawn(limiter.clone(), replayer.clock(), settings))
    } else {
        None
    };

    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = LinesStream::new(BufReader::new(reader).lines());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(line) => {
                    let line = line.context("Failed to read request log")?;
                    if let Some(outcome) = replayer.process(&line) {
                        println!("{}", serde_json::to_string(&outcome)?);
                    }
                }
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    let summary = replayer.summary();
    info!(
        admitted = summary.admitted,
        rejected = summary.rejected,
        malformed = summary.malformed,
        tracked = limiter.tracked(),
        "Replay finished"
    );

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
