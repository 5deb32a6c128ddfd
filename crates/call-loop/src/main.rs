//! call-loop: place INVITE/BYE calls between two in-memory endpoints
//!
//! ```bash
//! call-loop --iterations 100 --interval-ms 25
//! call-loop --config call-loop.toml --log-level debug
//! ```

mod config;
mod harness;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rvoip_call_flow::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::HarnessConfig;
use crate::harness::{log_summary, CallLoop};

#[derive(Parser, Debug)]
#[command(name = "call-loop")]
#[command(about = "Loop INVITE/ACK/BYE calls between a caller and a callee", long_about = None)]
struct Args {
    /// TOML file describing the caller, the callee and the loop pacing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of calls to place (0 runs until Ctrl-C)
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Pause between calls, in milliseconds
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Default log level when RUST_LOG is unset
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.interval_ms = interval_ms;
    }

    let calls = CallLoop::new(&config)?;
    info!(
        caller = %calls.caller().identity().address(),
        callee = %calls.callee().identity().address(),
        iterations = config.iterations,
        interval_ms = config.interval_ms,
        "Starting call loop"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            shutdown.cancel();
        }
    });

    let summary = calls.run(&shutdown).await;
    log_summary(&summary);
    println!(
        "{} calls attempted, {} completed, {} INVITE failures, {} BYE failures",
        summary.attempted, summary.completed, summary.invite_failures, summary.bye_failures
    );

    if summary.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
