//! wfsync Daemon - Workflow registry syncer for local development
//!
//! Polls a JSON ledger snapshot, fetches artifacts from a directory or HTTP
//! server and keeps one logging engine per active workflow.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wfsync_daemon::{Daemon, DaemonConfig};

/// wfsync Daemon CLI
#[derive(Parser)]
#[command(name = "wfsyncd")]
#[command(about = "wfsync Daemon - Workflow registry reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WFSYNC_CONFIG")]
    config: Option<String>,

    /// Ledger snapshot file
    #[arg(long, env = "WFSYNC_LEDGER_FILE")]
    ledger_file: Option<String>,

    /// Artifact base URL (file:// or http(s)://)
    #[arg(long, env = "WFSYNC_ARTIFACTS_URL")]
    artifacts_url: Option<String>,

    /// Log level
    #[arg(long, env = "WFSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WFSYNC_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Override with CLI args
    if let Some(path) = cli.ledger_file {
        config.ledger.snapshot_path = path.into();
    }
    if let Some(url) = cli.artifacts_url {
        config.artifacts.base_url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    println!(
        r#"
  wfsync - Workflow Registry Syncer
  Version: {}
  Ledger: {}
  Artifacts: {}
  DON: {} {:?}
"#,
        env!("CARGO_PKG_VERSION"),
        config.ledger.snapshot_path.display(),
        config.artifacts.base_url,
        config.don.id,
        config.don.families,
    );

    let daemon = Daemon::new(config).context("failed to build daemon")?;
    daemon.run().await.context("daemon exited with an error")?;
    Ok(())
}
