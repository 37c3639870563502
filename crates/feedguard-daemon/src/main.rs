//! Feedguard daemon binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use feedguard_core::config::FeedguardConfig;
use feedguard_daemon::Daemon;

/// Feedguard — security feed digester and defense updater.
#[derive(Parser, Debug)]
#[command(name = "feedguard", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "~/.config/feedguard/config.toml")]
    config: String,

    /// Run one immediate digest + IOC cycle and exit instead of entering
    /// the scheduling loop.
    #[arg(long)]
    once: bool,

    /// Re-apply every stored indicator to the enabled defense mechanisms,
    /// then exit.
    #[arg(long, conflicts_with = "once")]
    resync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_env("FEEDGUARD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = expand_tilde(&args.config);
    tracing::info!(config = %config_path.display(), "feedguard starting");

    let config = FeedguardConfig::load(&config_path).context("loading configuration")?;
    let daemon = Daemon::new(config).context("initializing daemon")?;

    if args.resync {
        daemon.resync().await
    } else if args.once {
        daemon.run_once().await
    } else {
        daemon.run().await
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        return PathBuf::from("/tmp").join(rest);
    }
    PathBuf::from(path)
}
