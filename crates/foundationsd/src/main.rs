//! foundationsd - Identity Foundations backend daemon

use anyhow::Result;
use clap::Parser;
use foundationsd::config::Config;
use foundationsd::server::{self, AppState};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foundationsd", version, about = "Identity Foundations backend")]
struct Args {
    /// Config file (defaults to /etc/foundations/config.toml, then the user config dir)
    #[arg(long, env = "FOUNDATIONS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Write a default config to PATH and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if let Some(path) = args.init_config {
        Config::save_default(&path)?;
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref());
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }

    info!("foundationsd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let state = AppState::from_config(config)?;
    if state.admin_token.is_none() {
        info!("No admin token configured; admin console disabled");
    }
    server::run(state).await
}
