//! GophKeeper server binary.

use clap::Parser;
use gophkeeper_server::{build_router, AppState, ConfigOverrides, ServerConfig, ServerStorage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gophkeeper-server", about = "GophKeeper secrets server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gophkeeper-server.toml")]
    config: PathBuf,

    /// Listen address
    #[arg(short, long)]
    address: Option<String>,

    /// SQLite database path
    #[arg(short, long)]
    database_url: Option<PathBuf>,

    /// Log filter, e.g. `info` or `gophkeeper_server=debug`
    #[arg(short, long)]
    log_level: Option<String>,

    /// JWT signing secret
    #[arg(short, long)]
    secret_key: Option<String>,

    /// Token lifetime in seconds
    #[arg(short, long)]
    expire_token: Option<u64>,

    /// Agent sync period in seconds
    #[arg(long)]
    sync_period: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            address: self.address.clone(),
            database_url: self.database_url.clone(),
            log_level: self.log_level.clone(),
            secret_key: self.secret_key.clone(),
            expire_token: self.expire_token,
            sync_period: self.sync_period,
            max_body_size: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = ServerConfig::load(Some(cli.config.as_path()), cli.overrides())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log_level)?)
        .init();

    tracing::info!("Starting GophKeeper server on {}", cfg.address);

    let storage = ServerStorage::open(&cfg.database_url)?;
    let state = AppState::new(storage, &cfg);
    let app = build_router(state, &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
