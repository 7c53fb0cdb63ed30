//! GophKeeper command-line agent.

mod commands;
mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use commands::{describe, summary_line, RecordArgs};
use config::{default_config_path, AgentConfig, ConfigOverrides};
use gophkeeper_core::sync::LoginMode;
use gophkeeper_core::{
    AgentRuntime, AgentStore, KeeperError, Record, SaveOutcome, StoredRecord,
};
use rpassword::prompt_password;
use std::future::Future;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

/// GophKeeper agent: a local, offline-tolerant vault synced with a server
#[derive(Parser)]
#[command(name = "gophkeeper-agent", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server base URL
    #[arg(short, long)]
    address: Option<String>,

    /// Local database path
    #[arg(short, long)]
    database_url: Option<PathBuf>,

    /// Log filter
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds between sync ticks
    #[arg(long)]
    sync_period: Option<u64>,

    /// Account login
    #[arg(short, long)]
    login: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account on the server
    Register,

    /// Add a new record
    Add {
        #[command(subcommand)]
        record: RecordArgs,
    },

    /// Replace the contents of a record
    Edit {
        /// Version to start from when the record is in conflict
        #[arg(long, default_value_t = 0)]
        version: usize,

        #[command(subcommand)]
        record: RecordArgs,
    },

    /// List all records
    List,

    /// Show every version of a record
    Show { name: String },

    /// Delete a record everywhere
    Delete { name: String },

    /// Run one sync tick
    Sync,

    /// Keep syncing in the background until Ctrl+C
    Run,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            address: self.address.clone(),
            database_url: self.database_url.clone(),
            log_level: self.log_level.clone(),
            sync_period: self.sync_period,
            cache_period: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let cfg = AgentConfig::load(&config_path, cli.overrides())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log_level)?)
        .init();

    if let Some(parent) = cfg.database_url.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = AgentStore::open(&cfg.database_url)?;
    let mut runtime = AgentRuntime::new(cfg.runtime(), store)?;

    let mut master_password = prompt_password("Master password: ")?;
    let signed_in = match cli.command {
        Commands::Register => runtime
            .client
            .sign_up(&cli.login, &master_password)
            .await
            .map(|_| LoginMode::Online),
        _ => runtime
            .client
            .sign_in(&cli.login, &master_password)
            .await
            .map(|(_, mode)| mode),
    };
    master_password.zeroize();

    match signed_in? {
        LoginMode::Online => info!("Signed in as {}", cli.login),
        LoginMode::Offline => warn!("Server unreachable, working offline"),
    }

    let result = run_command(&mut runtime, cli.command).await;
    runtime.session.clear().await;
    result
}

async fn run_command(runtime: &mut AgentRuntime, command: Commands) -> Result<()> {
    match command {
        Commands::Register => println!("Account created"),
        Commands::Add { record } => {
            let (name, meta, value) = record.into_parts()?;
            let record = Record::new(name, meta, &value)?;
            let outcome = with_pull_retry(runtime, || runtime.vault.save_plain(&record)).await?;
            report_save(&record.name, outcome);
        }
        Commands::Edit { version, record } => {
            let base = current_version(runtime, record.name(), version).await?;
            let (_, meta, value) = record.into_parts()?;
            let edited = base.edited(meta, &value)?;
            let outcome = with_pull_retry(runtime, || runtime.vault.edit_plain(&edited)).await?;
            report_save(&edited.name, outcome);
        }
        Commands::List => {
            let snapshot = runtime.cache.refresh().await?;
            if snapshot.records.is_empty() {
                println!("No records");
            }
            for record in &snapshot.records {
                println!("{}", summary_line(record));
            }
        }
        Commands::Show { name } => {
            let snapshot = runtime.cache.refresh().await?;
            let Some(record) = snapshot.get(&name) else {
                bail!("No record named {:?}", name);
            };
            for (i, version) in record.versions.iter().enumerate() {
                if record.versions.len() > 1 {
                    println!("--- version {} ---", i);
                }
                print!("{}", describe(version)?);
            }
        }
        Commands::Delete { name } => {
            if with_pull_retry(runtime, || runtime.vault.delete(&name)).await? {
                println!("Deleted {:?}", name);
            } else {
                println!("No record named {:?}", name);
            }
        }
        Commands::Sync => {
            let mut shutdown = runtime.child_trigger().subscribe();
            let report = runtime.reconciler.tick(&mut shutdown).await?;
            println!(
                "pushed {}, conflicts {}, pulled {}, pruned {}",
                report.pushed, report.conflicts, report.pulled, report.pruned
            );
            let quarantined = runtime.reconciler.quarantined();
            if !quarantined.is_empty() {
                println!("needs attention: {}", quarantined.join(", "));
            }
        }
        Commands::Run => {
            runtime.start();
            println!("Syncing every {:?}. Press Ctrl+C to exit.", runtime.config.sync_period);
            signal::ctrl_c().await?;
            info!("Shutdown signal received");
            runtime.shutdown().await;
        }
    }
    Ok(())
}

/// The decrypted version of `name` an edit starts from.
async fn current_version(runtime: &AgentRuntime, name: &str, version: usize) -> Result<Record> {
    let user_id = runtime.session.user_id().await?;
    let StoredRecord {
        versions, status, ..
    } = runtime
        .store
        .get(user_id, name)?
        .with_context(|| format!("No record named {:?}", name))?;
    let encrypted = versions
        .get(version)
        .with_context(|| format!("{:?} has {} version(s)", name, versions.len()))?;
    Ok(runtime.vault.decrypt(encrypted, status).await?)
}

/// Run a record operation; if the server wants a pull first, run one sync
/// tick and try once more.
async fn with_pull_retry<T, F, Fut>(runtime: &AgentRuntime, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = gophkeeper_core::Result<T>>,
{
    match op().await {
        Err(KeeperError::Forbidden) => {
            warn!("Server requires a sync first");
            let mut shutdown = runtime.child_trigger().subscribe();
            runtime.reconciler.tick(&mut shutdown).await?;
            Ok(op().await?)
        }
        other => Ok(other?),
    }
}

fn report_save(name: &str, outcome: SaveOutcome) {
    match outcome {
        SaveOutcome::Synced => println!("Saved {:?}", name),
        SaveOutcome::StoredLocally => {
            println!("Saved {:?} locally; it will sync when the server is reachable", name)
        }
    }
}
