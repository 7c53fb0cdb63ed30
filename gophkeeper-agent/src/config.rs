//! Agent configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `GOPHKEEPER_CLIENT_*`
//! environment variables, the TOML config file, command-line flags.

use anyhow::Context;
use gophkeeper_core::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "GOPHKEEPER_CLIENT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Server base URL.
    pub address: String,
    pub database_url: PathBuf,
    pub log_level: String,
    /// Seconds between reconciliation ticks.
    pub sync_period: u64,
    /// Seconds between plaintext cache refreshes.
    pub cache_period: u64,
}

/// `<data dir>/gophkeeper`, or the working directory if the platform has
/// no data dir.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("gophkeeper"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("gophkeeper").join("agent.toml"))
        .unwrap_or_else(|| PathBuf::from("gophkeeper-agent.toml"))
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8080".to_string(),
            database_url: data_dir().join("agent.db"),
            log_level: "warn".to_string(),
            sync_period: 600,
            cache_period: 5,
        }
    }
}

/// Values from one configuration source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub database_url: Option<PathBuf>,
    pub log_level: Option<String>,
    pub sync_period: Option<u64>,
    pub cache_period: Option<u64>,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{ENV_PREFIX}{key}");
    lookup(&name)
        .map(|v| v.parse().with_context(|| format!("Invalid {name}: {v:?}")))
        .transpose()
}

impl ConfigOverrides {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            address: parse_var(&lookup, "ADDRESS")?,
            database_url: parse_var(&lookup, "DATABASE_URL")?,
            log_level: parse_var(&lookup, "LOG_LEVEL")?,
            sync_period: parse_var(&lookup, "SYNC_PERIOD")?,
            cache_period: parse_var(&lookup, "CACHE_PERIOD")?,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

impl AgentConfig {
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.address {
            self.address = v;
        }
        if let Some(v) = overrides.database_url {
            self.database_url = v;
        }
        if let Some(v) = overrides.log_level {
            self.log_level = v;
        }
        if let Some(v) = overrides.sync_period {
            self.sync_period = v;
        }
        if let Some(v) = overrides.cache_period {
            self.cache_period = v;
        }
    }

    /// Merge every source. A missing config file is skipped.
    pub fn load(file: &Path, flags: ConfigOverrides) -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply(ConfigOverrides::from_env()?);
        if file.exists() {
            config.apply(ConfigOverrides::from_file(file)?);
        }
        config.apply(flags);
        if config.sync_period == 0 || config.cache_period == 0 {
            anyhow::bail!("sync_period and cache_period must be positive");
        }
        Ok(config)
    }

    pub fn runtime(&self) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::new(self.address.trim_end_matches('/'));
        runtime.sync_period = Duration::from_secs(self.sync_period);
        runtime.cache_period = Duration::from_secs(self.cache_period);
        runtime
    }
}
