//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `GOPHKEEPER_SERVER_*`
//! environment variables, the TOML config file, command-line flags.

use anyhow::Context;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_PREFIX: &str = "GOPHKEEPER_SERVER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub database_url: PathBuf,
    pub log_level: String,
    /// JWT signing secret. A random one is used when unset.
    pub secret_key: Option<String>,
    /// Token lifetime, seconds.
    pub expire_token: u64,
    /// Agent sync period, seconds. Feeds the offline forbidder.
    pub sync_period: u64,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            database_url: PathBuf::from("gophkeeper-server.db"),
            log_level: "info".to_string(),
            secret_key: None,
            expire_token: 86_400,
            sync_period: 600,
            max_body_size: 16 * 1024 * 1024,
        }
    }
}

/// Values from one configuration source. Unset fields fall through to the
/// next source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub database_url: Option<PathBuf>,
    pub log_level: Option<String>,
    pub secret_key: Option<String>,
    pub expire_token: Option<u64>,
    pub sync_period: Option<u64>,
    pub max_body_size: Option<usize>,
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
            secret_key: parse_var(&lookup, "SECRET_KEY")?,
            expire_token: parse_var(&lookup, "EXPIRE_TOKEN")?,
            sync_period: parse_var(&lookup, "SYNC_PERIOD")?,
            max_body_size: parse_var(&lookup, "MAX_BODY_SIZE")?,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

impl ServerConfig {
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
        if let Some(v) = overrides.secret_key {
            self.secret_key = Some(v);
        }
        if let Some(v) = overrides.expire_token {
            self.expire_token = v;
        }
        if let Some(v) = overrides.sync_period {
            self.sync_period = v;
        }
        if let Some(v) = overrides.max_body_size {
            self.max_body_size = v;
        }
    }

    /// Merge every source. A missing config file is skipped.
    pub fn load(file: Option<&Path>, flags: ConfigOverrides) -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply(ConfigOverrides::from_env()?);
        if let Some(path) = file.filter(|p| p.exists()) {
            config.apply(ConfigOverrides::from_file(path)?);
        }
        config.apply(flags);
        Ok(config)
    }

    /// The JWT secret bytes. Tokens signed with a generated secret do not
    /// survive a restart.
    pub fn secret(&self) -> Vec<u8> {
        match &self.secret_key {
            Some(key) if !key.is_empty() => key.as_bytes().to_vec(),
            _ => {
                tracing::warn!("No secret key configured, generating a random one");
                let mut secret = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut secret);
                secret
            }
        }
    }
}
