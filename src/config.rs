//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The RPC endpoint is referenced by env-var name in the config and
//! resolved once at startup; nothing below this module reads the
//! environment.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::engine::sync::FailurePolicy;
use crate::types::TraderError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub balances: BalancesConfig,
    pub ledger: LedgerConfig,
    pub allocation: AllocationConfig,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RpcConfig {
    /// Name of the env var holding the endpoint URL.
    pub url_env: String,
    pub max_retries: u32,
    pub backoff_factor: u64,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url_env: "SOLANA_RPC_URL".to_string(),
            max_retries: 3,
            backoff_factor: 2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BalancesConfig {
    pub token_retry_attempts: u32,
    pub token_retry_delay_secs: u64,
    /// Wallets refreshed in flight at once. 1 = strictly sequential.
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for BalancesConfig {
    fn default() -> Self {
        Self {
            token_retry_attempts: 3,
            token_retry_delay_secs: 5,
            concurrency: 1,
            failure_policy: FailurePolicy::KeepPrior,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_dir: PathBuf,
    pub initial_file: String,
    pub working_file: String,
    pub order_file: String,
    pub confirmation_dir: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::from("database"),
            initial_file: "wallet_database_initial.csv".to_string(),
            working_file: "wallet_database.csv".to_string(),
            order_file: "order_table.csv".to_string(),
            confirmation_dir: "trade_confirmation".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn initial_path(&self) -> PathBuf {
        self.database_dir.join(&self.initial_file)
    }

    pub fn working_path(&self) -> PathBuf {
        self.database_dir.join(&self.working_file)
    }

    pub fn order_path(&self) -> PathBuf {
        self.database_dir.join(&self.order_file)
    }

    pub fn confirmation_dir(&self) -> PathBuf {
        self.database_dir.join(&self.confirmation_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AllocationConfig {
    /// Used when the order table has no `delay_seconds` value.
    pub default_delay_seconds: u64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Refresh selected wallets once the executor exits.
    pub resync_after_execution: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["start".to_string()],
            working_dir: PathBuf::from("."),
            resync_after_execution: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, a JSON log file is written here in addition to stdout.
    pub file_dir: Option<PathBuf>,
}

/// Everything the RPC client needs, passed explicitly to its constructor.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub url: SecretString,
    pub max_retries: u32,
    pub backoff_factor: u64,
    pub timeout: Duration,
}

impl RpcSettings {
    pub fn new(url: &str) -> Self {
        let defaults = RpcConfig::default();
        Self {
            url: SecretString::new(url.to_string()),
            max_retries: defaults.max_retries,
            backoff_factor: defaults.backoff_factor,
            timeout: Duration::from_secs(defaults.timeout_secs),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve the RPC endpoint from the environment into explicit settings.
    ///
    /// A missing or blank endpoint is fatal.
    pub fn rpc_settings(&self) -> std::result::Result<RpcSettings, TraderError> {
        let url = std::env::var(&self.rpc.url_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                TraderError::Config(format!(
                    "RPC URL not found in environment variable {}",
                    self.rpc.url_env
                ))
            })?;

        Ok(RpcSettings {
            url: SecretString::new(url),
            max_retries: self.rpc.max_retries,
            backoff_factor: self.rpc.backoff_factor,
            timeout: Duration::from_secs(self.rpc.timeout_secs),
        })
    }
}
