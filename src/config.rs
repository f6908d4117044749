//! Configuration management for the transaction scheduler
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{SchedulerError, SchedulerResult};
use crate::tx::gas::FeeBumper;

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GWEI: u64 = 1_000_000_000;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transaction: TxDefaults,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub expected_chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
        }
    }
}

/// Construction-time parameters of a `NonceScheduler`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of sent-but-unconfirmed transactions
    pub max_pending_window: u64,
    /// Interval between stuck-monitor ticks
    pub poll_interval_seconds: u64,
    /// Consecutive unchanged ticks before the lowest unmined nonce counts as stuck
    pub stuck_after_n_polls: u32,
    /// Fee multiplier applied to the base fee for each replacement attempt
    pub bump_multiplier: f64,
    pub max_replacement_attempts: u32,
    pub replacement_gas_limit: u64,
    /// Base fee assumed when the latest block does not report one (wei)
    pub default_base_fee: u64,
    pub receipt_timeout_seconds: u64,
    pub receipt_poll_interval_ms: u64,
    /// Submit `send_wait()` transactions through `realtime_sendRawTransaction`
    pub realtime_send: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pending_window: 500,
            poll_interval_seconds: 10,
            stuck_after_n_polls: 3,
            bump_multiplier: 2.0,
            max_replacement_attempts: 3,
            replacement_gas_limit: 21_000,
            default_base_fee: 10 * GWEI,
            receipt_timeout_seconds: 10,
            receipt_poll_interval_ms: 250,
            realtime_send: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_pending_window == 0 {
            return Err(SchedulerError::Config(
                "max_pending_window must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(SchedulerError::Config(
                "poll_interval_seconds must be positive".to_string(),
            ));
        }
        if self.stuck_after_n_polls == 0 {
            return Err(SchedulerError::Config(
                "stuck_after_n_polls must be at least 1".to_string(),
            ));
        }
        FeeBumper::new(self.bump_multiplier)?;
        if self.max_replacement_attempts == 0 {
            return Err(SchedulerError::Config(
                "max_replacement_attempts must be at least 1".to_string(),
            ));
        }
        if self.replacement_gas_limit < 21_000 {
            return Err(SchedulerError::Config(
                "replacement_gas_limit must cover a plain transfer (21000)".to_string(),
            ));
        }
        if self.receipt_timeout_seconds == 0 {
            return Err(SchedulerError::Config(
                "receipt_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.receipt_poll_interval_ms == 0 {
            return Err(SchedulerError::Config(
                "receipt_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// Per-operation transaction parameter overrides
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TxOverrides {
    pub gas: Option<u64>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub value: Option<U256>,
    /// Explicit same-nonce replacement of an already sent transaction
    pub nonce: Option<u64>,
}

impl TxOverrides {
    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn max_fee_per_gas(mut self, fee: impl Into<U256>) -> Self {
        self.max_fee_per_gas = Some(fee.into());
        self
    }

    pub fn max_priority_fee_per_gas(mut self, fee: impl Into<U256>) -> Self {
        self.max_priority_fee_per_gas = Some(fee.into());
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Merge with defaults, producing the final parameters
    pub fn resolve(&self, defaults: &TxDefaults) -> SchedulerResult<ResolvedTxParams> {
        let params = ResolvedTxParams {
            gas: self.gas.unwrap_or(defaults.gas),
            max_fee_per_gas: self.max_fee_per_gas.unwrap_or(defaults.max_fee_per_gas),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .unwrap_or(defaults.max_priority_fee_per_gas),
            value: self.value.unwrap_or(defaults.value),
        };
        params.validate()?;
        Ok(params)
    }
}

/// Fallback transaction parameters for fields an operation leaves unset
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TxDefaults {
    pub gas: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub value: U256,
}

impl Default for TxDefaults {
    fn default() -> Self {
        Self {
            gas: 1_000_000_000,
            max_fee_per_gas: U256::from(5 * GWEI),
            max_priority_fee_per_gas: U256::zero(),
            value: U256::zero(),
        }
    }
}

impl TxDefaults {
    pub fn validate(&self) -> SchedulerResult<()> {
        ResolvedTxParams {
            gas: self.gas,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            value: self.value,
        }
        .validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTxParams {
    pub gas: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub value: U256,
}

impl ResolvedTxParams {
    fn validate(&self) -> SchedulerResult<()> {
        if self.gas == 0 {
            return Err(SchedulerError::Config("gas must be positive".to_string()));
        }
        if self.max_priority_fee_per_gas > self.max_fee_per_gas {
            return Err(SchedulerError::Config(format!(
                "max_priority_fee_per_gas {} exceeds max_fee_per_gas {}",
                self.max_priority_fee_per_gas, self.max_fee_per_gas
            )));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("EVM_TX_SCHEDULER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be configured");
        }
        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }

        self.scheduler.validate()?;
        self.transaction.validate()?;

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
