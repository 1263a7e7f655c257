//! Configuration management for the yield vault.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vault identity
    #[serde(default)]
    pub vault: VaultSettings,
    /// Capital allocation settings
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Lending pool adapter credentials
    #[serde(default)]
    pub lending: LendingConfig,
    /// Service loop parameters
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Symbol of the underlying asset all pool arithmetic is denominated in
    #[serde(default = "default_asset_symbol")]
    pub asset_symbol: String,
    /// Account that holds the admin role at startup
    #[serde(default = "default_admin")]
    pub admin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Portion of idle balance eligible for investment, in basis points
    #[serde(default = "default_investment_ratio_bps")]
    pub investment_ratio_bps: u32,
    /// Minimum deposit size; also the floor below which nothing is invested
    #[serde(default = "default_min_investment_amount")]
    pub min_investment_amount: Decimal,
    /// Cooldown between rebalance cycles (0 = on demand)
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
    /// Whether cumulative active adapter weight is capped at 10000 bps
    #[serde(default = "default_enforce_weight_cap")]
    pub enforce_weight_cap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LendingConfig {
    /// Base URL of the lending pool API
    #[serde(default)]
    pub base_url: String,
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub api_secret: String,
    /// Account identifier the pool tracks our position under
    #[serde(default)]
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between harvest passes
    #[serde(default = "default_harvest_interval_secs")]
    pub harvest_interval_secs: u64,
    /// Seconds between rebalance attempts (the vault's own cooldown still
    /// applies)
    #[serde(default = "default_rebalance_check_interval_secs")]
    pub rebalance_check_interval_secs: u64,
    /// SQLite database path for state snapshots
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_asset_symbol() -> String {
    "USDC".to_string()
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_investment_ratio_bps() -> u32 {
    8000 // keep 20% idle for withdrawals
}

fn default_min_investment_amount() -> Decimal {
    Decimal::new(100, 0) // 100 units
}

fn default_rebalance_interval_secs() -> u64 {
    21_600 // 6 hours
}

fn default_enforce_weight_cap() -> bool {
    true
}

fn default_harvest_interval_secs() -> u64 {
    3_600
}

fn default_rebalance_check_interval_secs() -> u64 {
    600
}

fn default_db_path() -> String {
    "yield_vault.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("VLT"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.allocation.investment_ratio_bps <= 10_000,
            "investment_ratio_bps must be at most 10000"
        );

        anyhow::ensure!(
            self.allocation.min_investment_amount > Decimal::ZERO,
            "min_investment_amount must be positive"
        );

        anyhow::ensure!(
            !self.vault.asset_symbol.is_empty(),
            "asset_symbol must not be empty"
        );

        anyhow::ensure!(!self.vault.admin.is_empty(), "admin must not be empty");

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault: VaultSettings::default(),
            allocation: AllocationConfig::default(),
            lending: LendingConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            asset_symbol: default_asset_symbol(),
            admin: default_admin(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            investment_ratio_bps: default_investment_ratio_bps(),
            min_investment_amount: default_min_investment_amount(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
            enforce_weight_cap: default_enforce_weight_cap(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            harvest_interval_secs: default_harvest_interval_secs(),
            rebalance_check_interval_secs: default_rebalance_check_interval_secs(),
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_over_unit_ratio_rejected() {
        let mut config = Config::default();
        config.allocation.investment_ratio_bps = 10_001;
        assert!(config.validate().is_err());
    }
}
