//! REST lending-pool adapter.
//!
//! Integrates an external lending pool over its HTTP API. Account-scoped
//! operations are authenticated with an API key header and an HMAC-SHA256
//! signature over the query string; pool statistics are public.

use crate::adapter::YieldAdapter;
use crate::utils::decimal::floor_mul_div;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Connection settings for one lending pool.
#[derive(Debug, Clone)]
pub struct LendingPoolConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Account identifier the pool tracks our position under.
    pub account: String,
}

/// Account snapshot returned by the pool.
#[derive(Debug, Clone, Deserialize)]
struct AccountResponse {
    #[serde(with = "rust_decimal::serde::str")]
    assets: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    shares: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pending_rewards: Decimal,
    active: bool,
}

#[derive(Debug, Deserialize)]
struct DepositResponse {
    #[serde(with = "rust_decimal::serde::str")]
    shares: Decimal,
}

#[derive(Debug, Deserialize)]
struct WithdrawResponse {
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct HarvestResponse {
    #[serde(with = "rust_decimal::serde::str")]
    reward: Decimal,
}

#[derive(Debug, Deserialize)]
struct PoolStatsResponse {
    #[serde(with = "rust_decimal::serde::str")]
    apy_bps: Decimal,
}

/// Adapter wrapping a REST lending pool.
#[derive(Debug, Clone)]
pub struct LendingPoolAdapter {
    name: String,
    config: LendingPoolConfig,
    http: Client,
}

impl LendingPoolAdapter {
    pub fn new(name: &str, config: LendingPoolConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            config,
            http,
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// Build a signed query string: caller-supplied params plus account,
    /// timestamp, and signature.
    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "account={}&timestamp={}",
            urlencoding::encode(&self.config.account),
            Self::timestamp()
        ));
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}?{}", self.config.base_url, path, self.signed_query(params));
        let response = self
            .http
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Lending pool error {status} on {path}: {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {path}"))
    }

    #[instrument(skip(self), fields(adapter = %self.name))]
    async fn get_account(&self) -> Result<AccountResponse> {
        let url = format!(
            "{}/v1/account?{}",
            self.config.base_url,
            self.signed_query(&[])
        );
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .context("Failed to fetch account")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Lending pool error {status} on /v1/account: {body}");
        }

        let account: AccountResponse =
            response.json().await.context("Failed to parse account")?;
        debug!(assets = %account.assets, shares = %account.shares, "Fetched account");
        Ok(account)
    }
}

#[async_trait]
impl YieldAdapter for LendingPoolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(adapter = %self.name))]
    async fn deposit(&self, amount: Decimal) -> Result<Decimal> {
        let response: DepositResponse = self
            .post_signed("/v1/deposit", &[("amount", amount.to_string())])
            .await?;
        Ok(response.shares)
    }

    #[instrument(skip(self), fields(adapter = %self.name))]
    async fn withdraw(&self, shares: Decimal) -> Result<Decimal> {
        let response: WithdrawResponse = self
            .post_signed("/v1/withdraw", &[("shares", shares.to_string())])
            .await?;
        Ok(response.amount)
    }

    #[instrument(skip(self), fields(adapter = %self.name))]
    async fn harvest(&self) -> Result<Decimal> {
        let response: HarvestResponse = self.post_signed("/v1/harvest", &[]).await?;
        Ok(response.reward)
    }

    #[instrument(skip(self), fields(adapter = %self.name))]
    async fn emergency_exit(&self) -> Result<Decimal> {
        let response: WithdrawResponse = self.post_signed("/v1/emergency-exit", &[]).await?;
        Ok(response.amount)
    }

    async fn total_assets(&self) -> Result<Decimal> {
        Ok(self.get_account().await?.assets)
    }

    async fn total_shares(&self) -> Result<Decimal> {
        Ok(self.get_account().await?.shares)
    }

    async fn convert_to_shares(&self, amount: Decimal) -> Result<Decimal> {
        let account = self.get_account().await?;
        if account.shares == Decimal::ZERO || account.assets == Decimal::ZERO {
            return Ok(amount);
        }
        Ok(floor_mul_div(amount, account.shares, account.assets))
    }

    async fn convert_to_assets(&self, shares: Decimal) -> Result<Decimal> {
        let account = self.get_account().await?;
        if account.shares == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        Ok(floor_mul_div(shares, account.assets, account.shares))
    }

    async fn apy_bps(&self) -> Result<Decimal> {
        let url = format!("{}/v1/pool/stats", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch pool stats")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Lending pool error {status} on /v1/pool/stats");
        }

        let stats: PoolStatsResponse =
            response.json().await.context("Failed to parse pool stats")?;
        Ok(stats.apy_bps)
    }

    async fn pending_rewards(&self) -> Result<Decimal> {
        Ok(self.get_account().await?.pending_rewards)
    }

    async fn is_active(&self) -> Result<bool> {
        Ok(self.get_account().await?.active)
    }
}
