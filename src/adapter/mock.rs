//! Mock yield adapter for tests and paper runs.

use crate::adapter::YieldAdapter;
use crate::utils::decimal::floor_mul_div;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Simulated strategy state.
#[derive(Debug, Clone)]
pub struct MockStrategyState {
    pub assets: Decimal,
    pub shares: Decimal,
    pub pending_rewards: Decimal,
    pub apy_bps: Decimal,
    pub active: bool,
    // Failure injection
    pub fail_deposits: bool,
    pub fail_withdrawals: bool,
    pub fail_harvest: bool,
    pub fail_emergency_exit: bool,
    pub fail_queries: bool,
    // Call counters
    pub deposit_calls: u32,
    pub withdraw_calls: u32,
    pub harvest_calls: u32,
}

impl Default for MockStrategyState {
    fn default() -> Self {
        Self {
            assets: Decimal::ZERO,
            shares: Decimal::ZERO,
            pending_rewards: Decimal::ZERO,
            apy_bps: dec!(500), // 5% APY
            active: true,
            fail_deposits: false,
            fail_withdrawals: false,
            fail_harvest: false,
            fail_emergency_exit: false,
            fail_queries: false,
            deposit_calls: 0,
            withdraw_calls: 0,
            harvest_calls: 0,
        }
    }
}

/// Mock adapter that simulates an external yield strategy.
///
/// Shares price 1:1 on an empty strategy; `accrue_yield` raises the asset
/// total without minting shares, shifting the conversion rate the way real
/// yield does.
pub struct MockAdapter {
    name: String,
    state: Arc<RwLock<MockStrategyState>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(MockStrategyState::default())),
        }
    }

    /// Simulate yield: assets grow, shares stay put.
    pub async fn accrue_yield(&self, amount: Decimal) {
        let mut state = self.state.write().await;
        state.assets += amount;
        debug!(adapter = %self.name, %amount, "Accrued simulated yield");
    }

    /// Queue rewards to be returned by the next harvest.
    pub async fn set_pending_rewards(&self, amount: Decimal) {
        self.state.write().await.pending_rewards = amount;
    }

    pub async fn set_apy_bps(&self, apy_bps: Decimal) {
        self.state.write().await.apy_bps = apy_bps;
    }

    pub async fn set_active(&self, active: bool) {
        self.state.write().await.active = active;
    }

    pub async fn fail_deposits(&self, fail: bool) {
        self.state.write().await.fail_deposits = fail;
    }

    pub async fn fail_withdrawals(&self, fail: bool) {
        self.state.write().await.fail_withdrawals = fail;
    }

    pub async fn fail_harvest(&self, fail: bool) {
        self.state.write().await.fail_harvest = fail;
    }

    pub async fn fail_emergency_exit(&self, fail: bool) {
        self.state.write().await.fail_emergency_exit = fail;
    }

    /// Make every query (valuation, health, APY) fail.
    pub async fn fail_queries(&self, fail: bool) {
        self.state.write().await.fail_queries = fail;
    }

    /// Current simulated state, for assertions.
    pub async fn state(&self) -> MockStrategyState {
        self.state.read().await.clone()
    }

    fn to_shares(state: &MockStrategyState, amount: Decimal) -> Decimal {
        if state.shares == Decimal::ZERO || state.assets == Decimal::ZERO {
            amount
        } else {
            floor_mul_div(amount, state.shares, state.assets)
        }
    }

    fn to_assets(state: &MockStrategyState, shares: Decimal) -> Decimal {
        if state.shares == Decimal::ZERO {
            Decimal::ZERO
        } else {
            floor_mul_div(shares, state.assets, state.shares)
        }
    }
}

#[async_trait]
impl YieldAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deposit(&self, amount: Decimal) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.deposit_calls += 1;
        if state.fail_deposits {
            bail!("{}: deposit rejected", self.name);
        }
        let shares = Self::to_shares(&state, amount);
        state.assets += amount;
        state.shares += shares;
        Ok(shares)
    }

    async fn withdraw(&self, shares: Decimal) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.withdraw_calls += 1;
        if state.fail_withdrawals {
            bail!("{}: withdrawal rejected", self.name);
        }
        if shares > state.shares {
            bail!(
                "{}: insufficient strategy shares ({} > {})",
                self.name,
                shares,
                state.shares
            );
        }
        let amount = Self::to_assets(&state, shares);
        state.shares -= shares;
        state.assets -= amount;
        Ok(amount)
    }

    async fn harvest(&self) -> Result<Decimal> {
        let mut state = self.state.write().await;
        state.harvest_calls += 1;
        if state.fail_harvest {
            bail!("{}: harvest failed", self.name);
        }
        let reward = state.pending_rewards;
        state.pending_rewards = Decimal::ZERO;
        Ok(reward)
    }

    async fn emergency_exit(&self) -> Result<Decimal> {
        let mut state = self.state.write().await;
        if state.fail_emergency_exit {
            bail!("{}: emergency exit failed", self.name);
        }
        let amount = state.assets;
        state.assets = Decimal::ZERO;
        state.shares = Decimal::ZERO;
        state.active = false;
        Ok(amount)
    }

    async fn total_assets(&self) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: valuation unavailable", self.name);
        }
        Ok(state.assets)
    }

    async fn total_shares(&self) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: valuation unavailable", self.name);
        }
        Ok(state.shares)
    }

    async fn convert_to_shares(&self, amount: Decimal) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: valuation unavailable", self.name);
        }
        Ok(Self::to_shares(&state, amount))
    }

    async fn convert_to_assets(&self, shares: Decimal) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: valuation unavailable", self.name);
        }
        Ok(Self::to_assets(&state, shares))
    }

    async fn apy_bps(&self) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: APY unavailable", self.name);
        }
        Ok(state.apy_bps)
    }

    async fn pending_rewards(&self) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: rewards unavailable", self.name);
        }
        Ok(state.pending_rewards)
    }

    async fn is_active(&self) -> Result<bool> {
        let state = self.state.read().await;
        if state.fail_queries {
            bail!("{}: health probe failed", self.name);
        }
        Ok(state.active)
    }
}
