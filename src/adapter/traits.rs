//! Capability interface for external yield strategies.
//!
//! Provides a common interface for pushing pooled capital into any external
//! yield source (lending pools, AMM positions, staking wrappers) and pulling
//! it back out. Every operation may fail; the allocator loops treat a failed
//! call as "this adapter contributed zero this round" rather than aborting.

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Interface every yield strategy integration must implement.
///
/// Implement this trait to plug a new external protocol into the vault.
/// Amount arguments and returns are denominated in the vault's underlying
/// asset; share arguments use the adapter's own share units.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait YieldAdapter: Send + Sync {
    /// Human-readable adapter name for logs and reports.
    fn name(&self) -> &str;

    /// Push `amount` of underlying into the strategy. Returns the strategy
    /// shares received.
    async fn deposit(&self, amount: Decimal) -> anyhow::Result<Decimal>;

    /// Redeem `shares` strategy shares. Returns the underlying amount
    /// received.
    async fn withdraw(&self, shares: Decimal) -> anyhow::Result<Decimal>;

    /// Collect accrued rewards without touching invested principal.
    /// Returns the reward amount in underlying units.
    async fn harvest(&self) -> anyhow::Result<Decimal>;

    /// Force-return whatever the strategy can give back immediately.
    /// Best-effort and non-retryable.
    async fn emergency_exit(&self) -> anyhow::Result<Decimal>;

    /// Total underlying value currently held by the strategy.
    async fn total_assets(&self) -> anyhow::Result<Decimal>;

    /// Total strategy shares held on behalf of the vault.
    async fn total_shares(&self) -> anyhow::Result<Decimal>;

    /// Convert an underlying amount to strategy shares at current rates.
    async fn convert_to_shares(&self, amount: Decimal) -> anyhow::Result<Decimal>;

    /// Convert strategy shares to an underlying amount at current rates.
    async fn convert_to_assets(&self, shares: Decimal) -> anyhow::Result<Decimal>;

    /// Current annualized yield in basis points.
    async fn apy_bps(&self) -> anyhow::Result<Decimal>;

    /// Rewards accrued but not yet harvested.
    async fn pending_rewards(&self) -> anyhow::Result<Decimal>;

    /// Liveness probe. Callers treat a failed probe as unhealthy.
    async fn is_active(&self) -> anyhow::Result<bool>;
}
