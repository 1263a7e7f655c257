//! Full-cycle rebalancing and reward harvesting.

use crate::adapter::AdapterRegistry;
use crate::strategy::allocator::{AdapterOutcome, FundsAllocator, InvestmentReport};
use crate::utils::decimal::weighted_average;
use crate::vault::{AssetLedger, VaultError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Result of a harvest pass over all active adapters.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    /// Total rewards collected this pass.
    pub harvested: Decimal,
    pub outcomes: Vec<AdapterOutcome>,
}

/// Result of a full rebalance cycle.
#[derive(Debug, Clone)]
pub struct RebalanceReport {
    /// Total pulled out of adapters before redistribution.
    pub withdrawn: Decimal,
    pub investment: InvestmentReport,
}

/// Withdraws all adapter holdings and redistributes them per current
/// weights. Rebalancing is gated by a cooldown; an interval of zero makes it
/// available on demand.
#[derive(Debug)]
pub struct Rebalancer {
    interval: Duration,
    last_rebalance: Option<DateTime<Utc>>,
}

impl Rebalancer {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::seconds(interval_secs as i64),
            last_rebalance: None,
        }
    }

    /// Seconds left on the cooldown, if any.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.interval.is_zero() {
            return None;
        }
        let last = self.last_rebalance?;
        let ready_at = last + self.interval;
        if now < ready_at {
            Some((ready_at - now).num_seconds().max(1))
        } else {
            None
        }
    }

    /// Withdraw every active adapter's entire holding (individual failures
    /// tolerated), then redistribute the idle balance per current weights.
    pub async fn rebalance(
        &mut self,
        allocator: &FundsAllocator,
        assets: &mut AssetLedger,
        registry: &mut AdapterRegistry,
    ) -> Result<RebalanceReport, VaultError> {
        let now = Utc::now();
        if let Some(remaining_secs) = self.cooldown_remaining(now) {
            return Err(VaultError::RebalanceCooldown { remaining_secs });
        }

        let mut withdrawn = Decimal::ZERO;
        for adapter in registry.active_snapshot() {
            let strategy_shares = match adapter.handle.total_shares().await {
                Ok(shares) if shares > Decimal::ZERO => shares,
                Ok(_) => continue,
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Share query failed, skipping");
                    continue;
                }
            };
            match adapter.handle.withdraw(strategy_shares).await {
                Ok(amount) => {
                    assets.credit(amount);
                    registry.record_divest(&adapter.id, amount);
                    withdrawn += amount;
                }
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Rebalance withdrawal failed")
                }
            }
        }

        let investment = allocator.invest_idle(assets, registry).await;
        self.last_rebalance = Some(now);

        info!(
            %withdrawn,
            reinvested = %investment.invested,
            "Rebalance cycle complete"
        );
        Ok(RebalanceReport {
            withdrawn,
            investment,
        })
    }

    /// Collect rewards from every active adapter, summing what succeeds.
    /// One adapter failing never fails the pass.
    pub async fn harvest_all(&self, registry: &AdapterRegistry) -> HarvestReport {
        let mut report = HarvestReport::default();

        for adapter in registry.active_snapshot() {
            match adapter.handle.harvest().await {
                Ok(reward) => {
                    report.harvested += reward;
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: Decimal::ZERO,
                        achieved: reward,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Harvest failed, skipping");
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: Decimal::ZERO,
                        achieved: Decimal::ZERO,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }

    /// Asset-weighted APY across active adapters, zero when nothing is
    /// deployed. Failed queries contribute nothing.
    pub async fn weighted_apy_bps(&self, registry: &AdapterRegistry) -> Decimal {
        let mut pairs = Vec::new();
        for adapter in registry.active_snapshot() {
            let value = match adapter.handle.total_assets().await {
                Ok(value) => value,
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Valuation failed, excluded from APY");
                    continue;
                }
            };
            let apy = adapter.handle.apy_bps().await.unwrap_or(Decimal::ZERO);
            pairs.push((apy, value));
        }
        weighted_average(&pairs)
    }
}
