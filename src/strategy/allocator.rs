//! Capital allocation across registered adapters.

use crate::adapter::AdapterRegistry;
use crate::utils::decimal::{apply_bps, floor_mul_div};
use crate::vault::AssetLedger;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Outcome of one adapter call inside an allocation loop.
#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub adapter_id: String,
    /// Amount the loop asked this adapter for.
    pub requested: Decimal,
    /// Amount actually moved. Zero when the call failed.
    pub achieved: Decimal,
    pub error: Option<String>,
}

/// Result of distributing idle capital into adapters.
#[derive(Debug, Clone, Default)]
pub struct InvestmentReport {
    /// Idle capital eligible for investment this round.
    pub investable: Decimal,
    /// Total actually pushed into adapters.
    pub invested: Decimal,
    pub outcomes: Vec<AdapterOutcome>,
}

/// Result of divesting to cover a withdrawal shortfall.
#[derive(Debug, Clone)]
pub struct DivestmentReport {
    pub requested: Decimal,
    /// Total actually pulled back. May be less than requested; divestment
    /// is best-effort and never fails the surrounding operation.
    pub raised: Decimal,
    pub outcomes: Vec<AdapterOutcome>,
}

impl DivestmentReport {
    pub fn covered(&self) -> bool {
        self.raised >= self.requested
    }
}

/// Decides how much idle capital goes into which adapters, and how capital
/// is pulled back out.
#[derive(Debug, Clone)]
pub struct FundsAllocator {
    /// Portion of idle balance eligible for investment, in basis points.
    investment_ratio_bps: u32,
    /// Floor below which nothing is invested.
    min_investment_amount: Decimal,
}

impl FundsAllocator {
    pub fn new(investment_ratio_bps: u32, min_investment_amount: Decimal) -> Self {
        Self {
            investment_ratio_bps,
            min_investment_amount,
        }
    }

    pub fn min_investment_amount(&self) -> Decimal {
        self.min_investment_amount
    }

    /// Distribute idle capital into active adapters proportionally to their
    /// weights. An adapter failure skips that adapter; its allocation stays
    /// idle.
    pub async fn invest_idle(
        &self,
        assets: &mut AssetLedger,
        registry: &mut AdapterRegistry,
    ) -> InvestmentReport {
        let investable = apply_bps(assets.idle(), self.investment_ratio_bps);
        if investable < self.min_investment_amount {
            debug!(%investable, "Below minimum investment, leaving funds idle");
            return InvestmentReport {
                investable,
                ..Default::default()
            };
        }

        let active = registry.active_snapshot();
        let total_weight: u32 = active.iter().map(|a| a.weight_bps).sum();
        if total_weight == 0 {
            return InvestmentReport {
                investable,
                ..Default::default()
            };
        }

        let mut report = InvestmentReport {
            investable,
            ..Default::default()
        };

        for adapter in &active {
            let allocation = floor_mul_div(
                investable,
                Decimal::from(adapter.weight_bps),
                Decimal::from(total_weight),
            );
            if allocation == Decimal::ZERO {
                continue;
            }

            match adapter.handle.deposit(allocation).await {
                Ok(strategy_shares) => {
                    assets.debit(allocation);
                    registry.record_invest(&adapter.id, allocation);
                    report.invested += allocation;
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: allocation,
                        achieved: allocation,
                        error: None,
                    });
                    debug!(
                        adapter = %adapter.id,
                        %allocation,
                        %strategy_shares,
                        "Invested into adapter"
                    );
                }
                Err(e) => {
                    warn!(
                        adapter = %adapter.id,
                        %allocation,
                        error = %e,
                        "Adapter deposit failed, funds stay idle"
                    );
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: allocation,
                        achieved: Decimal::ZERO,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }

    /// Pull `needed` underlying back from adapters, proportionally to each
    /// adapter's share of total invested funds. Stops early once covered.
    ///
    /// Best-effort: per-adapter failures are skipped, and flooring can leave
    /// the shortfall partially covered even when adapters hold enough.
    /// Callers read `raised` rather than assuming full coverage.
    pub async fn cover_shortfall(
        &self,
        needed: Decimal,
        assets: &mut AssetLedger,
        registry: &mut AdapterRegistry,
    ) -> DivestmentReport {
        let mut report = DivestmentReport {
            requested: needed,
            raised: Decimal::ZERO,
            outcomes: Vec::new(),
        };
        if needed <= Decimal::ZERO {
            return report;
        }

        let active = registry.active_snapshot();
        let total_invested: Decimal = active.iter().map(|a| a.invested).sum();
        if total_invested == Decimal::ZERO {
            warn!(%needed, "Shortfall requested but nothing is invested");
            return report;
        }

        for adapter in &active {
            if report.raised >= needed {
                break;
            }
            let portion = floor_mul_div(needed, adapter.invested, total_invested)
                .min(adapter.invested)
                .min(needed - report.raised);
            if portion == Decimal::ZERO {
                continue;
            }

            let strategy_shares = match adapter.handle.convert_to_shares(portion).await {
                Ok(shares) => shares,
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Share conversion failed, skipping");
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: portion,
                        achieved: Decimal::ZERO,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            match adapter.handle.withdraw(strategy_shares).await {
                Ok(amount) => {
                    assets.credit(amount);
                    registry.record_divest(&adapter.id, amount);
                    report.raised += amount;
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: portion,
                        achieved: amount,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        adapter = %adapter.id,
                        %portion,
                        error = %e,
                        "Adapter withdrawal failed, continuing"
                    );
                    report.outcomes.push(AdapterOutcome {
                        adapter_id: adapter.id.clone(),
                        requested: portion,
                        achieved: Decimal::ZERO,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if !report.covered() {
            warn!(
                requested = %report.requested,
                raised = %report.raised,
                "Shortfall not fully covered by divestment"
            );
        }
        report
    }
}
