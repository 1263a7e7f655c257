//! Vault orchestration: deposits, withdrawals, reservations, and adapter
//! management behind one mutation lock.
//!
//! Every state-mutating entry point acquires the vault mutex and holds it
//! across any nested adapter calls, so operations run to completion without
//! interleaving. An adapter calling back into the vault cannot observe
//! mid-mutation state.

use crate::adapter::{AdapterRecord, AdapterRegistry, YieldAdapter};
use crate::config::AllocationConfig;
use crate::escrow::ReservationLedger;
use crate::strategy::{
    FundsAllocator, HarvestReport, InvestmentReport, RebalanceReport, Rebalancer,
};
use crate::vault::{AccessController, AssetLedger, Role, ShareLedger, VaultError};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of a deposit.
#[derive(Debug)]
pub struct DepositReceipt {
    pub shares_minted: Decimal,
    /// Present when auto-invest ran.
    pub investment: Option<InvestmentReport>,
}

/// Result of a withdrawal.
///
/// `paid` can fall short of `entitlement` when divestment could not raise
/// the full shortfall; the difference is logged and left to the caller to
/// inspect, never hidden behind an error.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawOutcome {
    pub entitlement: Decimal,
    pub paid: Decimal,
}

impl WithdrawOutcome {
    pub fn shortfall(&self) -> Decimal {
        self.entitlement - self.paid
    }
}

/// Result of a settlement deduction.
#[derive(Debug, Clone)]
pub struct DeductOutcome {
    pub paid: Decimal,
    pub recipient: String,
    pub shares_burned: Decimal,
}

/// Full vault state capture for persistence.
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    pub asset_symbol: String,
    pub captured_at: DateTime<Utc>,
    pub idle: Decimal,
    pub total_shares: Decimal,
    pub total_deposits: Decimal,
    pub total_rewards_harvested: Decimal,
    pub paused: bool,
    pub user_shares: Vec<(String, Decimal)>,
    pub adapters: Vec<AdapterRecord>,
    pub reservations: Vec<(String, String, Decimal)>,
}

struct VaultState {
    assets: AssetLedger,
    shares: ShareLedger,
    registry: AdapterRegistry,
    reservations: ReservationLedger,
    rebalancer: Rebalancer,
    access: AccessController,
    paused: bool,
    total_rewards_harvested: Decimal,
}

/// The pooled yield vault.
pub struct Vault {
    asset_symbol: String,
    allocator: FundsAllocator,
    state: Mutex<VaultState>,
}

impl Vault {
    pub fn new(asset_symbol: &str, admin: &str, allocation: &AllocationConfig) -> Self {
        Self {
            asset_symbol: asset_symbol.to_string(),
            allocator: FundsAllocator::new(
                allocation.investment_ratio_bps,
                allocation.min_investment_amount,
            ),
            state: Mutex::new(VaultState {
                assets: AssetLedger::new(),
                shares: ShareLedger::new(),
                registry: AdapterRegistry::new(allocation.enforce_weight_cap),
                reservations: ReservationLedger::new(),
                rebalancer: Rebalancer::new(allocation.rebalance_interval_secs),
                access: AccessController::new(admin),
                paused: false,
                total_rewards_harvested: Decimal::ZERO,
            }),
        }
    }

    pub fn asset_symbol(&self) -> &str {
        &self.asset_symbol
    }

    // ==================== Deposits & withdrawals ====================

    /// Deposit `amount` of underlying for `user`, minting proportional
    /// shares. With `auto_invest`, idle funds are pushed into adapters in
    /// the same call; allocation failures leave funds idle and never fail
    /// the deposit.
    pub async fn deposit(
        &self,
        user: &str,
        amount: Decimal,
        auto_invest: bool,
    ) -> Result<DepositReceipt, VaultError> {
        let mut state = self.state.lock().await;
        Self::ensure_unpaused(&state)?;
        if amount <= Decimal::ZERO {
            return Err(VaultError::ZeroAmount);
        }
        let minimum = self.allocator.min_investment_amount();
        if amount < minimum {
            return Err(VaultError::BelowMinimum { amount, minimum });
        }

        // Totals sampled before the new funds are credited.
        let total_assets = Self::aggregate_assets(&state).await;
        let shares_minted = state.shares.mint(user, amount, total_assets);
        state.assets.credit(amount);

        info!(user, %amount, %shares_minted, "Deposit accepted");

        let investment = if auto_invest && state.registry.has_active() {
            let VaultState {
                assets, registry, ..
            } = &mut *state;
            Some(self.allocator.invest_idle(assets, registry).await)
        } else {
            None
        };

        Ok(DepositReceipt {
            shares_minted,
            investment,
        })
    }

    /// Redeem `shares` for underlying. Pulls any idle shortfall from
    /// adapters (best-effort) before paying out.
    pub async fn withdraw(&self, user: &str, shares: Decimal) -> Result<WithdrawOutcome, VaultError> {
        let mut state = self.state.lock().await;
        Self::ensure_unpaused(&state)?;

        let held = state.shares.shares_of(user);
        if shares <= Decimal::ZERO || shares > held {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                held,
            });
        }

        // Entitlement at pre-mutation totals.
        let total_assets = Self::aggregate_assets(&state).await;
        let entitlement = state.shares.convert_to_assets(shares, total_assets);

        // Reserved funds stay untouchable through the normal withdraw path.
        let balance = state.shares.convert_to_assets(held, total_assets);
        let reserved = state.reservations.reserved_of(user, &self.asset_symbol);
        let available = (balance - reserved).max(Decimal::ZERO);
        if entitlement > available {
            return Err(VaultError::InsufficientAvailable {
                requested: entitlement,
                available,
            });
        }

        let idle = state.assets.idle();
        if idle < entitlement {
            let VaultState {
                assets, registry, ..
            } = &mut *state;
            self.allocator
                .cover_shortfall(entitlement - idle, assets, registry)
                .await;
        }

        let paid = state.assets.debit_up_to(entitlement);
        if paid < entitlement {
            warn!(
                user,
                %entitlement,
                %paid,
                "Withdrawal paid less than entitlement; divestment fell short"
            );
        }
        state.shares.burn(user, shares, paid)?;

        info!(user, %shares, %paid, "Withdrawal complete");
        Ok(WithdrawOutcome { entitlement, paid })
    }

    // ==================== Balance queries ====================

    /// Idle balance plus every active adapter's reported assets. A failing
    /// adapter is skipped, never aborting the aggregate.
    pub async fn total_assets(&self) -> Decimal {
        let state = self.state.lock().await;
        Self::aggregate_assets(&state).await
    }

    pub async fn total_shares(&self) -> Decimal {
        self.state.lock().await.shares.total_shares()
    }

    pub async fn total_deposits(&self) -> Decimal {
        self.state.lock().await.shares.total_deposits()
    }

    pub async fn shares_of(&self, user: &str) -> Decimal {
        self.state.lock().await.shares.shares_of(user)
    }

    /// Asset value of the user's shares at current totals.
    pub async fn balance_of(&self, user: &str) -> Decimal {
        let state = self.state.lock().await;
        let total_assets = Self::aggregate_assets(&state).await;
        state
            .shares
            .convert_to_assets(state.shares.shares_of(user), total_assets)
    }

    /// Balance minus outstanding reservations.
    pub async fn available_balance(&self, user: &str) -> Decimal {
        let state = self.state.lock().await;
        let total_assets = Self::aggregate_assets(&state).await;
        let balance = state
            .shares
            .convert_to_assets(state.shares.shares_of(user), total_assets);
        state
            .reservations
            .available(user, &self.asset_symbol, balance)
    }

    pub async fn reserved_of(&self, user: &str) -> Decimal {
        self.state
            .lock()
            .await
            .reservations
            .reserved_of(user, &self.asset_symbol)
    }

    pub async fn idle_balance(&self) -> Decimal {
        self.state.lock().await.assets.idle()
    }

    pub async fn total_rewards_harvested(&self) -> Decimal {
        self.state.lock().await.total_rewards_harvested
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn weighted_apy_bps(&self) -> Decimal {
        let state = self.state.lock().await;
        state.rebalancer.weighted_apy_bps(&state.registry).await
    }

    // ==================== Reservations (settlement surface) ====================

    /// Earmark part of `user`'s balance. Settlement role.
    pub async fn reserve_funds(
        &self,
        caller: &str,
        user: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Settlement)?;
        Self::ensure_unpaused(&state)?;

        let total_assets = Self::aggregate_assets(&state).await;
        let balance = state
            .shares
            .convert_to_assets(state.shares.shares_of(user), total_assets);
        state
            .reservations
            .reserve(user, &self.asset_symbol, amount, balance, reason)
    }

    /// Release part of a user's earmark. Settlement role.
    pub async fn release_funds(
        &self,
        caller: &str,
        user: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Settlement)?;
        Self::ensure_unpaused(&state)?;
        state
            .reservations
            .release(user, &self.asset_symbol, amount, reason)
    }

    /// Take `amount` out of `user`'s recorded balance and pay `recipient`:
    /// burns the equivalent shares and pulls real funds through the
    /// allocator when idle is short. Settlement role.
    ///
    /// Does not reconcile reservation records; the settlement workflow
    /// releases any matching reservation in its own step.
    pub async fn deduct_funds(
        &self,
        caller: &str,
        user: &str,
        amount: Decimal,
        recipient: &str,
    ) -> Result<DeductOutcome, VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Settlement)?;
        Self::ensure_unpaused(&state)?;
        if amount <= Decimal::ZERO {
            return Err(VaultError::ZeroAmount);
        }

        let total_assets = Self::aggregate_assets(&state).await;
        let held = state.shares.shares_of(user);
        let balance = state.shares.convert_to_assets(held, total_assets);
        if amount > balance {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                balance,
            });
        }

        let shares_burned = state.shares.convert_to_shares(amount, total_assets).min(held);

        let idle = state.assets.idle();
        if idle < amount {
            let VaultState {
                assets, registry, ..
            } = &mut *state;
            self.allocator
                .cover_shortfall(amount - idle, assets, registry)
                .await;
        }
        let paid = state.assets.debit_up_to(amount);
        if shares_burned > Decimal::ZERO {
            state.shares.burn(user, shares_burned, paid)?;
        }

        info!(user, recipient, %paid, %shares_burned, "Funds deducted");
        Ok(DeductOutcome {
            paid,
            recipient: recipient.to_string(),
            shares_burned,
        })
    }

    // ==================== Adapter management (manager surface) ====================

    /// Register a new yield adapter. Manager role. Allowed while paused so
    /// operators can reshape the adapter set during an incident.
    pub async fn add_adapter(
        &self,
        caller: &str,
        id: &str,
        weight_bps: u32,
        handle: Arc<dyn YieldAdapter>,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        state.registry.add(id, weight_bps, handle)?;
        info!(adapter = id, weight_bps, "Adapter added");
        Ok(())
    }

    /// Soft-remove an adapter after a best-effort emergency exit of its
    /// holdings. Returns the amount recovered into the idle balance.
    pub async fn remove_adapter(&self, caller: &str, id: &str) -> Result<Decimal, VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        let handle = state.registry.handle(id)?;

        let recovered = match handle.emergency_exit().await {
            Ok(amount) => {
                state.assets.credit(amount);
                state.registry.record_divest(id, amount);
                amount
            }
            Err(e) => {
                warn!(adapter = id, error = %e, "Emergency exit failed during removal");
                Decimal::ZERO
            }
        };

        state.registry.mark_removed(id)?;
        info!(adapter = id, %recovered, "Adapter removed");
        Ok(recovered)
    }

    pub async fn set_adapter_weight(
        &self,
        caller: &str,
        id: &str,
        weight_bps: u32,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        state.registry.set_weight(id, weight_bps)
    }

    pub async fn set_adapter_active(
        &self,
        caller: &str,
        id: &str,
        active: bool,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        state.registry.set_active(id, active)
    }

    pub async fn adapter_records(&self) -> Vec<AdapterRecord> {
        self.state.lock().await.registry.records().cloned().collect()
    }

    // ==================== Allocation (manager surface) ====================

    /// Push idle funds into adapters per current weights. Manager role.
    pub async fn invest_idle(&self, caller: &str) -> Result<InvestmentReport, VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        Self::ensure_unpaused(&state)?;
        let VaultState {
            assets, registry, ..
        } = &mut *state;
        Ok(self.allocator.invest_idle(assets, registry).await)
    }

    /// Full-cycle rebalance: divest everything, redistribute per weights.
    /// Manager role; subject to the configured cooldown.
    pub async fn rebalance(&self, caller: &str) -> Result<RebalanceReport, VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        Self::ensure_unpaused(&state)?;
        let VaultState {
            assets,
            registry,
            rebalancer,
            ..
        } = &mut *state;
        rebalancer.rebalance(&self.allocator, assets, registry).await
    }

    /// Harvest rewards from all active adapters into the idle balance.
    /// Manager role.
    pub async fn harvest_all(&self, caller: &str) -> Result<HarvestReport, VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        Self::ensure_unpaused(&state)?;

        let report = state.rebalancer.harvest_all(&state.registry).await;
        state.assets.credit(report.harvested);
        state.total_rewards_harvested += report.harvested;

        info!(harvested = %report.harvested, "Harvest pass complete");
        Ok(report)
    }

    // ==================== Pause & roles ====================

    /// Block all mutating calls. Manager role.
    pub async fn pause(&self, caller: &str) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        state.paused = true;
        warn!(caller, "Vault paused");
        Ok(())
    }

    pub async fn unpause(&self, caller: &str) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.require(caller, Role::Manager)?;
        state.paused = false;
        info!(caller, "Vault unpaused");
        Ok(())
    }

    pub async fn grant_role(
        &self,
        caller: &str,
        grantee: &str,
        role: Role,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.grant(caller, grantee, role)
    }

    pub async fn revoke_role(
        &self,
        caller: &str,
        grantee: &str,
        role: Role,
    ) -> Result<(), VaultError> {
        let mut state = self.state.lock().await;
        state.access.revoke(caller, grantee, role)
    }

    // ==================== Persistence ====================

    /// Capture the full ledger state for persistence.
    pub async fn snapshot(&self) -> VaultSnapshot {
        let state = self.state.lock().await;
        VaultSnapshot {
            asset_symbol: self.asset_symbol.clone(),
            captured_at: Utc::now(),
            idle: state.assets.idle(),
            total_shares: state.shares.total_shares(),
            total_deposits: state.shares.total_deposits(),
            total_rewards_harvested: state.total_rewards_harvested,
            paused: state.paused,
            user_shares: state
                .shares
                .balances()
                .map(|(u, s)| (u.to_string(), s))
                .collect(),
            adapters: state.registry.records().cloned().collect(),
            reservations: state
                .reservations
                .entries()
                .map(|(u, a, amount)| (u.to_string(), a.to_string(), amount))
                .collect(),
        }
    }

    /// Restore ledger state from a snapshot. Adapter handles cannot be
    /// persisted; invested counters are applied to adapters that were
    /// re-registered under the same id, and the rest are logged and skipped.
    pub async fn restore(&self, snapshot: &VaultSnapshot) {
        let mut state = self.state.lock().await;
        state.assets.restore(snapshot.idle);
        for (user, shares) in &snapshot.user_shares {
            state.shares.restore_balance(user, *shares);
        }
        state.shares.restore_total_deposits(snapshot.total_deposits);
        state.total_rewards_harvested = snapshot.total_rewards_harvested;
        state.paused = snapshot.paused;
        for (user, asset, amount) in &snapshot.reservations {
            state.reservations.restore(user, asset, *amount);
        }
        for record in &snapshot.adapters {
            if state
                .registry
                .restore_invested(&record.id, record.invested)
                .is_err()
            {
                warn!(
                    adapter = %record.id,
                    "Snapshot references an adapter that is not registered"
                );
            }
        }
        info!("Vault state restored from snapshot");
    }

    // ==================== Internals ====================

    fn ensure_unpaused(state: &VaultState) -> Result<(), VaultError> {
        if state.paused {
            return Err(VaultError::Paused);
        }
        Ok(())
    }

    async fn aggregate_assets(state: &VaultState) -> Decimal {
        let active = state.registry.active_snapshot();
        let valuations = join_all(active.iter().map(|a| a.handle.total_assets())).await;

        let mut total = state.assets.idle();
        for (adapter, result) in active.iter().zip(valuations) {
            match result {
                Ok(value) => total += value,
                Err(e) => {
                    warn!(adapter = %adapter.id, error = %e, "Valuation failed, skipping")
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use rust_decimal_macros::dec;

    const ADMIN: &str = "admin";

    fn test_vault() -> Vault {
        Vault::new(
            "USDC",
            ADMIN,
            &AllocationConfig {
                investment_ratio_bps: 10_000,
                min_investment_amount: dec!(100),
                rebalance_interval_secs: 0,
                enforce_weight_cap: true,
            },
        )
    }

    async fn vault_with_adapter() -> (Vault, Arc<MockAdapter>) {
        let vault = test_vault();
        let adapter = Arc::new(MockAdapter::new("mock"));
        vault
            .add_adapter(ADMIN, "mock", 10_000, adapter.clone())
            .await
            .unwrap();
        (vault, adapter)
    }

    #[tokio::test]
    async fn test_bootstrap_deposit_mints_one_to_one() {
        let vault = test_vault();
        let receipt = vault.deposit("alice", dec!(1000), false).await.unwrap();
        assert_eq!(receipt.shares_minted, dec!(1000));
        assert_eq!(vault.total_shares().await, dec!(1000));
        assert_eq!(vault.total_assets().await, dec!(1000));
    }

    #[tokio::test]
    async fn test_deposit_validation() {
        let vault = test_vault();
        assert!(matches!(
            vault.deposit("alice", Decimal::ZERO, false).await,
            Err(VaultError::ZeroAmount)
        ));
        assert!(matches!(
            vault.deposit("alice", dec!(50), false).await,
            Err(VaultError::BelowMinimum { .. })
        ));
    }

    #[tokio::test]
    async fn test_proportional_shares_after_yield() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();

        // Yield doubles the pool: totalAssets 2000 backing 1000 shares.
        adapter.accrue_yield(dec!(1000)).await;

        let receipt = vault.deposit("bob", dec!(500), false).await.unwrap();
        assert_eq!(receipt.shares_minted, dec!(250)); // floor(500*1000/2000)
    }

    #[tokio::test]
    async fn test_full_round_trip_without_yield() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();

        let outcome = vault.withdraw("alice", dec!(1000)).await.unwrap();
        assert_eq!(outcome.paid, dec!(1000));
        assert_eq!(outcome.shortfall(), Decimal::ZERO);
        assert_eq!(vault.total_shares().await, Decimal::ZERO);
        assert_eq!(vault.total_deposits().await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_withdraw_pulls_shortfall_from_adapters() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();
        assert_eq!(vault.idle_balance().await, Decimal::ZERO);
        assert_eq!(adapter.total_assets().await.unwrap(), dec!(1000));

        let outcome = vault.withdraw("alice", dec!(400)).await.unwrap();
        assert_eq!(outcome.paid, dec!(400));
        assert_eq!(adapter.total_assets().await.unwrap(), dec!(600));
    }

    #[tokio::test]
    async fn test_withdraw_pays_what_divestment_raised() {
        // Divestment is best-effort: when adapters cannot return the
        // shortfall, the payout is capped at what was actually raised and
        // the gap is reported, not hidden behind an error.
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();
        adapter.fail_withdrawals(true).await;

        let outcome = vault.withdraw("alice", dec!(500)).await.unwrap();
        assert_eq!(outcome.entitlement, dec!(500));
        assert_eq!(outcome.paid, Decimal::ZERO);
        assert_eq!(outcome.shortfall(), dec!(500));
        // Shares burn regardless; the claim was consumed.
        assert_eq!(vault.shares_of("alice").await, dec!(500));
    }

    #[tokio::test]
    async fn test_withdraw_rejects_more_than_held() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        assert!(matches!(
            vault.withdraw("alice", dec!(1001)).await,
            Err(VaultError::InsufficientShares { .. })
        ));
    }

    #[tokio::test]
    async fn test_conservation_across_mixed_operations() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        vault.deposit("bob", dec!(600), false).await.unwrap();
        vault.withdraw("alice", dec!(250)).await.unwrap();

        let alice = vault.shares_of("alice").await;
        let bob = vault.shares_of("bob").await;
        assert_eq!(vault.total_shares().await, alice + bob);
        assert_eq!(vault.total_deposits().await, dec!(1350));
    }

    #[tokio::test]
    async fn test_reserved_funds_block_withdrawal() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        vault
            .reserve_funds(ADMIN, "alice", dec!(700), "rental-7")
            .await
            .unwrap();

        assert_eq!(vault.available_balance("alice").await, dec!(300));
        assert!(matches!(
            vault.withdraw("alice", dec!(500)).await,
            Err(VaultError::InsufficientAvailable { .. })
        ));

        // Within the unreserved portion the withdrawal clears.
        vault.withdraw("alice", dec!(300)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deduct_leaves_reservation_untouched() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        vault
            .reserve_funds(ADMIN, "alice", dec!(400), "rental-9")
            .await
            .unwrap();

        let outcome = vault
            .deduct_funds(ADMIN, "alice", dec!(400), "merchant-3")
            .await
            .unwrap();
        assert_eq!(outcome.paid, dec!(400));
        assert_eq!(outcome.shares_burned, dec!(400));

        // Deduction and reservation are decoupled by design: the earmark
        // still stands until the settlement flow releases it.
        assert_eq!(vault.reserved_of("alice").await, dec!(400));
        vault
            .release_funds(ADMIN, "alice", dec!(400), "rental-9 settled")
            .await
            .unwrap();
        assert_eq!(vault.reserved_of("alice").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_deduct_pulls_from_adapters_and_pays_recipient() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();

        let outcome = vault
            .deduct_funds(ADMIN, "alice", dec!(250), "merchant-1")
            .await
            .unwrap();
        assert_eq!(outcome.paid, dec!(250));
        assert_eq!(outcome.recipient, "merchant-1");
        assert_eq!(adapter.total_assets().await.unwrap(), dec!(750));
        assert_eq!(vault.balance_of("alice").await, dec!(750));
    }

    #[tokio::test]
    async fn test_settlement_surface_requires_role() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();

        assert!(matches!(
            vault.reserve_funds("mallory", "alice", dec!(10), "x").await,
            Err(VaultError::Unauthorized { .. })
        ));
        assert!(matches!(
            vault.deduct_funds("mallory", "alice", dec!(10), "m").await,
            Err(VaultError::Unauthorized { .. })
        ));

        vault
            .grant_role(ADMIN, "settler", Role::Settlement)
            .await
            .unwrap();
        vault
            .reserve_funds("settler", "alice", dec!(10), "rental")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_blocks_mutating_calls() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        vault.pause(ADMIN).await.unwrap();

        assert!(matches!(
            vault.deposit("bob", dec!(100), false).await,
            Err(VaultError::Paused)
        ));
        assert!(matches!(
            vault.withdraw("alice", dec!(100)).await,
            Err(VaultError::Paused)
        ));
        assert!(matches!(
            vault.harvest_all(ADMIN).await,
            Err(VaultError::Paused)
        ));

        vault.unpause(ADMIN).await.unwrap();
        vault.withdraw("alice", dec!(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_harvest_credits_idle_and_counter() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();
        adapter.set_pending_rewards(dec!(30)).await;

        let report = vault.harvest_all(ADMIN).await.unwrap();
        assert_eq!(report.harvested, dec!(30));
        assert_eq!(vault.idle_balance().await, dec!(30));
        assert_eq!(vault.total_rewards_harvested().await, dec!(30));
    }

    #[tokio::test]
    async fn test_remove_adapter_recovers_holdings() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();
        assert_eq!(adapter.total_assets().await.unwrap(), dec!(1000));

        let recovered = vault.remove_adapter(ADMIN, "mock").await.unwrap();
        assert_eq!(recovered, dec!(1000));
        assert_eq!(vault.idle_balance().await, dec!(1000));

        let records = vault.adapter_records().await;
        assert!(!records[0].active);
        assert!(records[0].removed_at.is_some());
    }

    #[tokio::test]
    async fn test_remove_adapter_tolerates_exit_failure() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();
        adapter.fail_emergency_exit(true).await;

        let recovered = vault.remove_adapter(ADMIN, "mock").await.unwrap();
        assert_eq!(recovered, Decimal::ZERO);
        // The removal itself still lands; the funds are stranded behind the
        // broken adapter, not lost from the books.
        assert!(!vault.adapter_records().await[0].active);
    }

    #[tokio::test]
    async fn test_total_assets_skips_dark_adapter() {
        let (vault, adapter) = vault_with_adapter().await;
        vault.deposit("alice", dec!(1000), true).await.unwrap();

        adapter.fail_queries(true).await;
        assert_eq!(vault.total_assets().await, Decimal::ZERO); // idle only

        adapter.fail_queries(false).await;
        assert_eq!(vault.total_assets().await, dec!(1000));
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let vault = test_vault();
        vault.deposit("alice", dec!(1000), false).await.unwrap();
        vault.deposit("bob", dec!(500), false).await.unwrap();
        vault
            .reserve_funds(ADMIN, "alice", dec!(200), "rental")
            .await
            .unwrap();

        let snapshot = vault.snapshot().await;

        let restored = test_vault();
        restored.restore(&snapshot).await;

        assert_eq!(restored.total_shares().await, dec!(1500));
        assert_eq!(restored.total_deposits().await, dec!(1500));
        assert_eq!(restored.shares_of("alice").await, dec!(1000));
        assert_eq!(restored.reserved_of("alice").await, dec!(200));
        assert_eq!(restored.idle_balance().await, dec!(1000) + dec!(500));
    }
}
