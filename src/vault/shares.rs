//! Share ledger: per-user vault shares and share/asset conversion.
//!
//! Shares are an internal accounting unit representing a proportional claim
//! on the pool's total assets. They are minted on deposit, burned on
//! withdrawal, and never transferable outside this ledger's own bookkeeping.

use crate::utils::decimal::floor_mul_div;
use crate::vault::VaultError;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Owns total shares, total deposits, and per-user share balances.
///
/// All conversions round down (in the ledger's favor); repeated small
/// operations lose bounded dust to rounding rather than ever minting value.
#[derive(Debug, Clone, Default)]
pub struct ShareLedger {
    balances: HashMap<String, Decimal>,
    total_shares: Decimal,
    total_deposits: Decimal,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total shares in circulation. Invariant: equals the sum of all
    /// per-user balances.
    pub fn total_shares(&self) -> Decimal {
        self.total_shares
    }

    /// Cumulative net principal deposited (floored at zero on withdrawal
    /// to tolerate yield-driven overshoot).
    pub fn total_deposits(&self) -> Decimal {
        self.total_deposits
    }

    /// Shares held by `user`.
    pub fn shares_of(&self, user: &str) -> Decimal {
        self.balances.get(user).copied().unwrap_or(Decimal::ZERO)
    }

    /// Number of users holding a non-zero share balance.
    pub fn holder_count(&self) -> usize {
        self.balances.values().filter(|s| **s > Decimal::ZERO).count()
    }

    /// Iterate over `(user, shares)` balances.
    pub fn balances(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.balances.iter().map(|(u, s)| (u.as_str(), *s))
    }

    /// Convert an asset amount to shares at the given pool totals.
    ///
    /// An empty pool (no shares or no assets) bootstraps 1:1 rather than
    /// dividing by zero.
    pub fn convert_to_shares(&self, amount: Decimal, total_assets: Decimal) -> Decimal {
        if self.total_shares == Decimal::ZERO || total_assets == Decimal::ZERO {
            return amount;
        }
        floor_mul_div(amount, self.total_shares, total_assets)
    }

    /// Convert shares to an asset amount at the given pool totals.
    pub fn convert_to_assets(&self, shares: Decimal, total_assets: Decimal) -> Decimal {
        if self.total_shares == Decimal::ZERO {
            return Decimal::ZERO;
        }
        floor_mul_div(shares, total_assets, self.total_shares)
    }

    /// Mint shares for a deposit of `amount` against pre-deposit
    /// `total_assets`. Returns the shares minted.
    pub fn mint(&mut self, user: &str, amount: Decimal, total_assets: Decimal) -> Decimal {
        let shares = self.convert_to_shares(amount, total_assets);
        *self
            .balances
            .entry(user.to_string())
            .or_insert(Decimal::ZERO) += shares;
        self.total_shares += shares;
        self.total_deposits += amount;
        shares
    }

    /// Burn `shares` from `user`, reducing `total_deposits` by
    /// `principal_out` (floored at zero).
    pub fn burn(
        &mut self,
        user: &str,
        shares: Decimal,
        principal_out: Decimal,
    ) -> Result<(), VaultError> {
        let held = self.shares_of(user);
        if shares <= Decimal::ZERO || shares > held {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                held,
            });
        }

        let balance = self
            .balances
            .get_mut(user)
            .expect("balance exists after shares_of check");
        *balance -= shares;
        if *balance == Decimal::ZERO {
            self.balances.remove(user);
        }
        self.total_shares -= shares;
        self.total_deposits = (self.total_deposits - principal_out).max(Decimal::ZERO);
        Ok(())
    }

    /// Restore a persisted balance. Used only when loading a snapshot.
    pub fn restore_balance(&mut self, user: &str, shares: Decimal) {
        self.total_shares += shares - self.shares_of(user);
        self.balances.insert(user.to_string(), shares);
    }

    /// Restore the persisted deposit counter. Used only when loading a
    /// snapshot.
    pub fn restore_total_deposits(&mut self, total_deposits: Decimal) {
        self.total_deposits = total_deposits;
    }
}
