//! Reservation ledger: accounting-only earmarks on user balances.
//!
//! A reservation excludes part of a user's balance from the spendable
//! portion without moving underlying tokens; the settlement workflow
//! reserves a deposit when a rental starts and releases it when the rental
//! settles. Deductions are deliberately decoupled: `deduct` does not touch
//! reservation records, callers release separately.

use crate::vault::VaultError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

/// Per-user, per-asset reserved amounts.
///
/// Invariant: `reserved(user, asset) <= total_balance(user, asset)`. The
/// balance is supplied by the owning vault at check time, since this ledger
/// is pure bookkeeping over someone else's balance view.
#[derive(Debug, Clone, Default)]
pub struct ReservationLedger {
    reserved: HashMap<(String, String), Decimal>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount currently reserved for `user` in `asset`.
    pub fn reserved_of(&self, user: &str, asset: &str) -> Decimal {
        self.reserved
            .get(&(user.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Spendable portion of `total_balance` after reservations.
    pub fn available(&self, user: &str, asset: &str, total_balance: Decimal) -> Decimal {
        (total_balance - self.reserved_of(user, asset)).max(Decimal::ZERO)
    }

    /// Earmark `amount` of the user's balance. Fails when the amount
    /// exceeds the unreserved portion of `total_balance`.
    pub fn reserve(
        &mut self,
        user: &str,
        asset: &str,
        amount: Decimal,
        total_balance: Decimal,
        reason: &str,
    ) -> Result<(), VaultError> {
        if amount <= Decimal::ZERO {
            return Err(VaultError::ZeroAmount);
        }
        let available = self.available(user, asset, total_balance);
        if amount > available {
            return Err(VaultError::InsufficientAvailable {
                requested: amount,
                available,
            });
        }
        *self
            .reserved
            .entry((user.to_string(), asset.to_string()))
            .or_insert(Decimal::ZERO) += amount;
        info!(user, asset, %amount, reason, "Funds reserved");
        Ok(())
    }

    /// Release part of an earmark. Fails when the amount exceeds what is
    /// reserved.
    pub fn release(
        &mut self,
        user: &str,
        asset: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), VaultError> {
        if amount <= Decimal::ZERO {
            return Err(VaultError::ZeroAmount);
        }
        let key = (user.to_string(), asset.to_string());
        let reserved = self.reserved.get(&key).copied().unwrap_or(Decimal::ZERO);
        if amount > reserved {
            return Err(VaultError::InsufficientReserved {
                requested: amount,
                reserved,
            });
        }
        if amount == reserved {
            self.reserved.remove(&key);
        } else {
            *self.reserved.get_mut(&key).expect("checked above") -= amount;
        }
        info!(user, asset, %amount, reason, "Funds released");
        Ok(())
    }

    /// Iterate `(user, asset, amount)` entries for persistence.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, Decimal)> {
        self.reserved
            .iter()
            .map(|((u, a), amount)| (u.as_str(), a.as_str(), *amount))
    }

    /// Restore a persisted entry. Used only when loading a snapshot.
    pub fn restore(&mut self, user: &str, asset: &str, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.reserved
                .insert((user.to_string(), asset.to_string()), amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_within_available() {
        let mut ledger = ReservationLedger::new();
        ledger
            .reserve("alice", "USDC", dec!(300), dec!(1000), "rental-1")
            .unwrap();

        assert_eq!(ledger.reserved_of("alice", "USDC"), dec!(300));
        assert_eq!(ledger.available("alice", "USDC", dec!(1000)), dec!(700));
    }

    #[test]
    fn test_reserve_beyond_available_fails() {
        let mut ledger = ReservationLedger::new();
        ledger
            .reserve("alice", "USDC", dec!(800), dec!(1000), "rental-1")
            .unwrap();

        let err = ledger
            .reserve("alice", "USDC", dec!(300), dec!(1000), "rental-2")
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientAvailable {
                available, ..
            } if available == dec!(200)
        ));
        // Invariant holds: reserved never exceeds the balance.
        assert!(ledger.reserved_of("alice", "USDC") <= dec!(1000));
    }

    #[test]
    fn test_release_beyond_reserved_fails() {
        let mut ledger = ReservationLedger::new();
        ledger
            .reserve("alice", "USDC", dec!(100), dec!(1000), "rental-1")
            .unwrap();

        assert!(matches!(
            ledger.release("alice", "USDC", dec!(150), "settle"),
            Err(VaultError::InsufficientReserved { .. })
        ));
        ledger.release("alice", "USDC", dec!(100), "settle").unwrap();
        assert_eq!(ledger.reserved_of("alice", "USDC"), Decimal::ZERO);
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let mut ledger = ReservationLedger::new();
        assert!(matches!(
            ledger.reserve("alice", "USDC", Decimal::ZERO, dec!(1000), "r"),
            Err(VaultError::ZeroAmount)
        ));
        assert!(matches!(
            ledger.release("alice", "USDC", Decimal::ZERO, "r"),
            Err(VaultError::ZeroAmount)
        ));
    }

    #[test]
    fn test_assets_tracked_independently() {
        let mut ledger = ReservationLedger::new();
        ledger
            .reserve("alice", "USDC", dec!(100), dec!(1000), "r1")
            .unwrap();
        ledger
            .reserve("alice", "DAI", dec!(50), dec!(500), "r2")
            .unwrap();

        assert_eq!(ledger.reserved_of("alice", "USDC"), dec!(100));
        assert_eq!(ledger.reserved_of("alice", "DAI"), dec!(50));
        assert_eq!(ledger.reserved_of("bob", "USDC"), Decimal::ZERO);
    }

    #[test]
    fn test_available_floors_at_zero_when_balance_shrinks() {
        let mut ledger = ReservationLedger::new();
        ledger
            .reserve("alice", "USDC", dec!(500), dec!(1000), "r1")
            .unwrap();

        // A deduction shrank the balance below the outstanding reservation;
        // the spendable portion clamps at zero until a release reconciles.
        assert_eq!(ledger.available("alice", "USDC", dec!(300)), Decimal::ZERO);
    }
}
