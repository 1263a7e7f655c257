//! Idle-asset ledger.
//!
//! Tracks the underlying-asset balance held directly by the pool (not yet
//! pushed into adapters). The allocator debits it when investing and credits
//! it when divesting; deposits credit it and payouts debit it.

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, Default)]
pub struct AssetLedger {
    idle: Decimal,
}

impl AssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying balance sitting idle in the pool.
    pub fn idle(&self) -> Decimal {
        self.idle
    }

    /// Credit the idle balance (deposit received, divestment proceeds).
    pub fn credit(&mut self, amount: Decimal) {
        self.idle += amount;
    }

    /// Debit up to `amount` from the idle balance, returning what was
    /// actually debited. Never goes negative.
    pub fn debit_up_to(&mut self, amount: Decimal) -> Decimal {
        let taken = amount.min(self.idle);
        self.idle -= taken;
        taken
    }

    /// Debit exactly `amount`. Callers must have checked the balance first;
    /// short debits are clamped and reported by `debit_up_to` instead.
    pub fn debit(&mut self, amount: Decimal) -> bool {
        if amount > self.idle {
            return false;
        }
        self.idle -= amount;
        true
    }

    /// Restore a persisted idle balance. Used only when loading a snapshot.
    pub fn restore(&mut self, idle: Decimal) {
        self.idle = idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_credit_debit() {
        let mut ledger = AssetLedger::new();
        ledger.credit(dec!(100));
        assert_eq!(ledger.idle(), dec!(100));
        assert!(ledger.debit(dec!(40)));
        assert_eq!(ledger.idle(), dec!(60));
        assert!(!ledger.debit(dec!(61)));
        assert_eq!(ledger.idle(), dec!(60));
    }

    #[test]
    fn test_debit_up_to_clamps() {
        let mut ledger = AssetLedger::new();
        ledger.credit(dec!(50));
        assert_eq!(ledger.debit_up_to(dec!(80)), dec!(50));
        assert_eq!(ledger.idle(), Decimal::ZERO);
    }
}
