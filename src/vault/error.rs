//! Typed errors for vault operations.
//!
//! Validation, authorization, and state errors are rejected before any state
//! change. Failures of external adapter calls are `anyhow::Error` at the
//! adapter boundary and are tolerated per call site by the allocator loops.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("adapter id must not be empty")]
    EmptyAdapterId,

    #[error("adapter weight must be greater than zero")]
    ZeroWeight,

    #[error("caller {caller} lacks the {role} role")]
    Unauthorized { caller: String, role: String },

    #[error("insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("insufficient available balance: requested {requested}, available {available}")]
    InsufficientAvailable {
        requested: Decimal,
        available: Decimal,
    },

    #[error("insufficient reserved funds: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        requested: Decimal,
        reserved: Decimal,
    },

    #[error("insufficient balance: requested {requested}, balance {balance}")]
    InsufficientBalance { requested: Decimal, balance: Decimal },

    #[error("adapter {0} is already registered")]
    DuplicateAdapter(String),

    #[error("adapter {0} is not registered")]
    AdapterNotFound(String),

    #[error("cumulative active weight {total_bps} bps exceeds the 10000 bps cap")]
    WeightCapExceeded { total_bps: u32 },

    #[error("vault is paused")]
    Paused,

    #[error("rebalance on cooldown for another {remaining_secs}s")]
    RebalanceCooldown { remaining_secs: i64 },

    #[error("no protocol available for selection")]
    NoProtocolAvailable,
}
