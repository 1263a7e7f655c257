//! Vault core: share accounting, idle-asset ledger, and access control.
//!
//! The vault owns all share and reservation state. Adapters own no vault
//! state; they only report queryable totals and accept push/pull calls
//! through the allocator.

mod access;
mod assets;
mod core;
mod error;
mod shares;

pub use access::{AccessController, Role};
pub use assets::AssetLedger;
pub use error::VaultError;
pub use self::core::{DeductOutcome, DepositReceipt, Vault, VaultSnapshot, WithdrawOutcome};
pub use shares::ShareLedger;
