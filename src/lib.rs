//! # Yield Vault
//!
//! A pooled yield vault with share-based accounting and multi-adapter
//! allocation.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `vault`: Share ledger, idle-asset ledger, access control, orchestration
//! - `adapter`: Yield adapter trait, registry, and concrete integrations
//! - `strategy`: Capital allocation, shortfall divestment, and rebalancing
//! - `escrow`: Reservation ledger for settlement earmarks
//! - `persistence`: SQLite-based state snapshots and harvest history
//! - `utils`: Shared utilities and decimal arithmetic

pub mod adapter;
pub mod config;
pub mod escrow;
pub mod persistence;
pub mod strategy;
pub mod utils;
pub mod vault;

pub use config::Config;
pub use vault::Vault;
