//! SQLite persistence for vault state.
//!
//! Persists ledger state to survive restarts:
//! - Vault totals (idle balance, shares, deposits, harvested rewards)
//! - Per-user share balances
//! - Adapter registration records
//! - Outstanding reservations
//! - Harvest event history

use crate::adapter::AdapterRecord;
use crate::vault::VaultSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// One recorded harvest.
#[derive(Debug, Clone)]
pub struct HarvestEvent {
    pub timestamp: DateTime<Utc>,
    pub adapter_id: String,
    pub amount: Decimal,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let manager = Self { conn };
        manager.init_schema()?;
        Ok(manager)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Vault totals (singleton row)
            CREATE TABLE IF NOT EXISTS vault_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                asset_symbol TEXT NOT NULL,
                idle TEXT NOT NULL,
                total_shares TEXT NOT NULL,
                total_deposits TEXT NOT NULL,
                total_rewards_harvested TEXT NOT NULL,
                paused INTEGER NOT NULL,
                captured_at TEXT NOT NULL
            );

            -- Per-user share balances
            CREATE TABLE IF NOT EXISTS user_shares (
                user TEXT PRIMARY KEY,
                shares TEXT NOT NULL
            );

            -- Adapter registration records
            CREATE TABLE IF NOT EXISTS adapters (
                id TEXT PRIMARY KEY,
                weight_bps INTEGER NOT NULL,
                active INTEGER NOT NULL,
                invested TEXT NOT NULL,
                added_at TEXT NOT NULL,
                removed_at TEXT
            );

            -- Outstanding reservations
            CREATE TABLE IF NOT EXISTS reservations (
                user TEXT NOT NULL,
                asset TEXT NOT NULL,
                amount TEXT NOT NULL,
                PRIMARY KEY (user, asset)
            );

            -- Harvest history
            CREATE TABLE IF NOT EXISTS harvest_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                adapter_id TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_harvest_timestamp ON harvest_events(timestamp);
            "#,
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Persist a full snapshot, replacing the previous one.
    pub fn save_snapshot(&mut self, snapshot: &VaultSnapshot) -> Result<()> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO vault_state
                (id, asset_symbol, idle, total_shares, total_deposits,
                 total_rewards_harvested, paused, captured_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                snapshot.asset_symbol,
                snapshot.idle.to_string(),
                snapshot.total_shares.to_string(),
                snapshot.total_deposits.to_string(),
                snapshot.total_rewards_harvested.to_string(),
                snapshot.paused as i64,
                snapshot.captured_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM user_shares", [])?;
        for (user, shares) in &snapshot.user_shares {
            tx.execute(
                "INSERT INTO user_shares (user, shares) VALUES (?1, ?2)",
                params![user, shares.to_string()],
            )?;
        }

        tx.execute("DELETE FROM adapters", [])?;
        for record in &snapshot.adapters {
            tx.execute(
                r#"
                INSERT INTO adapters (id, weight_bps, active, invested, added_at, removed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.id,
                    record.weight_bps,
                    record.active as i64,
                    record.invested.to_string(),
                    record.added_at.to_rfc3339(),
                    record.removed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }

        tx.execute("DELETE FROM reservations", [])?;
        for (user, asset, amount) in &snapshot.reservations {
            tx.execute(
                "INSERT INTO reservations (user, asset, amount) VALUES (?1, ?2, ?3)",
                params![user, asset, amount.to_string()],
            )?;
        }

        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }

    /// Load the persisted snapshot, if any.
    pub fn load_snapshot(&self) -> Result<Option<VaultSnapshot>> {
        let state = self
            .conn
            .query_row(
                r#"
                SELECT asset_symbol, idle, total_shares, total_deposits,
                       total_rewards_harvested, paused, captured_at
                FROM vault_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query vault state")?;

        let Some((asset_symbol, idle, total_shares, total_deposits, rewards, paused, captured_at)) =
            state
        else {
            return Ok(None);
        };

        let mut user_shares = Vec::new();
        let mut stmt = self.conn.prepare("SELECT user, shares FROM user_shares")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (user, shares) = row?;
            user_shares.push((user, parse_decimal(&shares)?));
        }

        let mut adapters = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT id, weight_bps, active, invested, added_at, removed_at FROM adapters",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        for row in rows {
            let (id, weight_bps, active, invested, added_at, removed_at) = row?;
            adapters.push(AdapterRecord {
                id,
                weight_bps,
                active: active != 0,
                invested: parse_decimal(&invested)?,
                added_at: parse_timestamp(&added_at)?,
                removed_at: removed_at.as_deref().map(parse_timestamp).transpose()?,
            });
        }

        let mut reservations = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT user, asset, amount FROM reservations")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (user, asset, amount) = row?;
            reservations.push((user, asset, parse_decimal(&amount)?));
        }

        Ok(Some(VaultSnapshot {
            asset_symbol,
            captured_at: parse_timestamp(&captured_at)?,
            idle: parse_decimal(&idle)?,
            total_shares: parse_decimal(&total_shares)?,
            total_deposits: parse_decimal(&total_deposits)?,
            total_rewards_harvested: parse_decimal(&rewards)?,
            paused: paused != 0,
            user_shares,
            adapters,
            reservations,
        }))
    }

    /// Append a harvest event.
    pub fn record_harvest(
        &self,
        adapter_id: &str,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO harvest_events (timestamp, adapter_id, amount) VALUES (?1, ?2, ?3)",
            params![timestamp.to_rfc3339(), adapter_id, amount.to_string()],
        )?;
        Ok(())
    }

    /// Most recent harvest events, newest first.
    pub fn recent_harvests(&self, limit: u32) -> Result<Vec<HarvestEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, adapter_id, amount FROM harvest_events
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (timestamp, adapter_id, amount) = row?;
            events.push(HarvestEvent {
                timestamp: parse_timestamp(&timestamp)?,
                adapter_id,
                amount: parse_decimal(&amount)?,
            });
        }
        Ok(events)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Invalid decimal in database: {s}"))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {s}"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_snapshot() -> VaultSnapshot {
        VaultSnapshot {
            asset_symbol: "USDC".to_string(),
            captured_at: Utc::now(),
            idle: dec!(250),
            total_shares: dec!(1500),
            total_deposits: dec!(1500),
            total_rewards_harvested: dec!(42),
            paused: false,
            user_shares: vec![
                ("alice".to_string(), dec!(1000)),
                ("bob".to_string(), dec!(500)),
            ],
            adapters: vec![AdapterRecord {
                id: "lending".to_string(),
                weight_bps: 6000,
                active: true,
                invested: dec!(1250),
                added_at: Utc::now(),
                removed_at: None,
            }],
            reservations: vec![("alice".to_string(), "USDC".to_string(), dec!(200))],
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut persistence = PersistenceManager::in_memory().unwrap();
        persistence.save_snapshot(&sample_snapshot()).unwrap();

        let loaded = persistence.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.asset_symbol, "USDC");
        assert_eq!(loaded.idle, dec!(250));
        assert_eq!(loaded.total_shares, dec!(1500));
        assert_eq!(loaded.user_shares.len(), 2);
        assert_eq!(loaded.adapters[0].id, "lending");
        assert_eq!(loaded.adapters[0].invested, dec!(1250));
        assert_eq!(loaded.reservations[0].2, dec!(200));
    }

    #[test]
    fn test_empty_database_loads_none() {
        let persistence = PersistenceManager::in_memory().unwrap();
        assert!(persistence.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let mut persistence = PersistenceManager::in_memory().unwrap();
        persistence.save_snapshot(&sample_snapshot()).unwrap();

        let mut updated = sample_snapshot();
        updated.user_shares = vec![("alice".to_string(), dec!(900))];
        updated.idle = dec!(300);
        persistence.save_snapshot(&updated).unwrap();

        let loaded = persistence.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.idle, dec!(300));
        assert_eq!(loaded.user_shares.len(), 1);
    }

    #[test]
    fn test_harvest_history() {
        let persistence = PersistenceManager::in_memory().unwrap();
        persistence
            .record_harvest("lending", dec!(10), Utc::now())
            .unwrap();
        persistence
            .record_harvest("staking", dec!(5), Utc::now())
            .unwrap();

        let events = persistence.recent_harvests(10).unwrap();
        assert_eq!(events.len(), 2);
        let total: Decimal = events.iter().map(|e| e.amount).sum();
        assert_eq!(total, dec!(15));
    }
}
