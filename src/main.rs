//! Yield Vault - Main Entry Point
//!
//! Runs the vault service loop, a scripted simulation over mock adapters,
//! or a status report from the persisted snapshot.

use anyhow::Result;
use clap::{Parser, Subcommand};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use yield_vault::adapter::{LendingPoolAdapter, LendingPoolConfig, MockAdapter, YieldAdapter};
use yield_vault::config::Config;
use yield_vault::persistence::PersistenceManager;
use yield_vault::vault::{Vault, VaultError};

/// Yield Vault CLI
#[derive(Parser)]
#[command(name = "yield-vault")]
#[command(version, about = "Pooled yield vault with multi-adapter allocation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the vault service loop (harvest, rebalance, snapshots)
    Run,

    /// Run a scripted simulation over mock adapters
    Simulate {
        /// Initial deposit per simulated user
        #[arg(short, long, default_value = "10000")]
        deposit: u64,

        /// Number of yield/harvest cycles to simulate
        #[arg(short, long, default_value = "6")]
        cycles: u32,
    },

    /// Print the persisted vault snapshot
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {e:#}");
        Config::default()
    });
    config.validate()?;

    match cli.command {
        Some(Commands::Simulate { deposit, cycles }) => {
            simulate(&config, Decimal::from(deposit), cycles).await
        }
        Some(Commands::Status) => status(&config),
        Some(Commands::Run) | None => run_service(&config).await,
    }
}

/// Build the vault and register configured adapters.
async fn build_vault(config: &Config) -> Result<Vault> {
    let vault = Vault::new(
        &config.vault.asset_symbol,
        &config.vault.admin,
        &config.allocation,
    );
    let admin = config.vault.admin.as_str();

    if config.lending.base_url.is_empty() {
        info!("No lending pool configured; registering mock adapters");
        vault
            .add_adapter(admin, "mock-a", 4000, Arc::new(MockAdapter::new("mock-a")))
            .await?;
        vault
            .add_adapter(admin, "mock-b", 6000, Arc::new(MockAdapter::new("mock-b")))
            .await?;
    } else {
        let adapter = LendingPoolAdapter::new(
            "lending",
            LendingPoolConfig {
                base_url: config.lending.base_url.clone(),
                api_key: config.lending.api_key.clone(),
                api_secret: config.lending.api_secret.clone(),
                account: config.lending.account.clone(),
            },
        )?;
        vault
            .add_adapter(admin, "lending", 10_000, Arc::new(adapter))
            .await?;
    }

    Ok(vault)
}

/// Service loop: periodic harvest, rebalance attempts, and snapshots.
async fn run_service(config: &Config) -> Result<()> {
    let vault = build_vault(config).await?;
    let admin = config.vault.admin.as_str();
    let mut persistence = PersistenceManager::new(&config.service.db_path)?;

    if let Some(snapshot) = persistence.load_snapshot()? {
        info!(
            captured_at = %snapshot.captured_at,
            total_shares = %snapshot.total_shares,
            "Restoring persisted vault state"
        );
        vault.restore(&snapshot).await;
    }

    let mut harvest_timer =
        tokio::time::interval(Duration::from_secs(config.service.harvest_interval_secs));
    let mut rebalance_timer = tokio::time::interval(Duration::from_secs(
        config.service.rebalance_check_interval_secs,
    ));

    info!(
        asset = %vault.asset_symbol(),
        harvest_interval = config.service.harvest_interval_secs,
        "Vault service started"
    );

    loop {
        tokio::select! {
            _ = harvest_timer.tick() => {
                match vault.harvest_all(admin).await {
                    Ok(report) => {
                        for outcome in &report.outcomes {
                            if outcome.error.is_none() {
                                persistence.record_harvest(
                                    &outcome.adapter_id,
                                    outcome.achieved,
                                    Utc::now(),
                                )?;
                            }
                        }
                        if report.harvested > Decimal::ZERO {
                            info!(harvested = %report.harvested, "Harvest pass collected rewards");
                        }
                    }
                    Err(VaultError::Paused) => warn!("Harvest skipped: vault paused"),
                    Err(e) => error!("Harvest pass failed: {e}"),
                }
                persistence.save_snapshot(&vault.snapshot().await)?;
            }
            _ = rebalance_timer.tick() => {
                match vault.rebalance(admin).await {
                    Ok(report) => info!(
                        withdrawn = %report.withdrawn,
                        reinvested = %report.investment.invested,
                        "Rebalanced"
                    ),
                    Err(VaultError::RebalanceCooldown { remaining_secs }) => {
                        info!(remaining_secs, "Rebalance on cooldown");
                    }
                    Err(VaultError::Paused) => warn!("Rebalance skipped: vault paused"),
                    Err(e) => error!("Rebalance failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, saving final snapshot");
                persistence.save_snapshot(&vault.snapshot().await)?;
                break;
            }
        }
    }

    Ok(())
}

/// Scripted scenario over mock adapters: deposits, yield, harvests, a
/// rental reservation, and withdrawals.
async fn simulate(config: &Config, deposit: Decimal, cycles: u32) -> Result<()> {
    let vault = Vault::new(
        &config.vault.asset_symbol,
        &config.vault.admin,
        &config.allocation,
    );
    let admin = config.vault.admin.as_str();

    let fast = Arc::new(MockAdapter::new("fast-pool"));
    let steady = Arc::new(MockAdapter::new("steady-pool"));
    fast.set_apy_bps(Decimal::from(900u32)).await;
    steady.set_apy_bps(Decimal::from(450u32)).await;
    vault.add_adapter(admin, "fast-pool", 4000, fast.clone()).await?;
    vault
        .add_adapter(admin, "steady-pool", 6000, steady.clone())
        .await?;

    for user in ["alice", "bob", "carol"] {
        let receipt = vault.deposit(user, deposit, true).await?;
        info!(user, shares = %receipt.shares_minted, "Simulated deposit");
    }

    // Earmark part of alice's balance as a rental deposit.
    vault
        .reserve_funds(admin, "alice", deposit / Decimal::from(10u32), "device rental")
        .await?;

    for cycle in 1..=cycles {
        // ~0.1% of deployed value per cycle, plus queued rewards.
        let fast_value = fast.total_assets().await.unwrap_or(Decimal::ZERO);
        let steady_value = steady.total_assets().await.unwrap_or(Decimal::ZERO);
        fast.accrue_yield(fast_value / Decimal::from(1000u32)).await;
        steady
            .accrue_yield(steady_value / Decimal::from(1000u32))
            .await;
        fast.set_pending_rewards(Decimal::from(5u32)).await;

        let report = vault.harvest_all(admin).await?;
        info!(cycle, harvested = %report.harvested, "Simulated cycle");
    }

    // Rental settles cleanly: release the earmark, then exit.
    vault
        .release_funds(admin, "alice", deposit / Decimal::from(10u32), "rental returned")
        .await?;
    let shares = vault.shares_of("alice").await;
    let outcome = vault.withdraw("alice", shares).await?;

    info!(
        total_assets = %vault.total_assets().await,
        total_shares = %vault.total_shares().await,
        rewards = %vault.total_rewards_harvested().await,
        apy_bps = %vault.weighted_apy_bps().await,
        alice_paid = %outcome.paid,
        "Simulation complete"
    );
    Ok(())
}

/// Print the persisted snapshot.
fn status(config: &Config) -> Result<()> {
    let persistence = PersistenceManager::new(&config.service.db_path)?;
    match persistence.load_snapshot()? {
        Some(snapshot) => {
            println!("Vault snapshot ({})", snapshot.captured_at);
            println!("  asset:            {}", snapshot.asset_symbol);
            println!("  idle balance:     {}", snapshot.idle);
            println!("  total shares:     {}", snapshot.total_shares);
            println!("  total deposits:   {}", snapshot.total_deposits);
            println!("  rewards to date:  {}", snapshot.total_rewards_harvested);
            println!("  paused:           {}", snapshot.paused);
            println!("  holders:          {}", snapshot.user_shares.len());
            for record in &snapshot.adapters {
                println!(
                    "  adapter {}: weight={}bps active={} invested={}",
                    record.id, record.weight_bps, record.active, record.invested
                );
            }
            for (user, asset, amount) in &snapshot.reservations {
                println!("  reservation {user}/{asset}: {amount}");
            }
        }
        None => println!("No persisted vault state at {}", config.service.db_path),
    }
    Ok(())
}
