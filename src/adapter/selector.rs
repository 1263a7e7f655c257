//! Health-aware protocol selection for multiplexed adapters.
//!
//! Some strategies integrate several interchangeable protocols behind a
//! single adapter slot. Selection policy: a healthy designated default wins;
//! otherwise the first healthy protocol in registration order; if nothing is
//! healthy, the (unhealthy) default is returned so the caller's next
//! operation fails loudly instead of silently doing nothing.

use crate::adapter::YieldAdapter;
use crate::utils::decimal::weighted_average;
use crate::vault::VaultError;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// One protocol registered under a multiplexing adapter. Independent of the
/// vault's adapter registry records.
#[derive(Clone)]
pub struct ProtocolEntry {
    pub name: String,
    pub handle: Arc<dyn YieldAdapter>,
    pub weight_bps: u32,
    pub is_default: bool,
}

/// Chooses one live protocol among several registered alternatives.
#[derive(Default)]
pub struct ProtocolSelector {
    entries: Vec<ProtocolEntry>,
}

impl ProtocolSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol. Order of registration is the fallback scan
    /// order.
    pub fn register(
        &mut self,
        name: &str,
        handle: Arc<dyn YieldAdapter>,
        weight_bps: u32,
    ) -> Result<(), VaultError> {
        if name.is_empty() {
            return Err(VaultError::EmptyAdapterId);
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(VaultError::DuplicateAdapter(name.to_string()));
        }
        self.entries.push(ProtocolEntry {
            name: name.to_string(),
            handle,
            weight_bps,
            is_default: false,
        });
        Ok(())
    }

    /// Designate the default protocol. Clears any previous default.
    pub fn set_default(&mut self, name: &str) -> Result<(), VaultError> {
        if !self.entries.iter().any(|e| e.name == name) {
            return Err(VaultError::AdapterNotFound(name.to_string()));
        }
        for entry in &mut self.entries {
            entry.is_default = entry.name == name;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ProtocolEntry] {
        &self.entries
    }

    fn default_entry(&self) -> Option<&ProtocolEntry> {
        self.entries.iter().find(|e| e.is_default)
    }

    /// Probe a protocol's health. A failed probe counts as unhealthy.
    async fn is_healthy(entry: &ProtocolEntry) -> bool {
        match entry.handle.is_active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(protocol = %entry.name, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Select the protocol to operate against.
    ///
    /// Returns the unhealthy default as a last resort; errs only when no
    /// default exists to fall back on.
    pub async fn select(&self) -> Result<&ProtocolEntry, VaultError> {
        if let Some(default) = self.default_entry() {
            if Self::is_healthy(default).await {
                return Ok(default);
            }
            debug!(protocol = %default.name, "Default protocol unhealthy, scanning fallbacks");
        }

        for entry in &self.entries {
            if Self::is_healthy(entry).await {
                debug!(protocol = %entry.name, "Selected fallback protocol");
                return Ok(entry);
            }
        }

        match self.default_entry() {
            Some(default) => {
                warn!(
                    protocol = %default.name,
                    "No healthy protocol; returning unhealthy default"
                );
                Ok(default)
            }
            None => Err(VaultError::NoProtocolAvailable),
        }
    }
}

/// A single vault adapter multiplexing several underlying protocols.
///
/// Mutating operations go to the selected protocol; valuations aggregate
/// over every registered protocol, since earlier selections may have left
/// funds in protocols that are no longer preferred.
pub struct MultiProtocolAdapter {
    name: String,
    selector: ProtocolSelector,
}

impl MultiProtocolAdapter {
    pub fn new(name: &str, selector: ProtocolSelector) -> Self {
        Self {
            name: name.to_string(),
            selector,
        }
    }

    pub fn selector(&self) -> &ProtocolSelector {
        &self.selector
    }

    async fn selected(&self) -> Result<&ProtocolEntry> {
        Ok(self.selector.select().await?)
    }
}

#[async_trait]
impl YieldAdapter for MultiProtocolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deposit(&self, amount: Decimal) -> Result<Decimal> {
        let entry = self.selected().await?;
        entry.handle.deposit(amount).await
    }

    async fn withdraw(&self, shares: Decimal) -> Result<Decimal> {
        let entry = self.selected().await?;
        entry.handle.withdraw(shares).await
    }

    async fn harvest(&self) -> Result<Decimal> {
        let entry = self.selected().await?;
        entry.handle.harvest().await
    }

    async fn emergency_exit(&self) -> Result<Decimal> {
        // Drain every protocol, not just the selected one.
        let mut recovered = Decimal::ZERO;
        for entry in self.selector.entries() {
            match entry.handle.emergency_exit().await {
                Ok(amount) => recovered += amount,
                Err(e) => {
                    warn!(protocol = %entry.name, error = %e, "Emergency exit failed")
                }
            }
        }
        Ok(recovered)
    }

    async fn total_assets(&self) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for entry in self.selector.entries() {
            match entry.handle.total_assets().await {
                Ok(assets) => total += assets,
                Err(e) => warn!(protocol = %entry.name, error = %e, "Valuation failed"),
            }
        }
        Ok(total)
    }

    async fn total_shares(&self) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for entry in self.selector.entries() {
            match entry.handle.total_shares().await {
                Ok(shares) => total += shares,
                Err(e) => warn!(protocol = %entry.name, error = %e, "Valuation failed"),
            }
        }
        Ok(total)
    }

    async fn convert_to_shares(&self, amount: Decimal) -> Result<Decimal> {
        let entry = self.selected().await?;
        entry.handle.convert_to_shares(amount).await
    }

    async fn convert_to_assets(&self, shares: Decimal) -> Result<Decimal> {
        let entry = self.selected().await?;
        entry.handle.convert_to_assets(shares).await
    }

    async fn apy_bps(&self) -> Result<Decimal> {
        // Asset-weighted APY over the protocols; a failing probe counts as
        // zero yield.
        let mut pairs = Vec::new();
        for entry in self.selector.entries() {
            let assets = entry.handle.total_assets().await.unwrap_or(Decimal::ZERO);
            let apy = entry.handle.apy_bps().await.unwrap_or(Decimal::ZERO);
            pairs.push((apy, assets));
        }
        Ok(weighted_average(&pairs))
    }

    async fn pending_rewards(&self) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for entry in self.selector.entries() {
            total += entry
                .handle
                .pending_rewards()
                .await
                .unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }

    async fn is_active(&self) -> Result<bool> {
        for entry in self.selector.entries() {
            if ProtocolSelector::is_healthy(entry).await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;
    use rust_decimal_macros::dec;

    async fn protocol(name: &str, healthy: bool) -> Arc<MockAdapter> {
        let adapter = Arc::new(MockAdapter::new(name));
        adapter.set_active(healthy).await;
        adapter
    }

    #[tokio::test]
    async fn test_healthy_default_wins() {
        let mut selector = ProtocolSelector::new();
        selector
            .register("alpha", protocol("alpha", true).await, 5000)
            .unwrap();
        selector
            .register("beta", protocol("beta", true).await, 5000)
            .unwrap();
        selector.set_default("beta").unwrap();

        assert_eq!(selector.select().await.unwrap().name, "beta");
    }

    #[tokio::test]
    async fn test_falls_back_to_first_healthy_in_order() {
        let mut selector = ProtocolSelector::new();
        selector
            .register("alpha", protocol("alpha", false).await, 5000)
            .unwrap();
        selector
            .register("beta", protocol("beta", true).await, 3000)
            .unwrap();
        selector
            .register("gamma", protocol("gamma", true).await, 2000)
            .unwrap();
        selector.set_default("alpha").unwrap();

        // Default is down; beta precedes gamma in registration order.
        assert_eq!(selector.select().await.unwrap().name, "beta");
    }

    #[tokio::test]
    async fn test_unhealthy_default_returned_when_nothing_is_healthy() {
        let mut selector = ProtocolSelector::new();
        selector
            .register("alpha", protocol("alpha", false).await, 5000)
            .unwrap();
        selector
            .register("beta", protocol("beta", false).await, 5000)
            .unwrap();
        selector.set_default("alpha").unwrap();

        // The caller's subsequent operation will fail loudly against alpha.
        assert_eq!(selector.select().await.unwrap().name, "alpha");
    }

    #[tokio::test]
    async fn test_no_default_and_nothing_healthy_errors() {
        let mut selector = ProtocolSelector::new();
        selector
            .register("alpha", protocol("alpha", false).await, 5000)
            .unwrap();

        assert!(matches!(
            selector.select().await,
            Err(VaultError::NoProtocolAvailable)
        ));
    }

    #[tokio::test]
    async fn test_failed_probe_counts_as_unhealthy() {
        let broken = protocol("alpha", true).await;
        broken.fail_queries(true).await;

        let mut selector = ProtocolSelector::new();
        selector.register("alpha", broken, 5000).unwrap();
        selector
            .register("beta", protocol("beta", true).await, 5000)
            .unwrap();
        selector.set_default("alpha").unwrap();

        assert_eq!(selector.select().await.unwrap().name, "beta");
    }

    #[tokio::test]
    async fn test_multiplexed_valuation_spans_all_protocols() {
        let alpha = protocol("alpha", true).await;
        let beta = protocol("beta", true).await;
        alpha.deposit(dec!(600)).await.unwrap();
        beta.deposit(dec!(400)).await.unwrap();

        let mut selector = ProtocolSelector::new();
        selector.register("alpha", alpha, 5000).unwrap();
        selector.register("beta", beta.clone(), 5000).unwrap();
        let multi = MultiProtocolAdapter::new("multi", selector);

        assert_eq!(multi.total_assets().await.unwrap(), dec!(1000));

        // A protocol dropping off the network reduces, not aborts, the total.
        beta.fail_queries(true).await;
        assert_eq!(multi.total_assets().await.unwrap(), dec!(600));
    }
}
