//! Ordered registry of yield adapters.
//!
//! Each registered adapter carries a weight in basis points, an active flag,
//! and a locally tracked invested amount. Removal is soft: the record keeps
//! its removal timestamp and stops participating in allocation.

use crate::adapter::YieldAdapter;
use crate::vault::VaultError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Registration record for one adapter.
#[derive(Debug, Clone)]
pub struct AdapterRecord {
    pub id: String,
    /// Allocation weight in basis points (0..=10000).
    pub weight_bps: u32,
    pub active: bool,
    /// Underlying amount pushed into this adapter and not yet pulled back,
    /// tracked locally (the adapter's own valuation may drift with yield).
    pub invested: Decimal,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

/// Snapshot of one active adapter used by allocation loops.
#[derive(Clone)]
pub struct ActiveAdapter {
    pub id: String,
    pub weight_bps: u32,
    pub invested: Decimal,
    pub handle: Arc<dyn YieldAdapter>,
}

struct Entry {
    record: AdapterRecord,
    handle: Arc<dyn YieldAdapter>,
}

/// Ordered collection of registered adapters.
pub struct AdapterRegistry {
    entries: Vec<Entry>,
    enforce_weight_cap: bool,
}

impl AdapterRegistry {
    /// Cumulative active weight ceiling when the cap is enforced.
    pub const WEIGHT_CAP_BPS: u32 = 10_000;

    pub fn new(enforce_weight_cap: bool) -> Self {
        Self {
            entries: Vec::new(),
            enforce_weight_cap,
        }
    }

    /// Register a new adapter. Rejects empty ids, zero weights, duplicate
    /// ids, and (when the cap is enforced) cumulative active weight above
    /// 10000 bps.
    pub fn add(
        &mut self,
        id: &str,
        weight_bps: u32,
        handle: Arc<dyn YieldAdapter>,
    ) -> Result<(), VaultError> {
        if id.is_empty() {
            return Err(VaultError::EmptyAdapterId);
        }
        if weight_bps == 0 {
            return Err(VaultError::ZeroWeight);
        }
        if self.entries.iter().any(|e| e.record.id == id) {
            return Err(VaultError::DuplicateAdapter(id.to_string()));
        }
        self.check_weight_cap(self.total_active_weight() + weight_bps)?;

        self.entries.push(Entry {
            record: AdapterRecord {
                id: id.to_string(),
                weight_bps,
                active: true,
                invested: Decimal::ZERO,
                added_at: Utc::now(),
                removed_at: None,
            },
            handle,
        });
        debug!(adapter = id, weight_bps, "Adapter registered");
        Ok(())
    }

    /// Soft-remove an adapter: inactive, weight zeroed, removal stamped.
    /// Divestment of its holdings is the caller's responsibility and happens
    /// before this is called.
    pub fn mark_removed(&mut self, id: &str) -> Result<(), VaultError> {
        let entry = self.entry_mut(id)?;
        entry.record.active = false;
        entry.record.weight_bps = 0;
        entry.record.removed_at = Some(Utc::now());
        Ok(())
    }

    /// Update an adapter's allocation weight.
    pub fn set_weight(&mut self, id: &str, weight_bps: u32) -> Result<(), VaultError> {
        if weight_bps == 0 {
            return Err(VaultError::ZeroWeight);
        }
        let current = self.entry(id)?.record.weight_bps;
        let others = self.total_active_weight() - self.active_weight_of(id).unwrap_or(0);
        if self.entry(id)?.record.active {
            self.check_weight_cap(others + weight_bps)?;
        }
        let entry = self.entry_mut(id)?;
        entry.record.weight_bps = weight_bps;
        debug!(adapter = id, from = current, to = weight_bps, "Adapter reweighted");
        Ok(())
    }

    /// Toggle an adapter's active flag. Reactivation re-checks the weight
    /// cap; removed adapters cannot be reactivated.
    pub fn set_active(&mut self, id: &str, active: bool) -> Result<(), VaultError> {
        let entry = self.entry(id)?;
        if entry.record.removed_at.is_some() {
            return Err(VaultError::AdapterNotFound(id.to_string()));
        }
        if active && !entry.record.active {
            self.check_weight_cap(self.total_active_weight() + entry.record.weight_bps)?;
        }
        self.entry_mut(id)?.record.active = active;
        Ok(())
    }

    /// Record underlying pushed into an adapter.
    pub fn record_invest(&mut self, id: &str, amount: Decimal) {
        if let Ok(entry) = self.entry_mut(id) {
            entry.record.invested += amount;
        }
    }

    /// Record underlying pulled back out of an adapter. Saturates at zero:
    /// yield can make the divested amount exceed the tracked principal.
    pub fn record_divest(&mut self, id: &str, amount: Decimal) {
        if let Ok(entry) = self.entry_mut(id) {
            entry.record.invested = (entry.record.invested - amount).max(Decimal::ZERO);
        }
    }

    /// Restore a persisted invested counter.
    pub fn restore_invested(&mut self, id: &str, invested: Decimal) -> Result<(), VaultError> {
        self.entry_mut(id)?.record.invested = invested;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.record.id == id)
    }

    pub fn record(&self, id: &str) -> Result<&AdapterRecord, VaultError> {
        self.entry(id).map(|e| &e.record)
    }

    pub fn handle(&self, id: &str) -> Result<Arc<dyn YieldAdapter>, VaultError> {
        self.entry(id).map(|e| Arc::clone(&e.handle))
    }

    /// All records in registration order, removed ones included.
    pub fn records(&self) -> impl Iterator<Item = &AdapterRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    /// Active adapters in registration order, snapshotted for allocation
    /// loops that mutate the registry while iterating adapter calls.
    pub fn active_snapshot(&self) -> Vec<ActiveAdapter> {
        self.entries
            .iter()
            .filter(|e| e.record.active)
            .map(|e| ActiveAdapter {
                id: e.record.id.clone(),
                weight_bps: e.record.weight_bps,
                invested: e.record.invested,
                handle: Arc::clone(&e.handle),
            })
            .collect()
    }

    pub fn has_active(&self) -> bool {
        self.entries.iter().any(|e| e.record.active)
    }

    /// Sum of active adapters' weights in basis points.
    pub fn total_active_weight(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.record.active)
            .map(|e| e.record.weight_bps)
            .sum()
    }

    /// Sum of locally tracked invested amounts across active adapters.
    pub fn total_invested(&self) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.record.active)
            .map(|e| e.record.invested)
            .sum()
    }

    fn active_weight_of(&self, id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.record.id == id && e.record.active)
            .map(|e| e.record.weight_bps)
    }

    fn check_weight_cap(&self, total_bps: u32) -> Result<(), VaultError> {
        if self.enforce_weight_cap && total_bps > Self::WEIGHT_CAP_BPS {
            return Err(VaultError::WeightCapExceeded { total_bps });
        }
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<&Entry, VaultError> {
        self.entries
            .iter()
            .find(|e| e.record.id == id)
            .ok_or_else(|| VaultError::AdapterNotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, VaultError> {
        self.entries
            .iter_mut()
            .find(|e| e.record.id == id)
            .ok_or_else(|| VaultError::AdapterNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    fn adapter(name: &str) -> Arc<dyn YieldAdapter> {
        Arc::new(MockAdapter::new(name))
    }

    #[test]
    fn test_add_rejects_invalid_registrations() {
        let mut registry = AdapterRegistry::new(true);
        assert!(matches!(
            registry.add("", 5000, adapter("a")),
            Err(VaultError::EmptyAdapterId)
        ));
        assert!(matches!(
            registry.add("a", 0, adapter("a")),
            Err(VaultError::ZeroWeight)
        ));

        registry.add("a", 5000, adapter("a")).unwrap();
        assert!(matches!(
            registry.add("a", 1000, adapter("a")),
            Err(VaultError::DuplicateAdapter(_))
        ));
    }

    #[test]
    fn test_weight_cap_enforced() {
        let mut registry = AdapterRegistry::new(true);
        registry.add("a", 6000, adapter("a")).unwrap();
        assert!(matches!(
            registry.add("b", 5000, adapter("b")),
            Err(VaultError::WeightCapExceeded { total_bps: 11000 })
        ));
        registry.add("b", 4000, adapter("b")).unwrap();
    }

    #[test]
    fn test_weight_cap_relaxed_variant() {
        let mut registry = AdapterRegistry::new(false);
        registry.add("a", 6000, adapter("a")).unwrap();
        registry.add("b", 9000, adapter("b")).unwrap();
        assert_eq!(registry.total_active_weight(), 15000);
    }

    #[test]
    fn test_mark_removed_zeroes_weight() {
        let mut registry = AdapterRegistry::new(true);
        registry.add("a", 5000, adapter("a")).unwrap();
        registry.mark_removed("a").unwrap();

        let record = registry.record("a").unwrap();
        assert!(!record.active);
        assert_eq!(record.weight_bps, 0);
        assert!(record.removed_at.is_some());
        assert!(!registry.has_active());

        // Soft removal: record stays, reactivation is refused.
        assert!(registry.contains("a"));
        assert!(registry.set_active("a", true).is_err());
    }

    #[test]
    fn test_reweight_respects_cap_against_other_adapters() {
        let mut registry = AdapterRegistry::new(true);
        registry.add("a", 6000, adapter("a")).unwrap();
        registry.add("b", 4000, adapter("b")).unwrap();

        assert!(matches!(
            registry.set_weight("b", 5000),
            Err(VaultError::WeightCapExceeded { .. })
        ));
        registry.set_weight("a", 5000).unwrap();
        registry.set_weight("b", 5000).unwrap();
    }

    #[test]
    fn test_invested_counters_saturate() {
        let mut registry = AdapterRegistry::new(true);
        registry.add("a", 5000, adapter("a")).unwrap();

        registry.record_invest("a", rust_decimal_macros::dec!(100));
        registry.record_divest("a", rust_decimal_macros::dec!(150));
        assert_eq!(registry.record("a").unwrap().invested, Decimal::ZERO);
    }

    #[test]
    fn test_deactivated_adapter_excluded_from_snapshot() {
        let mut registry = AdapterRegistry::new(true);
        registry.add("a", 5000, adapter("a")).unwrap();
        registry.add("b", 5000, adapter("b")).unwrap();
        registry.set_active("a", false).unwrap();

        let snapshot = registry.active_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "b");
        assert_eq!(registry.total_active_weight(), 5000);
    }
}
