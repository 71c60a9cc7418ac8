//! Insurance rate table.
//!
//! Read-only tier catalog shared by every quoting thread. Reads take an
//! `Arc` snapshot; [`InsuranceRateTable::reload`] validates a replacement
//! catalog and swaps it in under a short write lock.

use std::sync::{Arc, PoisonError, RwLock};

use orderguard_types::{
    InsuranceTier, InsuranceTierDefinition, OrderguardError, Result, TierCatalogConfig,
};
use rust_decimal::Decimal;

#[derive(Debug)]
pub struct InsuranceRateTable {
    catalog: RwLock<Arc<Vec<InsuranceTierDefinition>>>,
}

impl InsuranceRateTable {
    pub fn new(config: TierCatalogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog: RwLock::new(Arc::new(config.0)),
        })
    }

    /// Current catalog.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<InsuranceTierDefinition>> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Terms of a named tier.
    pub fn get(&self, tier: InsuranceTier) -> Result<InsuranceTierDefinition> {
        self.snapshot()
            .iter()
            .find(|def| def.id == tier)
            .cloned()
            .ok_or_else(|| OrderguardError::InvalidRequest {
                reason: format!("insurance tier {tier} is not offered"),
            })
    }

    /// Cheapest tier (lowest commission) covering at least `desired`.
    pub fn cheapest_covering(&self, desired: Decimal) -> Result<InsuranceTierDefinition> {
        self.snapshot()
            .iter()
            .filter(|def| def.coverage >= desired)
            .min_by(|a, b| {
                a.commission_rate
                    .cmp(&b.commission_rate)
                    .then(a.id.cmp(&b.id))
            })
            .cloned()
            .ok_or(OrderguardError::NoEligibleTier { desired })
    }

    /// Validate and swap in a new catalog. The old one stays on error.
    pub fn reload(&self, config: TierCatalogConfig) -> Result<()> {
        config.validate()?;
        let tiers = config.0.len();
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config.0);
        tracing::info!(tiers, "Insurance tier catalog reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InsuranceRateTable {
        InsuranceRateTable::new(TierCatalogConfig::default()).unwrap()
    }

    #[test]
    fn cheapest_tier_meeting_coverage() {
        let t = table();
        assert_eq!(
            t.cheapest_covering(Decimal::new(60, 2)).unwrap().id,
            InsuranceTier::Extended
        );
        assert_eq!(
            t.cheapest_covering(Decimal::ZERO).unwrap().id,
            InsuranceTier::Basic
        );
        assert_eq!(
            t.cheapest_covering(Decimal::ONE).unwrap().id,
            InsuranceTier::Corporate
        );
    }

    #[test]
    fn no_tier_covers_more_than_everything() {
        let err = table().cheapest_covering(Decimal::new(101, 2)).unwrap_err();
        assert!(matches!(err, OrderguardError::NoEligibleTier { .. }));
    }

    #[test]
    fn reload_swaps_catalog() {
        let t = table();
        let before = t.snapshot();
        let mut tiers = InsuranceTierDefinition::default_catalog();
        tiers.retain(|d| d.id != InsuranceTier::Basic);
        t.reload(TierCatalogConfig(tiers)).unwrap();
        assert!(t.get(InsuranceTier::Basic).is_err());
        // Readers holding the old snapshot are unaffected.
        assert_eq!(before.len(), 4);
    }

    #[test]
    fn invalid_reload_keeps_old_catalog() {
        let t = table();
        let mut tiers = InsuranceTierDefinition::default_catalog();
        tiers[0].commission_rate = Decimal::new(50, 2);
        assert!(t.reload(TierCatalogConfig(tiers)).is_err());
        assert_eq!(t.get(InsuranceTier::Basic).unwrap().commission_rate, Decimal::new(5, 2));
    }
}
