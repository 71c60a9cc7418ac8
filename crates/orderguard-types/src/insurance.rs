//! Insurance tiers and quotes.
//!
//! Tier definitions are static reference data; quotes are per-request and
//! carry a hard redemption deadline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, OrderId, OrderguardError, QuoteId, Result, RiskGrade};

/// Named coverage plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsuranceTier {
    Basic,
    Extended,
    Premium,
    Corporate,
}

impl InsuranceTier {
    pub const ALL: [Self; 4] = [Self::Basic, Self::Extended, Self::Premium, Self::Corporate];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Extended => "extended",
            Self::Premium => "premium",
            Self::Corporate => "corporate",
        }
    }
}

impl fmt::Display for InsuranceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsuranceTier {
    type Err = OrderguardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "insurance tier",
                value: s.to_string(),
            })
    }
}

/// Terms of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceTierDefinition {
    pub id: InsuranceTier,
    /// Fraction of the escrow covered, `[0, 1]`.
    pub coverage: Decimal,
    /// Premium rate on the escrow amount, `[0.05, 0.12]`.
    pub commission_rate: Decimal,
    /// Extra escrow demanded in lieu of cash premium, `[0.1, 0.3]`.
    pub escrow_multiplier: Decimal,
    #[serde(default)]
    pub bonus_reputation: Option<u32>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl InsuranceTierDefinition {
    /// Check every bound.
    pub fn validate(&self) -> Result<()> {
        let bad = |what: &str, value: Decimal| {
            Err(OrderguardError::Configuration(format!(
                "tier {}: {what} {value} out of range",
                self.id
            )))
        };
        if self.coverage < Decimal::ZERO || self.coverage > Decimal::ONE {
            return bad("coverage", self.coverage);
        }
        let commission_min = Decimal::new(constants::COMMISSION_RATE_MIN_BPS, 4);
        let commission_max = Decimal::new(constants::COMMISSION_RATE_MAX_BPS, 4);
        if self.commission_rate < commission_min || self.commission_rate > commission_max {
            return bad("commission rate", self.commission_rate);
        }
        let multiplier_min = Decimal::new(constants::ESCROW_MULTIPLIER_MIN_BPS, 4);
        let multiplier_max = Decimal::new(constants::ESCROW_MULTIPLIER_MAX_BPS, 4);
        if self.escrow_multiplier < multiplier_min || self.escrow_multiplier > multiplier_max {
            return bad("escrow multiplier", self.escrow_multiplier);
        }
        Ok(())
    }

    /// The stock catalog shipped with the engine.
    #[must_use]
    pub fn default_catalog() -> Vec<Self> {
        vec![
            Self {
                id: InsuranceTier::Basic,
                coverage: Decimal::new(50, 2),
                commission_rate: Decimal::new(5, 2),
                escrow_multiplier: Decimal::new(10, 2),
                bonus_reputation: None,
                conditions: vec!["Covers non-delivery only".to_string()],
            },
            Self {
                id: InsuranceTier::Extended,
                coverage: Decimal::new(75, 2),
                commission_rate: Decimal::new(7, 2),
                escrow_multiplier: Decimal::new(15, 2),
                bonus_reputation: None,
                conditions: vec!["Covers non-delivery and late delivery".to_string()],
            },
            Self {
                id: InsuranceTier::Premium,
                coverage: Decimal::new(90, 2),
                commission_rate: Decimal::new(9, 2),
                escrow_multiplier: Decimal::new(20, 2),
                bonus_reputation: Some(5),
                conditions: vec!["Covers disputes decided by arbitration".to_string()],
            },
            Self {
                id: InsuranceTier::Corporate,
                coverage: Decimal::ONE,
                commission_rate: Decimal::new(12, 2),
                escrow_multiplier: Decimal::new(30, 2),
                bonus_reputation: Some(15),
                conditions: vec![
                    "Full coverage".to_string(),
                    "Requires a registered corporation".to_string(),
                ],
            },
        ]
    }
}

/// A discount that reduced the premium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub name: String,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// What the quoter needs to price a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub order_id: OrderId,
    pub risk_score: f64,
    pub escrow_amount: Decimal,
    /// Desired coverage fraction, `[0, 1]`.
    pub desired_coverage: Decimal,
    #[serde(default)]
    pub preferred_tier: Option<InsuranceTier>,
    #[serde(default)]
    pub prefer_escrow_increase: bool,
    #[serde(default)]
    pub is_corporate: bool,
    #[serde(default)]
    pub clean_history: bool,
}

impl QuoteRequest {
    #[must_use]
    pub fn new(
        order_id: OrderId,
        risk_score: f64,
        escrow_amount: Decimal,
        desired_coverage: Decimal,
    ) -> Self {
        Self {
            order_id,
            risk_score,
            escrow_amount,
            desired_coverage,
            preferred_tier: None,
            prefer_escrow_increase: false,
            is_corporate: false,
            clean_history: false,
        }
    }
}

/// A priced policy offer, redeemable until `valid_until`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceQuote {
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub tier: InsuranceTier,
    pub coverage: Decimal,
    pub risk_grade: RiskGrade,
    pub risk_multiplier: Decimal,
    /// Premium before discounts and escrow shift.
    pub base_premium: Decimal,
    /// Cash premium due. Always positive.
    pub premium: Decimal,
    /// Extra escrow demanded instead of part of the premium.
    pub escrow_required: Option<Decimal>,
    pub discounts: Vec<AppliedDiscount>,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl InsuranceQuote {
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.valid_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_valid() {
        let catalog = InsuranceTierDefinition::default_catalog();
        assert_eq!(catalog.len(), 4);
        for def in &catalog {
            def.validate().unwrap();
        }
    }

    #[test]
    fn commission_out_of_bounds_rejected() {
        let mut def = InsuranceTierDefinition::default_catalog().remove(0);
        def.commission_rate = Decimal::new(13, 2);
        assert!(matches!(
            def.validate(),
            Err(OrderguardError::Configuration(_))
        ));
    }

    #[test]
    fn escrow_multiplier_out_of_bounds_rejected() {
        let mut def = InsuranceTierDefinition::default_catalog().remove(0);
        def.escrow_multiplier = Decimal::new(5, 2);
        assert!(def.validate().is_err());
    }

    #[test]
    fn tier_parse_is_strict() {
        assert_eq!("premium".parse::<InsuranceTier>().unwrap(), InsuranceTier::Premium);
        assert!("Premium".parse::<InsuranceTier>().is_err());
        assert!(serde_json::from_str::<InsuranceTier>("\"platinum\"").is_err());
    }
}
