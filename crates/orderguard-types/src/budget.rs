//! Budget comparison types.
//!
//! A proposed order budget is compared with a market baseline supplied by an
//! external source. The result carries warnings and, for error-level ones, an
//! acknowledgement gate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AckToken, OrderId, OrderguardError, RiskGrade};

/// Order template (category) the baseline is looked up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCode {
    Combat,
    Hacker,
    Economy,
    Social,
    Exploration,
}

impl TemplateCode {
    pub const ALL: [Self; 5] = [
        Self::Combat,
        Self::Hacker,
        Self::Economy,
        Self::Social,
        Self::Exploration,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Combat => "combat",
            Self::Hacker => "hacker",
            Self::Economy => "economy",
            Self::Social => "social",
            Self::Exploration => "exploration",
        }
    }
}

impl fmt::Display for TemplateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateCode {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "template code",
                value: s.to_string(),
            })
    }
}

/// Why a budget warning was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    BudgetOverestimated,
    BudgetUnderestimated,
    MarketSpike,
    MarketDrop,
    RiskHigh,
    EscrowTooLow,
    CommissionTooLow,
}

impl WarningCode {
    pub const ALL: [Self; 7] = [
        Self::BudgetOverestimated,
        Self::BudgetUnderestimated,
        Self::MarketSpike,
        Self::MarketDrop,
        Self::RiskHigh,
        Self::EscrowTooLow,
        Self::CommissionTooLow,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetOverestimated => "BUDGET_OVERESTIMATED",
            Self::BudgetUnderestimated => "BUDGET_UNDERESTIMATED",
            Self::MarketSpike => "MARKET_SPIKE",
            Self::MarketDrop => "MARKET_DROP",
            Self::RiskHigh => "RISK_HIGH",
            Self::EscrowTooLow => "ESCROW_TOO_LOW",
            Self::CommissionTooLow => "COMMISSION_TOO_LOW",
        }
    }

    /// i18n key the client renders.
    #[must_use]
    pub fn message_key(&self) -> String {
        format!("budget.warning.{}", self.as_str().to_ascii_lowercase())
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarningCode {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "warning code",
                value: s.to_string(),
            })
    }
}

/// `Info < Warning < Error`. Error-level warnings gate locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetWarning {
    pub code: WarningCode,
    pub severity: WarningSeverity,
    pub message_key: String,
    /// The configured threshold that was crossed, if any.
    #[serde(default)]
    pub threshold: Option<Decimal>,
}

impl BudgetWarning {
    #[must_use]
    pub fn new(code: WarningCode, severity: WarningSeverity, threshold: Option<Decimal>) -> Self {
        Self {
            code,
            severity,
            message_key: code.message_key(),
            threshold,
        }
    }
}

/// Lookup key for market baseline data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub template: TemplateCode,
    pub district: String,
    #[serde(default)]
    pub faction: Option<String>,
    pub currency: String,
}

impl BaselineKey {
    #[must_use]
    pub fn new(template: TemplateCode, district: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            template,
            district: district.into(),
            faction: None,
            currency: currency.into(),
        }
    }

    #[must_use]
    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = Some(faction.into());
        self
    }
}

/// Aggregated market data for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBaseline {
    pub recommended: Decimal,
    pub median: Decimal,
    /// Recent price movement in percent (positive = spike).
    pub recent_change_percent: Decimal,
    pub sampled_at: DateTime<Utc>,
}

/// A named bonus or penalty on the base reward. Amounts are non-negative;
/// the list it sits in decides the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetModifier {
    pub name: String,
    pub amount: Decimal,
}

impl BudgetModifier {
    #[must_use]
    pub fn new(name: impl Into<String>, amount: Decimal) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparisonRequest {
    pub order_id: OrderId,
    pub proposed_budget: Decimal,
    pub key: BaselineKey,
    #[serde(default)]
    pub risk_grade: Option<RiskGrade>,
    #[serde(default)]
    pub escrow_amount: Option<Decimal>,
    #[serde(default)]
    pub commission_rate: Option<Decimal>,
    #[serde(default)]
    pub insurance_fee: Option<Decimal>,
    #[serde(default)]
    pub bonuses: Vec<BudgetModifier>,
    #[serde(default)]
    pub penalties: Vec<BudgetModifier>,
}

impl BudgetComparisonRequest {
    #[must_use]
    pub fn new(order_id: OrderId, proposed_budget: Decimal, key: BaselineKey) -> Self {
        Self {
            order_id,
            proposed_budget,
            key,
            risk_grade: None,
            escrow_amount: None,
            commission_rate: None,
            insurance_fee: None,
            bonuses: Vec::new(),
            penalties: Vec::new(),
        }
    }
}

/// Budgets inside `[min, max]` raise no deviation warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl BudgetRange {
    #[must_use]
    pub fn contains(&self, amount: Decimal) -> bool {
        self.min <= amount && amount <= self.max
    }
}

/// What the proposed budget costs the owner, component by component.
///
/// `adjusted_reward = base_reward + bonuses - penalties`,
/// `commission = adjusted_reward × commission_rate`,
/// `total_cost = adjusted_reward + commission + insurance_fee`.
/// Escrow is held, not spent, and is not part of the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationBreakdown {
    pub base_reward: Decimal,
    pub bonuses: Vec<BudgetModifier>,
    pub penalties: Vec<BudgetModifier>,
    pub adjusted_reward: Decimal,
    pub commission_rate: Decimal,
    pub commission: Decimal,
    /// The escrow offered, or the floor when none was.
    pub escrow: Decimal,
    /// `base_reward × min_escrow_ratio`.
    pub escrow_floor: Decimal,
    pub insurance_fee: Decimal,
    pub total_cost: Decimal,
}

/// Outcome of a comparison. Computed, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparisonResult {
    pub order_id: OrderId,
    pub proposed: Decimal,
    pub recommended: Decimal,
    pub median: Decimal,
    pub currency: String,
    pub deviation_percent: Decimal,
    pub recommended_range: BudgetRange,
    pub breakdown: CalculationBreakdown,
    pub warnings: Vec<BudgetWarning>,
    pub requires_acknowledgement: bool,
    pub acknowledgement_token: Option<AckToken>,
}

impl BudgetComparisonResult {
    #[must_use]
    pub fn has_warning(&self, code: WarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    #[must_use]
    pub fn max_severity(&self) -> Option<WarningSeverity> {
        self.warnings.iter().map(|w| w.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(WarningSeverity::Info < WarningSeverity::Warning);
        assert!(WarningSeverity::Warning < WarningSeverity::Error);
    }

    #[test]
    fn warning_code_wire_format() {
        let json = serde_json::to_string(&WarningCode::BudgetOverestimated).unwrap();
        assert_eq!(json, "\"BUDGET_OVERESTIMATED\"");
        assert_eq!(
            "MARKET_DROP".parse::<WarningCode>().unwrap(),
            WarningCode::MarketDrop
        );
        assert!("BUDGET_WILD".parse::<WarningCode>().is_err());
    }

    #[test]
    fn message_key_is_derived_from_code() {
        let w = BudgetWarning::new(WarningCode::EscrowTooLow, WarningSeverity::Warning, None);
        assert_eq!(w.message_key, "budget.warning.escrow_too_low");
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = BudgetRange {
            min: Decimal::new(375, 0),
            max: Decimal::new(625, 0),
        };
        assert!(range.contains(Decimal::new(375, 0)));
        assert!(range.contains(Decimal::new(625, 0)));
        assert!(!range.contains(Decimal::new(626, 0)));
    }

    #[test]
    fn request_without_modifiers_deserializes() {
        let json = r#"{
            "order_id": "0190c4a0-0000-7000-8000-000000000001",
            "proposed_budget": "500",
            "key": { "template": "economy", "district": "harbor", "currency": "credits" }
        }"#;
        let req: BudgetComparisonRequest = serde_json::from_str(json).unwrap();
        assert!(req.bonuses.is_empty());
        assert!(req.insurance_fee.is_none());
    }

    #[test]
    fn template_code_parse() {
        assert_eq!("hacker".parse::<TemplateCode>().unwrap(), TemplateCode::Hacker);
        assert!("courier".parse::<TemplateCode>().is_err());
    }
}
