//! Risk scoring types.
//!
//! A [`RiskContext`] is scored into a number in `[0, 10]` and a discrete
//! [`RiskGrade`]. The evaluation keeps a per-factor breakdown so a disputed
//! decision can be replayed and explained.
//!
//! ```text
//! RiskContext (+ overrides)
//!   → weighted sum of factor contributions
//!   → clamp [0, 10]
//!   → GradeThresholds → RiskGrade
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{OrderguardError, OrderId};

/// Ordered risk classification. `Low < Moderate < Elevated < High < Severe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskGrade {
    Low,
    Moderate,
    Elevated,
    High,
    Severe,
}

impl RiskGrade {
    /// All grades in ascending order.
    pub const ALL: [Self; 5] = [
        Self::Low,
        Self::Moderate,
        Self::Elevated,
        Self::High,
        Self::Severe,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for RiskGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskGrade {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "risk grade",
                value: s.to_string(),
            })
    }
}

/// A named input to the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Complexity,
    RiskModifier,
    MarketIndex,
    TimeModifier,
    District,
    Faction,
    Manual,
}

impl RiskFactor {
    pub const ALL: [Self; 7] = [
        Self::Complexity,
        Self::RiskModifier,
        Self::MarketIndex,
        Self::TimeModifier,
        Self::District,
        Self::Faction,
        Self::Manual,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complexity => "complexity",
            Self::RiskModifier => "risk_modifier",
            Self::MarketIndex => "market_index",
            Self::TimeModifier => "time_modifier",
            Self::District => "district",
            Self::Faction => "faction",
            Self::Manual => "manual",
        }
    }

    /// The four factors every context must carry.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            Self::Complexity | Self::RiskModifier | Self::MarketIndex | Self::TimeModifier
        )
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskFactor {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "risk factor",
                value: s.to_string(),
            })
    }
}

/// Inputs to one risk evaluation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContext {
    /// Task complexity, conventionally `0..=10`.
    pub complexity: f64,
    /// Contract-specific risk multiplier, around `1.0`.
    pub risk_modifier: f64,
    /// Current market index, around `1.0`.
    pub market_index: f64,
    /// Deadline pressure, around `1.0`.
    pub time_modifier: f64,
    #[serde(default)]
    pub district_adjustment: Option<f64>,
    #[serde(default)]
    pub faction_adjustment: Option<f64>,
    #[serde(default)]
    pub manual_adjustment: Option<f64>,
}

impl RiskContext {
    #[must_use]
    pub fn new(complexity: f64, risk_modifier: f64, market_index: f64, time_modifier: f64) -> Self {
        Self {
            complexity,
            risk_modifier,
            market_index,
            time_modifier,
            district_adjustment: None,
            faction_adjustment: None,
            manual_adjustment: None,
        }
    }

    #[must_use]
    pub fn with_district(mut self, adjustment: f64) -> Self {
        self.district_adjustment = Some(adjustment);
        self
    }

    #[must_use]
    pub fn with_faction(mut self, adjustment: f64) -> Self {
        self.faction_adjustment = Some(adjustment);
        self
    }

    #[must_use]
    pub fn with_manual(mut self, adjustment: f64) -> Self {
        self.manual_adjustment = Some(adjustment);
        self
    }

    /// Raw value of a factor, `None` for an absent optional adjustment.
    #[must_use]
    pub fn factor(&self, factor: RiskFactor) -> Option<f64> {
        match factor {
            RiskFactor::Complexity => Some(self.complexity),
            RiskFactor::RiskModifier => Some(self.risk_modifier),
            RiskFactor::MarketIndex => Some(self.market_index),
            RiskFactor::TimeModifier => Some(self.time_modifier),
            RiskFactor::District => self.district_adjustment,
            RiskFactor::Faction => self.faction_adjustment,
            RiskFactor::Manual => self.manual_adjustment,
        }
    }
}

/// Caller-supplied replacement for one factor's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorOverride {
    pub factor: RiskFactor,
    /// Contribution used instead of `weight × value`.
    pub contribution: f64,
    /// Free-text justification, recorded in the audit log.
    pub reason: String,
}

impl FactorOverride {
    #[must_use]
    pub fn new(factor: RiskFactor, contribution: f64, reason: impl Into<String>) -> Self {
        Self {
            factor,
            contribution,
            reason: reason.into(),
        }
    }
}

/// How much one factor added to the raw score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: RiskFactor,
    /// Value taken from the context (absent for a missing optional factor).
    pub value: Option<f64>,
    pub contribution: f64,
    pub overridden: bool,
}

/// Machine-readable alert code raised during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAlertCode {
    HighRisk,
    SevereRisk,
    ScoreClamped,
    FactorOverridden,
    FactorOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub code: RiskAlertCode,
    pub message: String,
}

impl RiskAlert {
    #[must_use]
    pub fn new(code: RiskAlertCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome of scoring one order. Not persisted beyond audit logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvaluationResult {
    pub order_id: OrderId,
    /// Clamped score in `[0, 10]`.
    pub score: f64,
    /// Score before clamping.
    pub raw_score: f64,
    pub grade: RiskGrade,
    pub contributions: Vec<FactorContribution>,
    pub alerts: Vec<RiskAlert>,
}

impl RiskEvaluationResult {
    #[must_use]
    pub fn has_alert(&self, code: RiskAlertCode) -> bool {
        self.alerts.iter().any(|a| a.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_are_ordered() {
        assert!(RiskGrade::Low < RiskGrade::Moderate);
        assert!(RiskGrade::Moderate < RiskGrade::Elevated);
        assert!(RiskGrade::Elevated < RiskGrade::High);
        assert!(RiskGrade::High < RiskGrade::Severe);
    }

    #[test]
    fn grade_parse_roundtrip() {
        for grade in RiskGrade::ALL {
            assert_eq!(grade.as_str().parse::<RiskGrade>().unwrap(), grade);
        }
    }

    #[test]
    fn unknown_grade_fails_explicitly() {
        let err = "extreme".parse::<RiskGrade>().unwrap_err();
        assert!(matches!(
            err,
            OrderguardError::UnknownVariant { kind: "risk grade", .. }
        ));
    }

    #[test]
    fn context_factor_lookup() {
        let ctx = RiskContext::new(5.0, 1.0, 1.1, 0.9).with_faction(-0.5);
        assert_eq!(ctx.factor(RiskFactor::Complexity), Some(5.0));
        assert_eq!(ctx.factor(RiskFactor::Faction), Some(-0.5));
        assert_eq!(ctx.factor(RiskFactor::District), None);
    }

    #[test]
    fn context_deserializes_without_optionals() {
        let json = r#"{"complexity":3.0,"risk_modifier":1.0,"market_index":1.0,"time_modifier":1.2}"#;
        let ctx: RiskContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.manual_adjustment, None);
        assert!((ctx.time_modifier - 1.2).abs() < f64::EPSILON);
    }
}
