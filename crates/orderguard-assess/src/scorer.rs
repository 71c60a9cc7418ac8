//! Risk scorer: context factors to a bounded score and grade.
//!
//! The score is a weighted linear combination of the four mandatory factors
//! plus whichever optional adjustments are present, clamped to `[0, 10]`.
//! Grade bands come from [`GradeThresholds`], so tuning them never touches
//! this code.
//!
//! ## Design Principles
//!
//! - **Pure**: identical inputs give identical output; the only side effect
//!   is audit logging of overrides
//! - **Fail-closed on garbage**: NaN or infinite inputs are rejected, never
//!   silently clamped
//! - **Overrides replace**: an override substitutes a factor's contribution,
//!   it is not added on top

use orderguard_types::constants::{COMPLEXITY_MAX, MODIFIER_MAX, RISK_SCORE_MAX, RISK_SCORE_MIN};
use orderguard_types::{
    FactorContribution, FactorOverride, GradeThresholds, OrderId, OrderguardError, Result,
    RiskAlert, RiskAlertCode, RiskContext, RiskEvaluationResult, RiskFactor, RiskGrade,
    RiskScoringConfig,
};

/// Stateless scorer over a validated [`RiskScoringConfig`].
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: RiskScoringConfig,
}

impl RiskScorer {
    /// Create a scorer; the configuration is validated up front.
    pub fn new(config: RiskScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn thresholds(&self) -> &GradeThresholds {
        &self.config.thresholds
    }

    /// Configured weight of one factor.
    #[must_use]
    pub fn weight(&self, factor: RiskFactor) -> f64 {
        let w = &self.config.weights;
        match factor {
            RiskFactor::Complexity => w.complexity,
            RiskFactor::RiskModifier => w.risk_modifier,
            RiskFactor::MarketIndex => w.market_index,
            RiskFactor::TimeModifier => w.time_modifier,
            RiskFactor::District => w.district,
            RiskFactor::Faction => w.faction,
            RiskFactor::Manual => w.manual,
        }
    }

    /// Score one order.
    ///
    /// When several overrides name the same factor the last one wins.
    ///
    /// # Errors
    /// Returns [`OrderguardError::InvalidRiskFactor`] for a non-finite
    /// factor value or override contribution.
    pub fn evaluate(
        &self,
        order_id: OrderId,
        context: &RiskContext,
        overrides: &[FactorOverride],
    ) -> Result<RiskEvaluationResult> {
        let mut contributions = Vec::with_capacity(RiskFactor::ALL.len());
        let mut alerts = Vec::new();
        let mut raw_score = 0.0;

        for factor in RiskFactor::ALL {
            let value = context.factor(factor);
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(OrderguardError::InvalidRiskFactor {
                        factor,
                        reason: format!("value {v} is not finite"),
                    });
                }
                if let Some(alert) = range_alert(factor, v) {
                    alerts.push(alert);
                }
            }

            let computed = value.map_or(0.0, |v| self.weight(factor) * v);
            let replacement = overrides.iter().rev().find(|o| o.factor == factor);
            let contribution = match replacement {
                Some(ov) => {
                    if !ov.contribution.is_finite() {
                        return Err(OrderguardError::InvalidRiskFactor {
                            factor,
                            reason: format!("override {} is not finite", ov.contribution),
                        });
                    }
                    tracing::info!(
                        audit = true,
                        order_id = %order_id,
                        factor = %factor,
                        original = computed,
                        replacement = ov.contribution,
                        reason = %ov.reason,
                        "Risk factor overridden"
                    );
                    alerts.push(RiskAlert::new(
                        RiskAlertCode::FactorOverridden,
                        format!("{factor} contribution {computed} replaced by {}", ov.contribution),
                    ));
                    ov.contribution
                }
                None => computed,
            };

            raw_score += contribution;
            contributions.push(FactorContribution {
                factor,
                value,
                contribution,
                overridden: replacement.is_some(),
            });
        }

        let score = raw_score.clamp(RISK_SCORE_MIN, RISK_SCORE_MAX);
        if score.to_bits() != raw_score.to_bits() {
            alerts.push(RiskAlert::new(
                RiskAlertCode::ScoreClamped,
                format!("raw score {raw_score:.4} clamped to {score}"),
            ));
        }

        let grade = self.config.thresholds.grade_for(score);
        match grade {
            RiskGrade::High => alerts.push(RiskAlert::new(
                RiskAlertCode::HighRisk,
                format!("score {score:.2} graded high"),
            )),
            RiskGrade::Severe => alerts.push(RiskAlert::new(
                RiskAlertCode::SevereRisk,
                format!("score {score:.2} graded severe"),
            )),
            _ => {}
        }

        tracing::debug!(
            order_id = %order_id,
            score,
            raw_score,
            grade = %grade,
            alerts = alerts.len(),
            "Risk evaluated"
        );

        Ok(RiskEvaluationResult {
            order_id,
            score,
            raw_score,
            grade,
            contributions,
            alerts,
        })
    }

    /// Grade for an already computed score, clamped first.
    #[must_use]
    pub fn grade_for_score(&self, score: f64) -> RiskGrade {
        self.config
            .thresholds
            .grade_for(score.clamp(RISK_SCORE_MIN, RISK_SCORE_MAX))
    }
}

/// Alert for a mandatory factor outside its conventional range.
fn range_alert(factor: RiskFactor, value: f64) -> Option<RiskAlert> {
    let max = match factor {
        RiskFactor::Complexity => COMPLEXITY_MAX,
        RiskFactor::RiskModifier | RiskFactor::MarketIndex | RiskFactor::TimeModifier => {
            MODIFIER_MAX
        }
        RiskFactor::District | RiskFactor::Faction | RiskFactor::Manual => return None,
    };
    if (0.0..=max).contains(&value) {
        None
    } else {
        Some(RiskAlert::new(
            RiskAlertCode::FactorOutOfRange,
            format!("{factor} = {value} outside [0, {max}]"),
        ))
    }
}
