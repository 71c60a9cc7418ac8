//! Insurance quoter.
//!
//! Turns a risk score and an escrow amount into a priced, time-limited offer
//! bound to one tier of the [`InsuranceRateTable`]:
//!
//! ```text
//! base     = escrow × commission_rate × multiplier(grade)
//! premium  = base − discounts
//! premium ×= (1 − escrow_multiplier)      if an escrow increase is preferred
//! premium  = max(round(premium, 2), min_premium)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orderguard_types::constants::{RISK_SCORE_MAX, RISK_SCORE_MIN};
use orderguard_types::{
    AppliedDiscount, GradeThresholds, InsuranceQuote, OrderguardError, QuoteId, QuotePolicy,
    QuoteRequest, Result,
};
use rust_decimal::Decimal;

use crate::rate_table::InsuranceRateTable;

pub struct InsuranceQuoter {
    policy: QuotePolicy,
    thresholds: GradeThresholds,
    rates: Arc<InsuranceRateTable>,
}

impl InsuranceQuoter {
    pub fn new(
        policy: QuotePolicy,
        thresholds: GradeThresholds,
        rates: Arc<InsuranceRateTable>,
    ) -> Result<Self> {
        policy.validate()?;
        thresholds.validate()?;
        Ok(Self {
            policy,
            thresholds,
            rates,
        })
    }

    #[must_use]
    pub fn rates(&self) -> &Arc<InsuranceRateTable> {
        &self.rates
    }

    /// Price one request at `now`.
    ///
    /// # Errors
    /// Validation errors for a non-finite score, a negative escrow, a coverage
    /// outside `[0, 1]`, an unknown preferred tier, or no tier covering the
    /// desired fraction.
    pub fn quote(&self, request: &QuoteRequest, now: DateTime<Utc>) -> Result<InsuranceQuote> {
        if !request.risk_score.is_finite() {
            return Err(OrderguardError::InvalidRequest {
                reason: format!("risk score {} is not finite", request.risk_score),
            });
        }
        if request.escrow_amount.is_sign_negative() && !request.escrow_amount.is_zero() {
            return Err(OrderguardError::NegativeEscrowAmount(request.escrow_amount));
        }
        if request.desired_coverage < Decimal::ZERO || request.desired_coverage > Decimal::ONE {
            return Err(OrderguardError::InvalidRequest {
                reason: format!(
                    "desired coverage {} outside [0, 1]",
                    request.desired_coverage
                ),
            });
        }

        let tier = match request.preferred_tier {
            Some(preferred) => self.rates.get(preferred)?,
            None => self.rates.cheapest_covering(request.desired_coverage)?,
        };

        let grade = self
            .thresholds
            .grade_for(request.risk_score.clamp(RISK_SCORE_MIN, RISK_SCORE_MAX));
        let risk_multiplier = self.policy.grade_multipliers.for_grade(grade);
        let base_premium = request
            .escrow_amount
            .checked_mul(tier.commission_rate)
            .and_then(|p| p.checked_mul(risk_multiplier))
            .ok_or_else(|| OrderguardError::InvalidRequest {
                reason: format!("premium on escrow {} is out of range", request.escrow_amount),
            })?;

        let mut discounts = Vec::new();
        if request.is_corporate && !self.policy.corporate_discount.is_zero() {
            discounts.push(AppliedDiscount {
                name: "corporate".to_string(),
                rate: self.policy.corporate_discount,
                amount: (base_premium * self.policy.corporate_discount).round_dp(2),
            });
        }
        if request.clean_history && !self.policy.clean_history_discount.is_zero() {
            discounts.push(AppliedDiscount {
                name: "clean_history".to_string(),
                rate: self.policy.clean_history_discount,
                amount: (base_premium * self.policy.clean_history_discount).round_dp(2),
            });
        }
        let discounted = base_premium - discounts.iter().map(|d| d.amount).sum::<Decimal>();

        let (cash, escrow_required) = if request.prefer_escrow_increase {
            (
                discounted * (Decimal::ONE - tier.escrow_multiplier),
                Some((request.escrow_amount * tier.escrow_multiplier).round_dp(2)),
            )
        } else {
            (discounted, None)
        };
        let premium = cash.round_dp(2).max(self.policy.min_premium);

        let quote = InsuranceQuote {
            quote_id: QuoteId::new(),
            order_id: request.order_id,
            tier: tier.id,
            coverage: tier.coverage,
            risk_grade: grade,
            risk_multiplier,
            base_premium: base_premium.round_dp(2),
            premium,
            escrow_required,
            discounts,
            issued_at: now,
            valid_until: now + Duration::minutes(i64::from(self.policy.lifetime_minutes)),
        };

        tracing::info!(
            order_id = %quote.order_id,
            quote_id = %quote.quote_id,
            tier = %quote.tier,
            grade = %grade,
            premium = %quote.premium,
            valid_until = %quote.valid_until,
            "Insurance quoted"
        );
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderguard_types::{InsuranceTier, OrderId, RiskGrade, TierCatalogConfig};

    fn quoter() -> InsuranceQuoter {
        let rates = Arc::new(InsuranceRateTable::new(TierCatalogConfig::default()).unwrap());
        InsuranceQuoter::new(QuotePolicy::default(), GradeThresholds::default(), rates).unwrap()
    }

    fn basic_request(score: f64) -> QuoteRequest {
        let mut req = QuoteRequest::new(OrderId::new(), score, Decimal::new(1000, 0), Decimal::ZERO);
        req.preferred_tier = Some(InsuranceTier::Basic);
        req
    }

    #[test]
    fn severe_risk_costs_more_than_low_risk() {
        let q = quoter();
        let now = Utc::now();
        let severe = q.quote(&basic_request(9.0), now).unwrap();
        let low = q.quote(&basic_request(1.0), now).unwrap();
        assert_eq!(severe.risk_grade, RiskGrade::Severe);
        assert_eq!(low.risk_grade, RiskGrade::Low);
        assert_eq!(low.premium, Decimal::new(50, 0));
        assert_eq!(severe.premium, Decimal::new(150, 0));
        assert!(severe.premium > low.premium);
    }

    #[test]
    fn premium_monotonic_across_all_scores() {
        let q = quoter();
        let now = Utc::now();
        let mut last = Decimal::ZERO;
        for tenth in 0..=100 {
            let quote = q.quote(&basic_request(f64::from(tenth) / 10.0), now).unwrap();
            assert!(quote.premium >= last);
            last = quote.premium;
        }
    }

    #[test]
    fn cheapest_covering_tier_selected() {
        let req = QuoteRequest::new(OrderId::new(), 3.0, Decimal::new(200, 0), Decimal::new(80, 2));
        let quote = quoter().quote(&req, Utc::now()).unwrap();
        assert_eq!(quote.tier, InsuranceTier::Premium);
        assert_eq!(quote.coverage, Decimal::new(90, 2));
    }

    #[test]
    fn escrow_increase_reduces_cash_premium() {
        let q = quoter();
        let now = Utc::now();
        let mut req = basic_request(1.0);
        let cash_only = q.quote(&req, now).unwrap();
        req.prefer_escrow_increase = true;
        let shifted = q.quote(&req, now).unwrap();
        assert_eq!(shifted.escrow_required, Some(Decimal::new(100, 0)));
        assert_eq!(shifted.premium, Decimal::new(45, 0));
        assert!(shifted.premium < cash_only.premium);
        assert!(cash_only.escrow_required.is_none());
    }

    #[test]
    fn discounts_recorded_by_name() {
        let mut req = basic_request(1.0);
        req.is_corporate = true;
        req.clean_history = true;
        let quote = quoter().quote(&req, Utc::now()).unwrap();
        let names: Vec<_> = quote.discounts.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["corporate", "clean_history"]);
        // 50 − 5 − 2.5
        assert_eq!(quote.premium, Decimal::new(4250, 2));
    }

    #[test]
    fn zero_escrow_still_has_positive_premium() {
        let mut req = basic_request(1.0);
        req.escrow_amount = Decimal::ZERO;
        let quote = quoter().quote(&req, Utc::now()).unwrap();
        assert!(quote.premium > Decimal::ZERO);
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let quote = quoter().quote(&basic_request(1.0), now).unwrap();
        assert_eq!(quote.valid_until, now + Duration::minutes(15));
        assert!(quote.is_valid_at(now + Duration::minutes(15)));
        assert!(!quote.is_valid_at(now + Duration::minutes(16)));
    }

    #[test]
    fn invalid_inputs_rejected() {
        let q = quoter();
        let now = Utc::now();
        let mut req = basic_request(f64::NAN);
        assert!(q.quote(&req, now).is_err());
        req.risk_score = 1.0;
        req.escrow_amount = Decimal::new(-1, 0);
        assert!(matches!(
            q.quote(&req, now),
            Err(OrderguardError::NegativeEscrowAmount(_))
        ));
        req.escrow_amount = Decimal::ONE;
        req.desired_coverage = Decimal::new(2, 0);
        assert!(q.quote(&req, now).is_err());
    }
}
