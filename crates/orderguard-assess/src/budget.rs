//! Budget comparator: proposed budget against market baseline.
//!
//! Baselines come from a [`MarketBaselineSource`]; the comparison itself is a
//! pure function of the request, the baseline and the [`BudgetPolicy`]. Any
//! error-level warning mints an [`AckToken`] the caller must echo back before
//! the order may be locked.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use orderguard_types::{
    AckToken, BaselineKey, BudgetComparisonRequest, BudgetComparisonResult, BudgetModifier,
    BudgetPolicy, BudgetRange, BudgetWarning, CalculationBreakdown, MarketBaseline, OrderId,
    OrderguardError, Result, RiskGrade, WarningCode, WarningSeverity,
};
use rust_decimal::Decimal;

/// External provider of aggregated market data.
pub trait MarketBaselineSource: Send + Sync {
    /// Baseline for `key`.
    ///
    /// # Errors
    /// [`OrderguardError::BaselineUnavailable`] when no data exists or the
    /// backing store cannot be reached.
    fn baseline(&self, key: &BaselineKey) -> Result<MarketBaseline>;
}

/// In-process baseline table, swapped wholesale on reload.
///
/// Lookups try the exact key first, then the same key without a faction.
#[derive(Debug, Default)]
pub struct StaticBaselineSource {
    table: RwLock<Arc<HashMap<BaselineKey, MarketBaseline>>>,
}

impl StaticBaselineSource {
    #[must_use]
    pub fn new(table: HashMap<BaselineKey, MarketBaseline>) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Replace the whole table.
    pub fn replace(&self, table: HashMap<BaselineKey, MarketBaseline>) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// Insert or update one entry (copy-on-write).
    pub fn upsert(&self, key: BaselineKey, baseline: MarketBaseline) {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::clone(&guard);
        next.insert(key, baseline);
        *guard = Arc::new(next);
    }

    fn snapshot(&self) -> Arc<HashMap<BaselineKey, MarketBaseline>> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MarketBaselineSource for StaticBaselineSource {
    fn baseline(&self, key: &BaselineKey) -> Result<MarketBaseline> {
        let table = self.snapshot();
        if let Some(found) = table.get(key) {
            return Ok(found.clone());
        }
        if key.faction.is_some() {
            let general = BaselineKey {
                faction: None,
                ..key.clone()
            };
            if let Some(found) = table.get(&general) {
                return Ok(found.clone());
            }
        }
        Err(OrderguardError::BaselineUnavailable {
            reason: format!(
                "no baseline for {}/{}/{}",
                key.template, key.district, key.currency
            ),
        })
    }
}

/// Compares proposed budgets with the market.
pub struct BudgetComparator {
    policy: BudgetPolicy,
    source: Arc<dyn MarketBaselineSource>,
}

impl BudgetComparator {
    pub fn new(policy: BudgetPolicy, source: Arc<dyn MarketBaselineSource>) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy, source })
    }

    #[must_use]
    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Compare one proposed budget.
    ///
    /// Idempotent: identical requests against an unchanged baseline yield
    /// identical results, token included.
    pub fn compare(&self, request: &BudgetComparisonRequest) -> Result<BudgetComparisonResult> {
        if request.proposed_budget.is_sign_negative() && !request.proposed_budget.is_zero() {
            return Err(OrderguardError::InvalidRequest {
                reason: format!("proposed budget {} is negative", request.proposed_budget),
            });
        }

        let baseline = self.source.baseline(&request.key)?;
        if baseline.recommended <= Decimal::ZERO {
            return Err(OrderguardError::InvalidBaseline {
                reason: format!(
                    "recommended budget {} for {} must be positive",
                    baseline.recommended, request.key.template
                ),
            });
        }

        let deviation = request
            .proposed_budget
            .checked_sub(baseline.recommended)
            .and_then(|diff| diff.checked_div(baseline.recommended))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| {
                overflow(format!(
                    "deviation of {} from {}",
                    request.proposed_budget, baseline.recommended
                ))
            })?
            .round_dp(4);
        let recommended_range = self.range_around(baseline.recommended)?;
        let breakdown = self.breakdown(request)?;

        let warnings = self.warnings_for(request, &baseline, deviation, &breakdown);
        let requires_acknowledgement = warnings
            .iter()
            .any(|w| w.severity == WarningSeverity::Error);
        let acknowledgement_token = requires_acknowledgement.then(|| {
            acknowledgement_token(
                request.order_id,
                request.proposed_budget,
                baseline.recommended,
                &warnings,
            )
        });

        tracing::debug!(
            order_id = %request.order_id,
            proposed = %request.proposed_budget,
            recommended = %baseline.recommended,
            deviation = %deviation,
            total_cost = %breakdown.total_cost,
            warnings = warnings.len(),
            requires_acknowledgement,
            "Budget compared"
        );

        Ok(BudgetComparisonResult {
            order_id: request.order_id,
            proposed: request.proposed_budget,
            recommended: baseline.recommended,
            median: baseline.median,
            currency: request.key.currency.clone(),
            deviation_percent: deviation,
            recommended_range,
            breakdown,
            warnings,
            requires_acknowledgement,
            acknowledgement_token,
        })
    }

    /// The band around `recommended` in which no deviation warning fires.
    fn range_around(&self, recommended: Decimal) -> Result<BudgetRange> {
        let bound = |percent: Decimal| {
            Decimal::ONE_HUNDRED
                .checked_add(percent)
                .and_then(|factor| factor.checked_mul(recommended))
                .map(|v| (v / Decimal::ONE_HUNDRED).round_dp(2))
                .ok_or_else(|| overflow(format!("budget range around {recommended}")))
        };
        Ok(BudgetRange {
            min: bound(self.policy.under_warn_percent)?.max(Decimal::ZERO),
            max: bound(self.policy.over_warn_percent)?,
        })
    }

    fn breakdown(&self, request: &BudgetComparisonRequest) -> Result<CalculationBreakdown> {
        let base_reward = request.proposed_budget;
        let bonus_total = modifier_total("bonus", &request.bonuses)?;
        let penalty_total = modifier_total("penalty", &request.penalties)?;
        let adjusted_reward = base_reward
            .checked_add(bonus_total)
            .and_then(|v| v.checked_sub(penalty_total))
            .ok_or_else(|| overflow(format!("adjusted reward for {}", request.order_id)))?
            .max(Decimal::ZERO);

        let commission_rate = request
            .commission_rate
            .unwrap_or(self.policy.min_commission_rate);
        let insurance_fee = request.insurance_fee.unwrap_or(Decimal::ZERO);
        if commission_rate.is_sign_negative() || insurance_fee.is_sign_negative() {
            return Err(OrderguardError::InvalidRequest {
                reason: "commission rate and insurance fee must be non-negative".to_string(),
            });
        }

        let commission = adjusted_reward
            .checked_mul(commission_rate)
            .ok_or_else(|| overflow(format!("commission on {adjusted_reward}")))?
            .round_dp(2);
        let escrow_floor = base_reward
            .checked_mul(self.policy.min_escrow_ratio)
            .ok_or_else(|| overflow(format!("escrow floor for {base_reward}")))?
            .round_dp(2);
        let escrow = request.escrow_amount.unwrap_or(escrow_floor);
        let total_cost = adjusted_reward
            .checked_add(commission)
            .and_then(|v| v.checked_add(insurance_fee))
            .ok_or_else(|| overflow(format!("total cost for {}", request.order_id)))?;

        Ok(CalculationBreakdown {
            base_reward,
            bonuses: request.bonuses.clone(),
            penalties: request.penalties.clone(),
            adjusted_reward,
            commission_rate,
            commission,
            escrow,
            escrow_floor,
            insurance_fee,
            total_cost,
        })
    }

    fn warnings_for(
        &self,
        request: &BudgetComparisonRequest,
        baseline: &MarketBaseline,
        deviation: Decimal,
        breakdown: &CalculationBreakdown,
    ) -> Vec<BudgetWarning> {
        let p = &self.policy;
        let mut warnings = Vec::new();

        if deviation >= p.over_error_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::BudgetOverestimated,
                WarningSeverity::Error,
                Some(p.over_error_percent),
            ));
        } else if deviation >= p.over_warn_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::BudgetOverestimated,
                WarningSeverity::Warning,
                Some(p.over_warn_percent),
            ));
        }

        if deviation <= p.under_error_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::BudgetUnderestimated,
                WarningSeverity::Error,
                Some(p.under_error_percent),
            ));
        } else if deviation <= p.under_warn_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::BudgetUnderestimated,
                WarningSeverity::Warning,
                Some(p.under_warn_percent),
            ));
        }

        // Independent of the proposal.
        if baseline.recent_change_percent >= p.market_move_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::MarketSpike,
                WarningSeverity::Warning,
                Some(p.market_move_percent),
            ));
        } else if baseline.recent_change_percent <= -p.market_move_percent {
            warnings.push(BudgetWarning::new(
                WarningCode::MarketDrop,
                WarningSeverity::Warning,
                Some(-p.market_move_percent),
            ));
        }

        match request.risk_grade {
            Some(RiskGrade::Severe) => warnings.push(BudgetWarning::new(
                WarningCode::RiskHigh,
                WarningSeverity::Error,
                None,
            )),
            Some(RiskGrade::High) => warnings.push(BudgetWarning::new(
                WarningCode::RiskHigh,
                WarningSeverity::Warning,
                None,
            )),
            _ => {}
        }

        if request
            .escrow_amount
            .is_some_and(|escrow| escrow < breakdown.escrow_floor)
        {
            warnings.push(BudgetWarning::new(
                WarningCode::EscrowTooLow,
                WarningSeverity::Warning,
                Some(p.min_escrow_ratio),
            ));
        }

        if let Some(rate) = request.commission_rate {
            if rate < p.min_commission_rate {
                warnings.push(BudgetWarning::new(
                    WarningCode::CommissionTooLow,
                    WarningSeverity::Warning,
                    Some(p.min_commission_rate),
                ));
            }
        }

        warnings
    }
}

fn overflow(what: String) -> OrderguardError {
    OrderguardError::InvalidRequest {
        reason: format!("{what} is out of range"),
    }
}

fn modifier_total(kind: &str, modifiers: &[BudgetModifier]) -> Result<Decimal> {
    modifiers.iter().try_fold(Decimal::ZERO, |total, m| {
        if m.amount.is_sign_negative() && !m.amount.is_zero() {
            return Err(OrderguardError::InvalidRequest {
                reason: format!("{kind} '{}' has negative amount {}", m.name, m.amount),
            });
        }
        total
            .checked_add(m.amount)
            .ok_or_else(|| overflow(format!("{kind} total")))
    })
}

/// Deterministic token over the order, both amounts and the warning codes.
#[must_use]
pub fn acknowledgement_token(
    order_id: OrderId,
    proposed: Decimal,
    recommended: Decimal,
    warnings: &[BudgetWarning],
) -> AckToken {
    let mut codes: Vec<&str> = warnings.iter().map(|w| w.code.as_str()).collect();
    codes.sort_unstable();
    codes.dedup();
    AckToken::derive([
        order_id.to_string(),
        proposed.normalize().to_string(),
        recommended.normalize().to_string(),
        codes.join(","),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderguard_types::TemplateCode;

    fn key() -> BaselineKey {
        BaselineKey::new(TemplateCode::Combat, "watson", "eddies")
    }

    fn baseline(recommended: i64, change: i64) -> MarketBaseline {
        MarketBaseline {
            recommended: Decimal::new(recommended, 0),
            median: Decimal::new(recommended - 20, 0),
            recent_change_percent: Decimal::new(change, 0),
            sampled_at: Utc::now(),
        }
    }

    fn comparator(b: MarketBaseline) -> BudgetComparator {
        let mut table = HashMap::new();
        table.insert(key(), b);
        BudgetComparator::new(
            BudgetPolicy::default(),
            Arc::new(StaticBaselineSource::new(table)),
        )
        .unwrap()
    }

    #[test]
    fn double_the_baseline_requires_acknowledgement() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(1000, 0), key());
        let result = c.compare(&req).unwrap();
        assert_eq!(result.deviation_percent, Decimal::new(100, 0));
        assert!(result.has_warning(WarningCode::BudgetOverestimated));
        assert_eq!(result.max_severity(), Some(WarningSeverity::Error));
        assert!(result.requires_acknowledgement);
        assert!(result.acknowledgement_token.is_some());
    }

    #[test]
    fn moderate_overshoot_only_warns() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(700, 0), key());
        let result = c.compare(&req).unwrap();
        assert_eq!(result.deviation_percent, Decimal::new(40, 0));
        assert_eq!(result.max_severity(), Some(WarningSeverity::Warning));
        assert!(!result.requires_acknowledgement);
        assert!(result.acknowledgement_token.is_none());
    }

    #[test]
    fn within_band_no_warnings() {
        let c = comparator(baseline(500, 5));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(510, 0), key());
        let result = c.compare(&req).unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.median, Decimal::new(480, 0));
        assert_eq!(result.currency, "eddies");
    }

    #[test]
    fn underestimate_levels() {
        let c = comparator(baseline(1000, 0));
        let warn = c
            .compare(&BudgetComparisonRequest::new(OrderId::new(), Decimal::new(700, 0), key()))
            .unwrap();
        assert!(warn.has_warning(WarningCode::BudgetUnderestimated));
        assert!(!warn.requires_acknowledgement);

        let err = c
            .compare(&BudgetComparisonRequest::new(OrderId::new(), Decimal::new(400, 0), key()))
            .unwrap();
        assert!(err.requires_acknowledgement);
    }

    #[test]
    fn market_spike_attached_regardless_of_proposal() {
        let c = comparator(baseline(500, 35));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(500, 0), key());
        let result = c.compare(&req).unwrap();
        assert!(result.has_warning(WarningCode::MarketSpike));
        assert!(!result.has_warning(WarningCode::BudgetOverestimated));

        let c = comparator(baseline(500, -25));
        let result = c.compare(&req).unwrap();
        assert!(result.has_warning(WarningCode::MarketDrop));
    }

    #[test]
    fn severe_risk_gates() {
        let c = comparator(baseline(500, 0));
        let mut req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(500, 0), key());
        req.risk_grade = Some(RiskGrade::High);
        assert!(!c.compare(&req).unwrap().requires_acknowledgement);
        req.risk_grade = Some(RiskGrade::Severe);
        let result = c.compare(&req).unwrap();
        assert!(result.has_warning(WarningCode::RiskHigh));
        assert!(result.requires_acknowledgement);
    }

    #[test]
    fn escrow_and_commission_floors() {
        let c = comparator(baseline(500, 0));
        let mut req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(500, 0), key());
        req.escrow_amount = Some(Decimal::new(20, 0));
        req.commission_rate = Some(Decimal::new(3, 2));
        let result = c.compare(&req).unwrap();
        assert!(result.has_warning(WarningCode::EscrowTooLow));
        assert!(result.has_warning(WarningCode::CommissionTooLow));
    }

    #[test]
    fn comparison_is_idempotent() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(1000, 0), key());
        let a = c.compare(&req).unwrap();
        let b = c.compare(&req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn token_ignores_decimal_scale() {
        let id = OrderId::new();
        let w = [BudgetWarning::new(
            WarningCode::BudgetOverestimated,
            WarningSeverity::Error,
            None,
        )];
        let a = acknowledgement_token(id, Decimal::new(1000, 0), Decimal::new(500, 0), &w);
        let b = acknowledgement_token(id, Decimal::new(100_000, 2), Decimal::new(500, 0), &w);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_recommended_is_invalid() {
        let c = comparator(baseline(0, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(100, 0), key());
        assert!(matches!(
            c.compare(&req),
            Err(OrderguardError::InvalidBaseline { .. })
        ));
    }

    #[test]
    fn missing_baseline_is_unavailable() {
        let c = comparator(baseline(500, 0));
        let other = BaselineKey::new(TemplateCode::Hacker, "watson", "eddies");
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(100, 0), other);
        let err = c.compare(&req).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn faction_falls_back_to_district_baseline() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(
            OrderId::new(),
            Decimal::new(500, 0),
            key().with_faction("arasaka"),
        );
        assert!(c.compare(&req).unwrap().warnings.is_empty());
    }

    #[test]
    fn recommended_range_matches_warning_band() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(600, 0), key());
        let result = c.compare(&req).unwrap();
        assert_eq!(result.recommended_range.min, Decimal::new(375, 0));
        assert_eq!(result.recommended_range.max, Decimal::new(625, 0));
        assert!(result.recommended_range.contains(req.proposed_budget));
        assert!(result.warnings.is_empty());

        let above = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(626, 0), key());
        let result = c.compare(&above).unwrap();
        assert!(!result.recommended_range.contains(above.proposed_budget));
        assert!(result.has_warning(WarningCode::BudgetOverestimated));
    }

    #[test]
    fn breakdown_itemises_cost() {
        let c = comparator(baseline(500, 0));
        let mut req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(500, 0), key());
        req.bonuses = vec![BudgetModifier::new("night_shift", Decimal::new(50, 0))];
        req.penalties = vec![
            BudgetModifier::new("late_delivery", Decimal::new(20, 0)),
            BudgetModifier::new("damaged_cargo", Decimal::new(30, 0)),
        ];
        req.commission_rate = Some(Decimal::new(8, 2));
        req.insurance_fee = Some(Decimal::new(1250, 2));

        let b = c.compare(&req).unwrap().breakdown;
        assert_eq!(b.base_reward, Decimal::new(500, 0));
        assert_eq!(b.adjusted_reward, Decimal::new(500, 0));
        assert_eq!(b.commission, Decimal::new(40, 0));
        assert_eq!(b.insurance_fee, Decimal::new(1250, 2));
        assert_eq!(b.total_cost, Decimal::new(55250, 2));
        assert_eq!(b.escrow, Decimal::new(50, 0));
        assert_eq!(b.escrow_floor, Decimal::new(50, 0));
        assert_eq!(b.penalties.len(), 2);
    }

    #[test]
    fn breakdown_defaults_to_policy_rates() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(200, 0), key());
        let b = c.compare(&req).unwrap().breakdown;
        assert_eq!(b.commission_rate, BudgetPolicy::default().min_commission_rate);
        assert_eq!(b.commission, Decimal::new(10, 0));
        assert_eq!(b.total_cost, Decimal::new(210, 0));
    }

    #[test]
    fn negative_modifier_rejected() {
        let c = comparator(baseline(500, 0));
        let mut req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(500, 0), key());
        req.bonuses = vec![BudgetModifier::new("refund", Decimal::new(-5, 0))];
        assert!(c.compare(&req).unwrap_err().is_validation());
    }

    #[test]
    fn extreme_amounts_are_rejected_not_panicking() {
        let c = comparator(baseline(500, 0));
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::MAX, key());
        assert!(c.compare(&req).unwrap_err().is_validation());

        let c = comparator(MarketBaseline {
            recommended: Decimal::new(1, 28),
            ..baseline(500, 0)
        });
        let req = BudgetComparisonRequest::new(OrderId::new(), Decimal::new(1_000_000, 0), key());
        assert!(matches!(
            c.compare(&req),
            Err(OrderguardError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn upsert_swaps_snapshot() {
        let source = StaticBaselineSource::default();
        assert!(source.baseline(&key()).is_err());
        source.upsert(key(), baseline(300, 0));
        assert_eq!(source.baseline(&key()).unwrap().recommended, Decimal::new(300, 0));
    }
}
