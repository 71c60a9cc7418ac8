//! Request flow across both planes.
//!
//! ```text
//! quote: RiskScorer → InsuranceQuoter → QuoteBook
//! lock:  validate → check quote → BudgetComparator gate
//!        → (park + AcknowledgementRequired) | redeem quote → ledger lock/confirm
//! ```
//!
//! An Error-level budget comparison is remembered per order until a lock
//! echoes its token, so the gate holds whether or not the lock request
//! repeats the budget.
//!
//! The orchestrator is `Send + Sync` and meant to be shared behind an `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use orderguard_assess::{
    BudgetComparator, InsuranceQuoter, InsuranceRateTable, MarketBaselineSource,
    RiskProfileAggregator, RiskScorer,
};
use orderguard_types::{
    AckToken, BudgetComparisonRequest, BudgetComparisonResult, BudgetWarning, Clock,
    EngineConfig, EscrowLock, EscrowStatus, FactorOverride, IncidentId, InsuranceQuote,
    InsuranceTier, LockRequest, OrderId, OrderguardError, PlayerId, PlayerRiskProfile,
    QuoteRequest, Result, RiskContext, RiskEvaluationResult, RiskIncident, TierCatalogConfig,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{EscrowLedger, SweepReport, Transition};
use crate::publisher::{EventSink, SettlementEventPublisher};
use crate::quote_book::QuoteBook;

/// Everything needed to price insurance for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderQuoteRequest {
    pub order_id: OrderId,
    pub owner_id: PlayerId,
    pub context: RiskContext,
    #[serde(default)]
    pub overrides: Vec<FactorOverride>,
    pub escrow_amount: Decimal,
    pub desired_coverage: Decimal,
    #[serde(default)]
    pub preferred_tier: Option<InsuranceTier>,
    #[serde(default)]
    pub prefer_escrow_increase: bool,
    #[serde(default)]
    pub is_corporate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub evaluation: RiskEvaluationResult,
    pub quote: InsuranceQuote,
}

/// A lock request with its optional budget gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLockRequest {
    pub lock: LockRequest,
    /// Compared before funds are held; Error-level warnings gate the lock.
    #[serde(default)]
    pub budget: Option<BudgetComparisonRequest>,
    /// Token echoed back from an earlier `AcknowledgementRequired`.
    #[serde(default)]
    pub acknowledgement: Option<AckToken>,
}

impl OrderLockRequest {
    #[must_use]
    pub fn new(
        lock: LockRequest,
        budget: Option<BudgetComparisonRequest>,
        acknowledgement: Option<AckToken>,
    ) -> Self {
        Self {
            lock,
            budget,
            acknowledgement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockResponse {
    pub lock: EscrowLock,
    pub warnings: Vec<BudgetWarning>,
    /// The quote redeemed by this lock, if any.
    pub quote: Option<InsuranceQuote>,
}

/// Counts from one [`OrderSettlementOrchestrator::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub escrow: SweepReport,
    pub quotes_purged: usize,
    pub acknowledgements_purged: usize,
    pub profiles_refreshed: usize,
}

/// An Error-level comparison no lock has acknowledged yet.
#[derive(Debug, Clone)]
struct OutstandingAck {
    token: AckToken,
    warnings: Vec<BudgetWarning>,
    recorded_at: DateTime<Utc>,
}

pub struct OrderSettlementOrchestrator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    scorer: RiskScorer,
    budget: BudgetComparator,
    quoter: InsuranceQuoter,
    profiles: RiskProfileAggregator,
    quotes: QuoteBook,
    acks: DashMap<OrderId, OutstandingAck>,
    ledger: EscrowLedger,
}

impl OrderSettlementOrchestrator {
    /// Wire up every component from one validated configuration.
    pub fn new(
        config: EngineConfig,
        baselines: Arc<dyn MarketBaselineSource>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let thresholds = config.risk.thresholds.clone();
        let rates = Arc::new(InsuranceRateTable::new(config.tiers.clone())?);
        let publisher = Arc::new(SettlementEventPublisher::new(
            sink,
            config.publisher.clone(),
        )?);

        let orchestrator = Self {
            scorer: RiskScorer::new(config.risk.clone())?,
            budget: BudgetComparator::new(config.budget.clone(), baselines)?,
            quoter: InsuranceQuoter::new(config.quote.clone(), thresholds.clone(), rates)?,
            profiles: RiskProfileAggregator::new(config.profile.clone(), thresholds)?,
            quotes: QuoteBook::new(),
            acks: DashMap::new(),
            ledger: EscrowLedger::new(config.escrow.clone(), clock.clone(), publisher)?,
            clock,
            config,
        };
        tracing::info!(
            tiers = orchestrator.quoter.rates().snapshot().len(),
            min_hold = orchestrator.config.escrow.min_hold_minutes,
            max_hold = orchestrator.config.escrow.max_hold_minutes,
            "Settlement orchestrator ready"
        );
        Ok(orchestrator)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    #[must_use]
    pub fn quote_book(&self) -> &QuoteBook {
        &self.quotes
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =====================================================================
    // Assessment
    // =====================================================================

    pub fn evaluate_risk(
        &self,
        order_id: OrderId,
        context: &RiskContext,
        overrides: &[FactorOverride],
    ) -> Result<RiskEvaluationResult> {
        self.scorer.evaluate(order_id, context, overrides)
    }

    /// Score the order and issue a quote for it.
    ///
    /// Owners without incidents, or with a clean profile, get the
    /// clean-history discount.
    pub fn quote(&self, request: &OrderQuoteRequest) -> Result<QuoteResponse> {
        let evaluation = self.scorer.evaluate(
            request.order_id,
            &request.context,
            &request.overrides,
        )?;
        let clean_history = self
            .profiles
            .profile(request.owner_id)
            .is_none_or(|p| p.is_clean());

        let quote_request = QuoteRequest {
            preferred_tier: request.preferred_tier,
            prefer_escrow_increase: request.prefer_escrow_increase,
            is_corporate: request.is_corporate,
            clean_history,
            ..QuoteRequest::new(
                request.order_id,
                evaluation.score,
                request.escrow_amount,
                request.desired_coverage,
            )
        };
        let quote = self.quoter.quote(&quote_request, self.clock.now())?;
        self.quotes.insert(quote.clone());

        tracing::info!(
            order_id = %request.order_id,
            quote_id = %quote.quote_id,
            score = evaluation.score,
            grade = %evaluation.grade,
            tier = %quote.tier,
            premium = %quote.premium,
            valid_until = %quote.valid_until,
            "Quote issued"
        );
        Ok(QuoteResponse { evaluation, quote })
    }

    /// Compare a proposed budget and remember whether the order is gated.
    ///
    /// An Error-level result records its token for the order; a later clean
    /// comparison for the same order lifts the gate.
    pub fn compare_budget(&self, request: &BudgetComparisonRequest) -> Result<BudgetComparisonResult> {
        let comparison = self.budget.compare(request)?;
        match &comparison.acknowledgement_token {
            Some(token) => {
                self.acks.insert(
                    request.order_id,
                    OutstandingAck {
                        token: token.clone(),
                        warnings: comparison.warnings.clone(),
                        recorded_at: self.clock.now(),
                    },
                );
            }
            None => {
                if self.acks.remove(&request.order_id).is_some() {
                    tracing::debug!(order_id = %request.order_id, "Budget gate lifted by clean comparison");
                }
            }
        }
        Ok(comparison)
    }

    /// Token an order must echo before it may lock, if any.
    #[must_use]
    pub fn outstanding_acknowledgement(&self, order_id: OrderId) -> Option<AckToken> {
        self.acks.get(&order_id).map(|ack| ack.token.clone())
    }

    // =====================================================================
    // Settlement
    // =====================================================================

    /// Hold funds for an order, behind the budget acknowledgement gate.
    ///
    /// The gate is the request's own budget comparison if it carries one,
    /// otherwise the order's outstanding one from
    /// [`OrderSettlementOrchestrator::compare_budget`]. When it raised an
    /// Error-level warning and no token is supplied, the order is parked as
    /// `PENDING` and
    /// [`OrderguardError::AcknowledgementRequired`] carries the token to echo
    /// back. Echoing it confirms the parked lock.
    ///
    /// # Errors
    /// - validation errors for the lock or budget request
    /// - quote errors (`QuoteNotFound`, `StaleQuote`, `QuoteAlreadyRedeemed`)
    /// - `AcknowledgementRequired` / `InvalidAcknowledgement`
    /// - ledger errors from [`EscrowLedger::lock`] and [`EscrowLedger::confirm`]
    pub fn lock(&self, request: &OrderLockRequest) -> Result<LockResponse> {
        let mut lock_request = request.lock.clone();
        lock_request.validate()?;
        let order_id = lock_request.order_id;
        let now = self.clock.now();

        if let Some(quote_id) = lock_request.quote_id {
            self.quotes.check(quote_id, order_id, now)?;
        }

        let mut warnings = lock_request.warnings.clone();
        let expected = match &request.budget {
            Some(budget) => {
                if budget.order_id != order_id {
                    return Err(OrderguardError::InvalidRequest {
                        reason: format!(
                            "budget comparison is for order {}, lock is for {order_id}",
                            budget.order_id
                        ),
                    });
                }
                let comparison = self.compare_budget(budget)?;
                warnings.extend(comparison.warnings.iter().cloned());
                comparison.acknowledgement_token
            }
            None => self.acks.get(&order_id).map(|ack| {
                warnings.extend(ack.warnings.iter().cloned());
                ack.token.clone()
            }),
        };

        if let Some(expected) = expected {
            lock_request.warnings.clone_from(&warnings);
            match &request.acknowledgement {
                None => {
                    self.ledger.park(&lock_request, &expected)?;
                    tracing::info!(
                        order_id = %order_id,
                        token = %expected,
                        "Lock parked until budget acknowledgement"
                    );
                    return Err(OrderguardError::AcknowledgementRequired {
                        order_id,
                        token: expected,
                    });
                }
                Some(token) if *token != expected => {
                    tracing::warn!(order_id = %order_id, "Budget acknowledgement does not match");
                    return Err(OrderguardError::InvalidAcknowledgement(order_id));
                }
                Some(_) => {}
            }
        }
        lock_request.warnings.clone_from(&warnings);

        let redeemed = match lock_request.quote_id {
            Some(quote_id) => {
                let quote = self.quotes.redeem(quote_id, order_id, now)?;
                lock_request.insurance_tier = Some(quote.tier);
                if let Some(extra) = quote.escrow_required {
                    match lock_request.escrow_amount.checked_add(extra) {
                        Some(total) => lock_request.escrow_amount = total,
                        None => {
                            self.quotes.reinstate(quote_id);
                            return Err(OrderguardError::InvalidRequest {
                                reason: format!(
                                    "escrow {} plus quoted increase {extra} is out of range",
                                    lock_request.escrow_amount
                                ),
                            });
                        }
                    }
                }
                Some(quote)
            }
            None => None,
        };

        let parked = self
            .ledger
            .get(order_id)
            .is_some_and(|l| l.status == EscrowStatus::Pending);
        let outcome = match (&request.acknowledgement, parked) {
            (Some(token), true) => self.ledger.confirm(&lock_request, token),
            _ => self.ledger.lock(&lock_request),
        };

        match outcome {
            Ok(lock) => {
                if let Some(token) = &request.acknowledgement {
                    self.acks.remove_if(&order_id, |_, ack| &ack.token == token);
                }
                Ok(LockResponse {
                    lock,
                    warnings,
                    quote: redeemed,
                })
            }
            Err(err) => {
                if let Some(quote) = &redeemed {
                    self.quotes.reinstate(quote.quote_id);
                }
                Err(err)
            }
        }
    }

    pub fn release(&self, order_id: OrderId) -> Result<Transition> {
        self.ledger.release(order_id)
    }

    /// Escrow expiry, re-delivery and pruning, stale quote purge, profile decay.
    ///
    /// Outstanding acknowledgements older than the terminal retention window
    /// are dropped; the order must be compared again.
    pub fn sweep(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let cutoff = now - Duration::minutes(i64::from(self.config.escrow.terminal_retention_minutes));
        let before = self.acks.len();
        self.acks.retain(|_, ack| ack.recorded_at > cutoff);
        MaintenanceReport {
            escrow: self.ledger.sweep(),
            quotes_purged: self.quotes.purge_expired(now),
            acknowledgements_purged: before.saturating_sub(self.acks.len()),
            profiles_refreshed: self.profiles.refresh_all(now),
        }
    }

    // =====================================================================
    // Incidents and profiles
    // =====================================================================

    pub fn ingest_incident(&self, incident: RiskIncident) -> PlayerRiskProfile {
        self.profiles.ingest(incident, self.clock.now())
    }

    pub fn resolve_incident(
        &self,
        player_id: PlayerId,
        incident_id: IncidentId,
        resolved_at: DateTime<Utc>,
    ) -> Result<PlayerRiskProfile> {
        self.profiles
            .resolve(player_id, incident_id, resolved_at, self.clock.now())
    }

    /// The player's profile; an empty one if nothing was ever recorded.
    #[must_use]
    pub fn risk_profile(&self, player_id: PlayerId) -> PlayerRiskProfile {
        self.profiles
            .profile(player_id)
            .unwrap_or_else(|| PlayerRiskProfile::empty(player_id, self.clock.now()))
    }

    /// Swap in a new tier catalog. Issued quotes keep their terms.
    pub fn reload_tiers(&self, catalog: TierCatalogConfig) -> Result<()> {
        self.quoter.rates().reload(catalog)
    }
}
