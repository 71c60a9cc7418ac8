//! # Escrow lock: funds held for one order
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐ confirm  ┌────────┐ release  ┌───────────┐ event acked ┌──────────┐
//!   │ PENDING ├─────────▶│ LOCKED ├─────────▶│ RELEASING ├────────────▶│ RELEASED │
//!   └────┬────┘          └───┬────┘          └───────────┘             └──────────┘
//!        │ ack deadline      │ now > lock_expires_at
//!        ▼                   ▼
//!   ┌─────────────────────────────┐
//!   │           EXPIRED           │
//!   └─────────────────────────────┘
//! ```
//!
//! - Transitions are **monotonic**; `RELEASED` and `EXPIRED` are terminal.
//! - `RELEASING` is entered before the release event is delivered and left
//!   only once it is, so an interrupted release is resumed from here.
//! - Each transition appends its event to [`EscrowLock::outbox`]; events
//!   leave the outbox in order as the stream acknowledges them.
//! - At most one non-terminal lock exists per order. A terminal slot may be
//!   reused; each reuse bumps [`EscrowLock::generation`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AckToken, AuditTraceId, BudgetWarning, EventId, InsuranceTier, OrderId, OrderguardError,
    PlayerId, QuoteId, Result, SettlementEvent,
};

/// Lifecycle state of an escrow lock.
///
/// Older API revisions spelled the same states `pending|locked|released` and
/// `HOLDING|RELEASING|RELEASED`; both spellings are accepted on input and
/// normalised to this single vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Requested, not yet confirmed (e.g. waiting for a budget acknowledgement).
    #[serde(alias = "pending")]
    Pending,
    /// Funds held until release or expiry.
    #[serde(alias = "locked", alias = "HOLDING", alias = "holding")]
    Locked,
    /// Release initiated; irreversible.
    #[serde(alias = "releasing")]
    Releasing,
    /// Funds returned. Terminal.
    #[serde(alias = "released")]
    Released,
    /// Hold ran out before release. Terminal.
    #[serde(alias = "expired")]
    Expired,
}

impl EscrowStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Expired)
    }

    /// Non-terminal: the order slot is occupied.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Can a lock in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Locked | Self::Expired)
                | (Self::Locked, Self::Releasing | Self::Expired)
                | (Self::Releasing, Self::Released)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Locked => "LOCKED",
            Self::Releasing => "RELEASING",
            Self::Released => "RELEASED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = OrderguardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" | "pending" => Ok(Self::Pending),
            "LOCKED" | "locked" | "HOLDING" | "holding" => Ok(Self::Locked),
            "RELEASING" | "releasing" => Ok(Self::Releasing),
            "RELEASED" | "released" => Ok(Self::Released),
            "EXPIRED" | "expired" => Ok(Self::Expired),
            other => Err(OrderguardError::UnknownVariant {
                kind: "escrow status",
                value: other.to_string(),
            }),
        }
    }
}

/// A request to hold funds for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub order_id: OrderId,
    pub owner_id: PlayerId,
    pub escrow_amount: Decimal,
    #[serde(default)]
    pub insurance_tier: Option<InsuranceTier>,
    /// Requested hold; clamped to the configured bounds by the ledger.
    pub hold_duration_minutes: u32,
    pub audit_trace_id: AuditTraceId,
    /// Budget warnings attached by the caller; stored on the lock.
    #[serde(default)]
    pub warnings: Vec<BudgetWarning>,
    #[serde(default)]
    pub quote_id: Option<QuoteId>,
}

impl LockRequest {
    #[must_use]
    pub fn new(
        order_id: OrderId,
        owner_id: PlayerId,
        escrow_amount: Decimal,
        hold_duration_minutes: u32,
    ) -> Self {
        Self {
            order_id,
            owner_id,
            escrow_amount,
            insurance_tier: None,
            hold_duration_minutes,
            audit_trace_id: AuditTraceId::new(),
            warnings: Vec::new(),
            quote_id: None,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: InsuranceTier) -> Self {
        self.insurance_tier = Some(tier);
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<BudgetWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    #[must_use]
    pub fn with_quote(mut self, quote_id: QuoteId) -> Self {
        self.quote_id = Some(quote_id);
        self
    }

    #[must_use]
    pub fn with_trace(mut self, audit_trace_id: AuditTraceId) -> Self {
        self.audit_trace_id = audit_trace_id;
        self
    }

    /// Structural validation; no ledger state is consulted.
    pub fn validate(&self) -> Result<()> {
        if self.escrow_amount.is_sign_negative() && !self.escrow_amount.is_zero() {
            return Err(OrderguardError::NegativeEscrowAmount(self.escrow_amount));
        }
        if self.order_id.0.is_nil() {
            return Err(OrderguardError::InvalidRequest {
                reason: "order id must not be nil".to_string(),
            });
        }
        if self.owner_id.0.is_nil() {
            return Err(OrderguardError::InvalidRequest {
                reason: "owner id must not be nil".to_string(),
            });
        }
        Ok(())
    }
}

/// Token and deadline for a lock parked behind the acknowledgement gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAcknowledgement {
    pub token: AckToken,
    pub deadline: DateTime<Utc>,
}

/// Funds held on behalf of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub order_id: OrderId,
    pub owner_id: PlayerId,
    pub escrow_amount: Decimal,
    pub insurance_tier: Option<InsuranceTier>,
    pub status: EscrowStatus,
    /// Set when the lock becomes LOCKED; never moved afterwards.
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Clamped hold duration the expiry was computed from.
    pub hold_duration_minutes: u32,
    pub audit_trace_id: AuditTraceId,
    pub warnings: Vec<BudgetWarning>,
    /// Idempotency key of the most recent transition event.
    pub event_id: Option<EventId>,
    /// Number of earlier terminal locks on this order slot.
    pub generation: u32,
    pub acknowledgement: Option<PendingAcknowledgement>,
    pub quote_id: Option<QuoteId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Transition events not yet acknowledged by the event stream, oldest first.
    #[serde(default)]
    pub outbox: Vec<SettlementEvent>,
}

impl EscrowLock {
    /// A fresh PENDING lock for `request`.
    #[must_use]
    pub fn pending(request: &LockRequest, generation: u32, now: DateTime<Utc>) -> Self {
        Self {
            order_id: request.order_id,
            owner_id: request.owner_id,
            escrow_amount: request.escrow_amount,
            insurance_tier: request.insurance_tier,
            status: EscrowStatus::Pending,
            lock_expires_at: None,
            hold_duration_minutes: request.hold_duration_minutes,
            audit_trace_id: request.audit_trace_id,
            warnings: request.warnings.clone(),
            event_id: None,
            generation,
            acknowledgement: None,
            quote_id: request.quote_id,
            created_at: now,
            updated_at: now,
            outbox: Vec::new(),
        }
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    /// Returns `IllegalTransition` if the state machine forbids it.
    pub fn transition(&mut self, target: EscrowStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(OrderguardError::IllegalTransition {
                order_id: self.order_id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → LOCKED with a hold of `hold_minutes` starting at `now`.
    ///
    /// # Errors
    /// Returns `IllegalTransition` unless the lock is PENDING.
    pub fn hold(&mut self, hold_minutes: u32, now: DateTime<Utc>) -> Result<()> {
        self.transition(EscrowStatus::Locked, now)?;
        self.hold_duration_minutes = hold_minutes;
        self.lock_expires_at = Some(now + Duration::minutes(i64::from(hold_minutes)));
        self.acknowledgement = None;
        Ok(())
    }

    /// LOCKED and past its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EscrowStatus::Locked && self.lock_expires_at.is_some_and(|t| now > t)
    }

    /// PENDING and past its acknowledgement deadline.
    #[must_use]
    pub fn is_ack_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EscrowStatus::Pending
            && self
                .acknowledgement
                .as_ref()
                .is_some_and(|ack| now > ack.deadline)
    }

    /// Either kind of expiry applies.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.is_expired_at(now) || self.is_ack_overdue_at(now)
    }

    /// Whether a transition event still awaits delivery.
    #[must_use]
    pub fn has_undelivered_event(&self) -> bool {
        !self.outbox.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LockRequest {
        LockRequest::new(OrderId::new(), PlayerId::new(), Decimal::new(500, 0), 10)
    }

    #[test]
    fn legal_transitions() {
        use EscrowStatus::*;
        assert!(Pending.can_transition_to(Locked));
        assert!(Pending.can_transition_to(Expired));
        assert!(Locked.can_transition_to(Releasing));
        assert!(Locked.can_transition_to(Expired));
        assert!(Releasing.can_transition_to(Released));
    }

    #[test]
    fn terminal_states_are_final() {
        use EscrowStatus::*;
        for target in [Pending, Locked, Releasing, Released, Expired] {
            assert!(!Released.can_transition_to(target));
            assert!(!Expired.can_transition_to(target));
        }
        assert!(!Releasing.can_transition_to(Expired));
        assert!(!Locked.can_transition_to(Released));
    }

    #[test]
    fn legacy_vocabulary_parses() {
        assert_eq!("HOLDING".parse::<EscrowStatus>().unwrap(), EscrowStatus::Locked);
        assert_eq!("pending".parse::<EscrowStatus>().unwrap(), EscrowStatus::Pending);
        assert_eq!("released".parse::<EscrowStatus>().unwrap(), EscrowStatus::Released);
        assert!("FROZEN".parse::<EscrowStatus>().is_err());

        let status: EscrowStatus = serde_json::from_str("\"HOLDING\"").unwrap();
        assert_eq!(status, EscrowStatus::Locked);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"LOCKED\"");
    }

    #[test]
    fn negative_amount_rejected() {
        let mut req = request();
        req.escrow_amount = Decimal::new(-1, 0);
        assert!(matches!(
            req.validate(),
            Err(OrderguardError::NegativeEscrowAmount(_))
        ));
    }

    #[test]
    fn zero_amount_allowed() {
        let mut req = request();
        req.escrow_amount = Decimal::ZERO;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn hold_sets_expiry() {
        let now = Utc::now();
        let mut lock = EscrowLock::pending(&request(), 0, now);
        lock.hold(10, now).unwrap();
        assert_eq!(lock.status, EscrowStatus::Locked);
        assert_eq!(lock.lock_expires_at, Some(now + Duration::minutes(10)));
        assert!(!lock.is_expired_at(now + Duration::minutes(10)));
        assert!(lock.is_expired_at(now + Duration::minutes(10) + Duration::seconds(1)));
    }

    #[test]
    fn hold_twice_fails() {
        let now = Utc::now();
        let mut lock = EscrowLock::pending(&request(), 0, now);
        lock.hold(10, now).unwrap();
        let err = lock.hold(20, now).unwrap_err();
        assert!(matches!(err, OrderguardError::IllegalTransition { .. }));
        assert_eq!(lock.lock_expires_at, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn ack_overdue_only_when_pending() {
        let now = Utc::now();
        let mut lock = EscrowLock::pending(&request(), 0, now);
        lock.acknowledgement = Some(PendingAcknowledgement {
            token: AckToken::derive(["t"]),
            deadline: now + Duration::minutes(30),
        });
        assert!(!lock.is_ack_overdue_at(now));
        assert!(lock.is_ack_overdue_at(now + Duration::minutes(31)));
        assert!(lock.is_due_at(now + Duration::minutes(31)));
    }
}
