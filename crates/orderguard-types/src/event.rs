//! Settlement events: outbound notifications of escrow transitions.
//!
//! Delivery is at-least-once. Consumers de-duplicate by [`SettlementEvent::event_id`],
//! which is derived from the transition itself and therefore survives retries.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AuditTraceId, EscrowLock, EscrowStatus, EventId, InsuranceTier, OrderId, PlayerId};

/// Which transition the event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementEventKind {
    /// Lock parked as PENDING behind an acknowledgement.
    LockRequested,
    /// Lock entered LOCKED.
    LockCreated,
    /// Lock reached RELEASED.
    LockReleased,
    /// Lock reached EXPIRED.
    LockExpired,
}

impl SettlementEventKind {
    /// Stable tag mixed into the event id.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::LockRequested => "lock_requested",
            Self::LockCreated => "lock_created",
            Self::LockReleased => "lock_released",
            Self::LockExpired => "lock_expired",
        }
    }

    /// Status the lock ends up in once the event is delivered.
    #[must_use]
    pub fn resulting_status(&self) -> EscrowStatus {
        match self {
            Self::LockRequested => EscrowStatus::Pending,
            Self::LockCreated => EscrowStatus::Locked,
            Self::LockReleased => EscrowStatus::Released,
            Self::LockExpired => EscrowStatus::Expired,
        }
    }
}

impl fmt::Display for SettlementEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One escrow transition, as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub event_id: EventId,
    pub order_id: OrderId,
    pub owner_id: PlayerId,
    pub kind: SettlementEventKind,
    pub status: EscrowStatus,
    pub escrow_amount: Decimal,
    pub insurance_tier: Option<InsuranceTier>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub generation: u32,
    /// Ledger-wide monotonic sequence, assigned once per logical transition.
    pub sequence: u64,
    pub audit_trace_id: AuditTraceId,
    pub occurred_at: DateTime<Utc>,
}

impl SettlementEvent {
    /// Describe `kind` happening to `lock`.
    #[must_use]
    pub fn for_lock(
        lock: &EscrowLock,
        kind: SettlementEventKind,
        sequence: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId::deterministic(lock.order_id, lock.generation, kind.tag()),
            order_id: lock.order_id,
            owner_id: lock.owner_id,
            kind,
            status: kind.resulting_status(),
            escrow_amount: lock.escrow_amount,
            insurance_tier: lock.insurance_tier,
            lock_expires_at: lock.lock_expires_at,
            generation: lock.generation,
            sequence,
            audit_trace_id: lock.audit_trace_id,
            occurred_at,
        }
    }

    /// Partition key for the event stream.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockRequest;

    #[test]
    fn same_transition_same_id() {
        let req = LockRequest::new(OrderId::new(), PlayerId::new(), Decimal::new(500, 0), 10);
        let lock = EscrowLock::pending(&req, 0, Utc::now());
        let a = SettlementEvent::for_lock(&lock, SettlementEventKind::LockReleased, 1, Utc::now());
        let b = SettlementEvent::for_lock(&lock, SettlementEventKind::LockReleased, 9, Utc::now());
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a.status, EscrowStatus::Released);
    }

    #[test]
    fn release_and_expiry_ids_differ() {
        let req = LockRequest::new(OrderId::new(), PlayerId::new(), Decimal::new(500, 0), 10);
        let lock = EscrowLock::pending(&req, 0, Utc::now());
        let released =
            SettlementEvent::for_lock(&lock, SettlementEventKind::LockReleased, 1, Utc::now());
        let expired =
            SettlementEvent::for_lock(&lock, SettlementEventKind::LockExpired, 1, Utc::now());
        assert_ne!(released.event_id, expired.event_id);
    }

    #[test]
    fn event_serializes_kind_snake_case() {
        let req = LockRequest::new(OrderId::new(), PlayerId::new(), Decimal::new(500, 0), 10);
        let lock = EscrowLock::pending(&req, 0, Utc::now());
        let event =
            SettlementEvent::for_lock(&lock, SettlementEventKind::LockCreated, 0, Utc::now());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"lock_created\""));
        assert!(json.contains("\"LOCKED\""));
        assert_eq!(event.partition_key(), req.order_id.to_string());
    }
}
