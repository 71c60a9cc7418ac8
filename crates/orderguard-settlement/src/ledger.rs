//! Escrow ledger: one slot per order, transitions serialized per order.
//!
//! Locks live in a `DashMap<OrderId, EscrowLock>`. Every transition runs
//! under the entry's shard write guard, so writes to one order are totally
//! ordered while different orders proceed in parallel. The transition
//! appends its [`SettlementEvent`] to the lock's outbox before the guard is
//! dropped; delivery happens afterwards, outside the guard.
//!
//! ## Outcomes
//!
//! - A committed transition (lock, park, confirm, expire) returns `Ok` even
//!   if its event is still in the outbox; the sweeper re-drives it.
//! - Release is committed only when its event is acknowledged. Until then
//!   the lock stays `RELEASING` and [`EscrowLedger::release`] returns
//!   [`OrderguardError::EventDeliveryPending`]; calling it again re-drives
//!   the same event id.
//! - Losing a release/expire race is a [`Transition::NoOp`], not an error.
//!
//! ## Retention
//!
//! The sweep drops terminal locks with an empty outbox once they are older
//! than `terminal_retention_minutes`, together with archived generations of
//! the same age. Only the next generation number of a dropped order is kept,
//! so re-using the order never repeats an event id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use orderguard_types::{
    AckToken, Clock, EscrowLock, EscrowPolicy, EscrowStatus, LockRequest, OrderId,
    OrderguardError, PendingAcknowledgement, Result, SettlementEvent, SettlementEventKind,
};

use crate::publisher::SettlementEventPublisher;

/// Result of a transition request that may legitimately do nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The requested transition happened.
    Applied(EscrowLock),
    /// The lock was already terminal, or a competing transition won.
    NoOp(EscrowLock),
}

impl Transition {
    #[must_use]
    pub fn lock(&self) -> &EscrowLock {
        match self {
            Self::Applied(lock) | Self::NoOp(lock) => lock,
        }
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    #[must_use]
    pub fn status(&self) -> EscrowStatus {
        self.lock().status
    }
}

/// Counts from one [`EscrowLedger::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub released: usize,
    pub redelivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// What a release staged under the guard.
enum StagedRelease {
    Release,
    ExpiredFirst,
}

pub struct EscrowLedger {
    policy: EscrowPolicy,
    clock: Arc<dyn Clock>,
    publisher: Arc<SettlementEventPublisher>,
    locks: DashMap<OrderId, EscrowLock>,
    /// Terminal locks displaced by a newer generation.
    history: DashMap<OrderId, Vec<EscrowLock>>,
    /// Next generation of orders whose slot was pruned.
    retired: DashMap<OrderId, u32>,
    /// Ledger-wide event sequence.
    sequence: AtomicU64,
}

impl EscrowLedger {
    pub fn new(
        policy: EscrowPolicy,
        clock: Arc<dyn Clock>,
        publisher: Arc<SettlementEventPublisher>,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            clock,
            publisher,
            locks: DashMap::new(),
            history: DashMap::new(),
            retired: DashMap::new(),
            sequence: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    /// Hold funds for an order: a new lock goes straight to `LOCKED`.
    ///
    /// The hold is clamped to the configured bounds and
    /// `lock_expires_at = now + hold`.
    ///
    /// # Errors
    /// - validation errors from [`LockRequest::validate`]
    /// - [`OrderguardError::LockAlreadyActive`] if a non-terminal lock exists
    /// - [`OrderguardError::EventDeliveryPending`] if the previous lock on this
    ///   order still has undelivered events
    pub fn lock(&self, request: &LockRequest) -> Result<EscrowLock> {
        request.validate()?;
        let now = self.clock.now();
        let hold = self.clamp_hold(request);

        {
            let mut fresh = EscrowLock::pending(request, 0, now);
            fresh.hold(hold, now)?;
            let mut lock = self.install(self.locks.entry(request.order_id), fresh)?;
            self.stage(&mut lock, SettlementEventKind::LockCreated, now);
            tracing::info!(
                order_id = %lock.order_id,
                owner_id = %lock.owner_id,
                amount = %lock.escrow_amount,
                tier = ?lock.insurance_tier,
                hold_minutes = hold,
                expires_at = ?lock.lock_expires_at,
                generation = lock.generation,
                trace = %lock.audit_trace_id,
                "Escrow locked"
            );
        }

        self.flush_committed(request.order_id)
    }

    /// Reserve the order slot as `PENDING` until `token` is echoed back.
    ///
    /// Re-parking a pending order for the same owner is idempotent: the same
    /// token returns the stored lock unchanged, a new token replaces the old
    /// one and restarts the acknowledgement window.
    pub fn park(&self, request: &LockRequest, token: &AckToken) -> Result<EscrowLock> {
        request.validate()?;
        let now = self.clock.now();
        let deadline = now + Duration::minutes(i64::from(self.policy.ack_window_minutes));

        {
            let mut entry = self.locks.entry(request.order_id);
            if let Entry::Occupied(slot) = &mut entry {
                let existing = slot.get_mut();
                if existing.status == EscrowStatus::Pending && existing.owner_id == request.owner_id {
                    let same_token = existing
                        .acknowledgement
                        .as_ref()
                        .is_some_and(|ack| &ack.token == token);
                    if !same_token {
                        existing.acknowledgement = Some(PendingAcknowledgement {
                            token: token.clone(),
                            deadline,
                        });
                        existing.updated_at = now;
                        tracing::debug!(order_id = %request.order_id, token = %token, "Parked lock re-keyed");
                    }
                    return Ok(existing.clone());
                }
            }

            let mut fresh = EscrowLock::pending(request, 0, now);
            fresh.hold_duration_minutes = self.clamp_hold(request);
            fresh.acknowledgement = Some(PendingAcknowledgement {
                token: token.clone(),
                deadline,
            });
            let mut lock = self.install(entry, fresh)?;
            self.stage(&mut lock, SettlementEventKind::LockRequested, now);
            tracing::info!(
                order_id = %lock.order_id,
                owner_id = %lock.owner_id,
                token = %token,
                deadline = %deadline,
                "Escrow parked awaiting acknowledgement"
            );
        }

        self.flush_committed(request.order_id)
    }

    /// `PENDING → LOCKED` for a parked order whose token matches.
    ///
    /// Amount, tier, warnings and quote are taken from `request`, which may
    /// differ from the parked one (e.g. after a quote redemption).
    ///
    /// # Errors
    /// - [`OrderguardError::LockNotFound`] if nothing was parked
    /// - [`OrderguardError::InvalidAcknowledgement`] on a token mismatch
    /// - [`OrderguardError::IllegalTransition`] unless the lock is `PENDING`;
    ///   a parked lock past its acknowledgement deadline is expired first
    pub fn confirm(&self, request: &LockRequest, token: &AckToken) -> Result<EscrowLock> {
        request.validate()?;
        let order_id = request.order_id;
        let now = self.clock.now();
        let hold = self.clamp_hold(request);

        let overdue = {
            let mut lock = self
                .locks
                .get_mut(&order_id)
                .ok_or(OrderguardError::LockNotFound(order_id))?;
            if lock.status != EscrowStatus::Pending {
                return Err(OrderguardError::IllegalTransition {
                    order_id,
                    from: lock.status,
                    to: EscrowStatus::Locked,
                });
            }
            let token_ok = lock
                .acknowledgement
                .as_ref()
                .is_some_and(|ack| &ack.token == token);
            if !token_ok {
                tracing::warn!(order_id = %order_id, "Acknowledgement token rejected");
                return Err(OrderguardError::InvalidAcknowledgement(order_id));
            }
            if lock.owner_id != request.owner_id {
                return Err(OrderguardError::InvalidRequest {
                    reason: format!("order {order_id} is parked for another owner"),
                });
            }

            if lock.is_ack_overdue_at(now) {
                lock.transition(EscrowStatus::Expired, now)?;
                self.stage(&mut lock, SettlementEventKind::LockExpired, now);
                true
            } else {
                lock.escrow_amount = request.escrow_amount;
                lock.insurance_tier = request.insurance_tier;
                lock.warnings.clone_from(&request.warnings);
                lock.quote_id = request.quote_id;
                lock.hold(hold, now)?;
                self.stage(&mut lock, SettlementEventKind::LockCreated, now);
                tracing::info!(
                    order_id = %order_id,
                    amount = %lock.escrow_amount,
                    expires_at = ?lock.lock_expires_at,
                    "Parked escrow confirmed"
                );
                false
            }
        };

        let lock = self.flush_committed(order_id)?;
        if overdue {
            tracing::info!(order_id = %order_id, "Acknowledgement arrived after deadline, lock expired");
            return Err(OrderguardError::IllegalTransition {
                order_id,
                from: EscrowStatus::Expired,
                to: EscrowStatus::Locked,
            });
        }
        Ok(lock)
    }

    /// Release the funds: `LOCKED → RELEASING → RELEASED`.
    ///
    /// From `RELEASING` the pending release event is re-driven with its
    /// original id. A lock already past its expiry expires instead and the
    /// release reports [`Transition::NoOp`], as does release on a terminal lock.
    ///
    /// # Errors
    /// - [`OrderguardError::LockNotFound`]
    /// - [`OrderguardError::IllegalTransition`] from `PENDING`
    /// - [`OrderguardError::EventDeliveryPending`] / [`OrderguardError::EventRejected`]
    ///   when the release event was not acknowledged; the lock stays `RELEASING`
    pub fn release(&self, order_id: OrderId) -> Result<Transition> {
        let now = self.clock.now();

        let staged = {
            let mut lock = self
                .locks
                .get_mut(&order_id)
                .ok_or(OrderguardError::LockNotFound(order_id))?;
            let status = lock.status;
            match status {
                EscrowStatus::Pending => {
                    return Err(OrderguardError::IllegalTransition {
                        order_id,
                        from: EscrowStatus::Pending,
                        to: EscrowStatus::Releasing,
                    });
                }
                EscrowStatus::Released | EscrowStatus::Expired => {
                    tracing::debug!(order_id = %order_id, status = %status, "Release on terminal lock ignored");
                    return Ok(Transition::NoOp(lock.clone()));
                }
                EscrowStatus::Locked if lock.is_expired_at(now) => {
                    lock.transition(EscrowStatus::Expired, now)?;
                    self.stage(&mut lock, SettlementEventKind::LockExpired, now);
                    StagedRelease::ExpiredFirst
                }
                EscrowStatus::Locked => {
                    lock.transition(EscrowStatus::Releasing, now)?;
                    self.stage(&mut lock, SettlementEventKind::LockReleased, now);
                    StagedRelease::Release
                }
                EscrowStatus::Releasing => {
                    let has_release_event = lock
                        .outbox
                        .iter()
                        .any(|e| e.kind == SettlementEventKind::LockReleased);
                    if !has_release_event {
                        self.stage(&mut lock, SettlementEventKind::LockReleased, now);
                    }
                    tracing::info!(order_id = %order_id, "Re-driving interrupted release");
                    StagedRelease::Release
                }
            }
        };

        match staged {
            StagedRelease::ExpiredFirst => {
                let lock = self.flush_committed(order_id)?;
                tracing::info!(order_id = %order_id, "Release lost to expiry");
                Ok(Transition::NoOp(lock))
            }
            StagedRelease::Release => match self.flush(order_id) {
                Ok(lock) => Ok(Transition::Applied(lock)),
                Err(err) => {
                    tracing::warn!(
                        order_id = %order_id,
                        error = %err,
                        "Release event not acknowledged, lock stays RELEASING"
                    );
                    Err(err)
                }
            },
        }
    }

    /// `LOCKED → EXPIRED` once `now > lock_expires_at`, or `PENDING → EXPIRED`
    /// once the acknowledgement deadline passed. Anything else is a no-op.
    pub fn expire(&self, order_id: OrderId) -> Result<Transition> {
        let now = self.clock.now();
        {
            let mut lock = self
                .locks
                .get_mut(&order_id)
                .ok_or(OrderguardError::LockNotFound(order_id))?;
            if !lock.is_due_at(now) {
                return Ok(Transition::NoOp(lock.clone()));
            }
            let from = lock.status;
            lock.transition(EscrowStatus::Expired, now)?;
            self.stage(&mut lock, SettlementEventKind::LockExpired, now);
            tracing::info!(
                order_id = %order_id,
                from = %from,
                expires_at = ?lock.lock_expires_at,
                "Escrow expired"
            );
        }
        self.flush_committed(order_id).map(Transition::Applied)
    }

    /// Deliver whatever sits in the order's outbox.
    ///
    /// # Errors
    /// The first delivery failure; later events stay queued behind it.
    pub fn redeliver(&self, order_id: OrderId) -> Result<EscrowLock> {
        self.flush(order_id)
    }

    /// Expire every due lock and re-drive every undelivered outbox.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let candidates: Vec<(OrderId, EscrowStatus, bool)> = self
            .locks
            .iter()
            .filter(|e| e.is_due_at(now) || e.has_undelivered_event())
            .map(|e| (*e.key(), e.status, e.is_due_at(now)))
            .collect();

        let mut report = SweepReport::default();
        for (order_id, status, due) in candidates {
            let outcome = if due {
                self.expire(order_id).map(|t| {
                    if t.is_applied() {
                        report.expired += 1;
                    }
                    t.lock().has_undelivered_event()
                })
            } else if status == EscrowStatus::Releasing {
                self.release(order_id).map(|t| {
                    if t.is_applied() {
                        report.released += 1;
                    }
                    false
                })
            } else {
                self.flush(order_id).map(|_| {
                    report.redelivered += 1;
                    false
                })
            };
            match outcome {
                Ok(false) => {}
                Ok(true) => report.failed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(order_id = %order_id, error = %err, "Sweep could not settle order");
                }
            }
        }

        report.pruned = self.prune(now);

        tracing::debug!(
            expired = report.expired,
            released = report.released,
            redelivered = report.redelivered,
            failed = report.failed,
            pruned = report.pruned,
            "Escrow sweep finished"
        );
        report
    }

    // =====================================================================
    // Reads
    // =====================================================================

    #[must_use]
    pub fn get(&self, order_id: OrderId) -> Option<EscrowLock> {
        self.locks.get(&order_id).map(|l| l.clone())
    }

    /// Locks not yet `RELEASED` or `EXPIRED`.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.locks.iter().filter(|l| l.status.is_active()).count()
    }

    /// Earlier terminal generations of this order's lock, oldest first.
    #[must_use]
    pub fn history(&self, order_id: OrderId) -> Vec<EscrowLock> {
        self.history
            .get(&order_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    // =====================================================================
    // Internals
    // =====================================================================

    fn clamp_hold(&self, request: &LockRequest) -> u32 {
        let hold = self.policy.clamp_hold(request.hold_duration_minutes);
        if hold != request.hold_duration_minutes {
            tracing::debug!(
                order_id = %request.order_id,
                requested = request.hold_duration_minutes,
                clamped = hold,
                "Hold duration clamped"
            );
        }
        hold
    }

    /// Install `fresh` in its order slot, displacing a terminal predecessor.
    fn install<'a>(
        &'a self,
        entry: Entry<'a, OrderId, EscrowLock>,
        mut fresh: EscrowLock,
    ) -> Result<RefMut<'a, OrderId, EscrowLock>> {
        match entry {
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                if existing.status.is_active() {
                    return Err(OrderguardError::LockAlreadyActive {
                        order_id: existing.order_id,
                        status: existing.status,
                    });
                }
                if let Some(pending) = existing.outbox.first() {
                    return Err(OrderguardError::EventDeliveryPending {
                        event_id: pending.event_id,
                        reason: "previous lock on this order has undelivered events".to_string(),
                    });
                }
                fresh.generation = existing.generation.saturating_add(1);
                let previous = slot.insert(fresh);
                self.history
                    .entry(previous.order_id)
                    .or_default()
                    .push(previous);
                Ok(slot.into_ref())
            }
            Entry::Vacant(slot) => {
                fresh.generation = self
                    .retired
                    .remove(slot.key())
                    .map_or(0, |(_, generation)| generation);
                Ok(slot.insert(fresh))
            }
        }
    }

    /// Drop settled terminal locks and archived generations past retention.
    fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(i64::from(self.policy.terminal_retention_minutes));
        let mut pruned = 0;
        self.locks.retain(|order_id, lock| {
            let keep = lock.status.is_active() || lock.has_undelivered_event() || lock.updated_at > cutoff;
            if !keep {
                self.retired
                    .insert(*order_id, lock.generation.saturating_add(1));
                pruned += 1;
            }
            keep
        });
        self.history.retain(|_, archived| {
            archived.retain(|lock| lock.updated_at > cutoff);
            !archived.is_empty()
        });
        if pruned > 0 {
            tracing::debug!(pruned, "Settled escrow locks pruned");
        }
        pruned
    }

    /// Append the event for `kind` to the lock's outbox.
    fn stage(&self, lock: &mut EscrowLock, kind: SettlementEventKind, now: DateTime<Utc>) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = SettlementEvent::for_lock(lock, kind, sequence, now);
        lock.event_id = Some(event.event_id);
        lock.outbox.push(event);
    }

    /// Deliver the outbox in order until it is empty or a delivery fails.
    fn flush(&self, order_id: OrderId) -> Result<EscrowLock> {
        loop {
            let next = {
                let lock = self
                    .locks
                    .get(&order_id)
                    .ok_or(OrderguardError::LockNotFound(order_id))?;
                match lock.outbox.first() {
                    Some(event) => event.clone(),
                    None => return Ok(lock.clone()),
                }
            };

            self.publisher.publish(&next)?;

            let mut lock = self
                .locks
                .get_mut(&order_id)
                .ok_or(OrderguardError::LockNotFound(order_id))?;
            if lock.outbox.first().is_some_and(|e| e.event_id == next.event_id) {
                lock.outbox.remove(0);
                if next.kind == SettlementEventKind::LockReleased
                    && lock.status == EscrowStatus::Releasing
                {
                    lock.transition(EscrowStatus::Released, self.clock.now())?;
                    tracing::info!(
                        order_id = %order_id,
                        amount = %lock.escrow_amount,
                        event_id = %next.event_id,
                        "Escrow released"
                    );
                }
            }
        }
    }

    /// Flush after a committed transition. A delivery failure is logged and
    /// left to the sweeper; the committed lock is returned either way.
    fn flush_committed(&self, order_id: OrderId) -> Result<EscrowLock> {
        match self.flush(order_id) {
            Ok(lock) => Ok(lock),
            Err(err) => {
                tracing::warn!(
                    order_id = %order_id,
                    error = %err,
                    "Settlement event left in outbox for the sweeper"
                );
                self.get(order_id)
                    .ok_or(OrderguardError::LockNotFound(order_id))
            }
        }
    }
}
