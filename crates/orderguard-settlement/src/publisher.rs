//! Settlement event delivery.
//!
//! The publisher hands each event to an [`EventSink`], retrying transient
//! failures a bounded number of times. Every attempt carries the same
//! [`SettlementEvent::event_id`]; a failed delivery is never re-minted; the
//! event stays in the lock's outbox and is re-driven later with the same id.
//!
//! Delivery is blocking (the backoff sleeps the calling thread). Async
//! callers run ledger operations on the blocking pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use orderguard_types::{EventId, OrderguardError, PublisherConfig, Result, SettlementEvent};
use tokio::sync::mpsc;

use crate::dedup::EventDeduplicator;

/// Why a sink did not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Worth retrying (timeout, broker unavailable).
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// Retrying cannot help (schema rejected, stream closed).
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// Destination of settlement events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. `Ok` means the stream acknowledged it.
    fn deliver(&self, event: &SettlementEvent) -> std::result::Result<(), SinkError>;
}

pub struct SettlementEventPublisher {
    sink: Arc<dyn EventSink>,
    config: PublisherConfig,
}

impl SettlementEventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, config: PublisherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { sink, config })
    }

    /// Deliver `event`, retrying transient failures.
    ///
    /// # Errors
    /// - [`OrderguardError::EventDeliveryPending`] after the last transient failure
    /// - [`OrderguardError::EventRejected`] on a permanent rejection (not retried)
    pub fn publish(&self, event: &SettlementEvent) -> Result<()> {
        let mut last_reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.sink.deliver(event) {
                Ok(()) => {
                    tracing::debug!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        kind = %event.kind,
                        sequence = event.sequence,
                        attempt,
                        "Settlement event delivered"
                    );
                    return Ok(());
                }
                Err(SinkError::Rejected(reason)) => {
                    tracing::error!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        kind = %event.kind,
                        reason = %reason,
                        "Settlement event rejected"
                    );
                    return Err(OrderguardError::EventRejected {
                        event_id: event.event_id,
                        reason,
                    });
                }
                Err(SinkError::Transient(reason)) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        order_id = %event.order_id,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        reason = %reason,
                        "Settlement event delivery failed, retrying"
                    );
                    last_reason = reason;
                    if attempt < self.config.max_attempts && self.config.backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.config.backoff_ms));
                    }
                }
            }
        }
        Err(OrderguardError::EventDeliveryPending {
            event_id: event.event_id,
            reason: last_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory stream
// ---------------------------------------------------------------------------

/// Sink that records every delivery in memory.
///
/// Failures can be scripted with [`InMemoryEventStream::fail_next`] to drive
/// retry and re-drive paths.
#[derive(Debug, Default)]
pub struct InMemoryEventStream {
    delivered: Mutex<Vec<SettlementEvent>>,
    scripted_failures: Mutex<VecDeque<SinkError>>,
}

impl InMemoryEventStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` deliveries fail with `error`.
    pub fn fail_next(&self, count: usize, error: &SinkError) {
        let mut failures = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        failures.extend(std::iter::repeat_n(error.clone(), count));
    }

    /// Every accepted delivery, redeliveries included, in arrival order.
    #[must_use]
    pub fn delivered(&self) -> Vec<SettlementEvent> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepted deliveries with redeliveries dropped, as a consumer sees them.
    #[must_use]
    pub fn unique(&self) -> Vec<SettlementEvent> {
        let delivered = self.delivered();
        let Ok(mut dedup) = EventDeduplicator::new(delivered.len().max(1)) else {
            return delivered;
        };
        delivered
            .into_iter()
            .filter(|e| dedup.observe(e.event_id))
            .collect()
    }

    /// Deliveries carrying `event_id`.
    #[must_use]
    pub fn count_of(&self, event_id: EventId) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_id == event_id)
            .count()
    }
}

impl EventSink for InMemoryEventStream {
    fn deliver(&self, event: &SettlementEvent) -> std::result::Result<(), SinkError> {
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel sink
// ---------------------------------------------------------------------------

/// Sink feeding an unbounded tokio channel, for async consumers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SettlementEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SettlementEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &SettlementEvent) -> std::result::Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::Rejected("event receiver dropped".to_string()))
    }
}
