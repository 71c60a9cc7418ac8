//! # orderguard-settlement
//!
//! **Settlement Plane**: escrow holds, settlement events, quote redemption,
//! and the orchestration of both planes.
//!
//! ## Architecture
//!
//! 1. **EscrowLedger**: one lock per order, `PENDING → LOCKED → RELEASING →
//!    RELEASED` or `→ EXPIRED`, transitions serialized per order
//! 2. **SettlementEventPublisher**: at-least-once delivery with a stable
//!    event id per transition
//! 3. **EventDeduplicator**: consumer-side filter for redeliveries
//! 4. **QuoteBook**: single-use, time-limited quote redemption
//! 5. **OrderSettlementOrchestrator**: quote, budget gate, lock, release
//! 6. **ExpirySweeper**: tokio task driving expiry and re-delivery
//!
//! ## Delivery
//!
//! Each transition appends its event to the lock's outbox under the order's
//! write guard; the outbox is flushed after the guard is released. Events
//! that fail delivery stay queued and are re-driven, in order and with the
//! same id, by the next `release` call or sweep.

pub mod dedup;
pub mod ledger;
pub mod orchestrator;
pub mod publisher;
pub mod quote_book;
pub mod sweeper;
pub mod telemetry;

pub use dedup::EventDeduplicator;
pub use ledger::{EscrowLedger, SweepReport, Transition};
pub use orchestrator::{
    LockResponse, MaintenanceReport, OrderLockRequest, OrderQuoteRequest,
    OrderSettlementOrchestrator, QuoteResponse,
};
pub use publisher::{ChannelSink, EventSink, InMemoryEventStream, SettlementEventPublisher, SinkError};
pub use quote_book::QuoteBook;
pub use sweeper::ExpirySweeper;
pub use telemetry::{LogConfig, LogFormat};
