//! # orderguard-types
//!
//! Shared types, errors, and configuration for the **OrderGuard** settlement
//! engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`PlayerId`], [`QuoteId`], [`IncidentId`], [`AuditTraceId`], [`EventId`], [`AckToken`]
//! - **Risk model**: [`RiskContext`], [`RiskGrade`], [`RiskEvaluationResult`], [`RiskAlert`]
//! - **Incident model**: [`RiskIncident`], [`PlayerRiskProfile`]
//! - **Escrow model**: [`EscrowLock`], [`EscrowStatus`], [`LockRequest`]
//! - **Insurance model**: [`InsuranceTier`], [`InsuranceTierDefinition`], [`InsuranceQuote`]
//! - **Budget model**: [`BudgetWarning`], [`BudgetComparisonRequest`], [`BudgetComparisonResult`], [`MarketBaseline`]
//! - **Events**: [`SettlementEvent`], [`SettlementEventKind`]
//! - **Configuration**: [`EngineConfig`] and its policy sections
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Errors**: [`OrderguardError`] with `OG_ERR_` prefix codes

pub mod budget;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod event;
pub mod ids;
pub mod incident;
pub mod insurance;
pub mod risk;

// Re-export all primary types at crate root for ergonomic imports:
//   use orderguard_types::{EscrowLock, EscrowStatus, RiskGrade, ...};

pub use budget::*;
pub use clock::*;
pub use self::config::*;
pub use error::*;
pub use escrow::*;
pub use event::*;
pub use ids::*;
pub use incident::*;
pub use insurance::*;
pub use risk::*;

// Constants are accessed via `orderguard_types::constants::FOO`
// (not re-exported to avoid name collisions).
