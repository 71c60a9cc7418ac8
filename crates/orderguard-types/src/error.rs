//! Error types for the OrderGuard settlement engine.
//!
//! All errors use the `OG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by failure class:
//! - 1xx: Validation, rejected synchronously, never retried
//! - 2xx: Conflict, benign, the caller observes the winning state
//! - 3xx: Stale quote, caller must re-quote
//! - 4xx: Acknowledgement, request parked until a valid token arrives
//! - 5xx: Event delivery, retried with the same idempotency key
//! - 9xx: Configuration / internal
//!
//! Every failure is scoped to a single order or request; nothing here is
//! fatal to the process.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AckToken, EscrowStatus, EventId, OrderId, QuoteId, RiskFactor};

/// Central error enum for all OrderGuard operations.
#[derive(Debug, Error)]
pub enum OrderguardError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The request failed structural validation.
    #[error("OG_ERR_100: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Escrow amounts can never be negative.
    #[error("OG_ERR_101: Escrow amount must be non-negative, got {0}")]
    NegativeEscrowAmount(Decimal),

    /// A risk factor was NaN, infinite, or otherwise unusable.
    #[error("OG_ERR_102: Invalid risk factor {factor}: {reason}")]
    InvalidRiskFactor { factor: RiskFactor, reason: String },

    /// A wire value did not name any known variant of a closed enumeration.
    #[error("OG_ERR_103: Unknown {kind} value '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    /// No escrow lock has ever been recorded for this order.
    #[error("OG_ERR_104: Escrow lock not found for order {0}")]
    LockNotFound(OrderId),

    /// The quote was never issued (or has been purged).
    #[error("OG_ERR_105: Quote not found: {0}")]
    QuoteNotFound(QuoteId),

    /// No tier in the catalog offers the requested coverage.
    #[error("OG_ERR_106: No insurance tier covers {desired}")]
    NoEligibleTier { desired: Decimal },

    /// Market baseline data was unusable (e.g. zero recommended budget).
    #[error("OG_ERR_107: Invalid market baseline: {reason}")]
    InvalidBaseline { reason: String },

    /// Market baseline data could not be fetched.
    #[error("OG_ERR_108: Market baseline unavailable: {reason}")]
    BaselineUnavailable { reason: String },

    // =================================================================
    // Conflict Errors (2xx)
    // =================================================================
    /// A non-terminal lock already exists for this order.
    #[error("OG_ERR_200: Active escrow lock already exists for order {order_id} ({status})")]
    LockAlreadyActive {
        order_id: OrderId,
        status: EscrowStatus,
    },

    /// The requested transition is not legal from the current status.
    #[error("OG_ERR_201: Illegal escrow transition for order {order_id}: {from} -> {to}")]
    IllegalTransition {
        order_id: OrderId,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    /// Quotes are single-use.
    #[error("OG_ERR_202: Quote already redeemed: {0}")]
    QuoteAlreadyRedeemed(QuoteId),

    // =================================================================
    // Stale Quote Errors (3xx)
    // =================================================================
    /// Redemption attempted after `valid_until`.
    #[error("OG_ERR_300: Quote {quote_id} expired at {valid_until}")]
    StaleQuote {
        quote_id: QuoteId,
        valid_until: DateTime<Utc>,
    },

    // =================================================================
    // Acknowledgement Errors (4xx)
    // =================================================================
    /// The budget comparison raised an error-level warning; the request is
    /// parked until `token` is echoed back.
    #[error("OG_ERR_400: Acknowledgement required for order {order_id} ({token})")]
    AcknowledgementRequired { order_id: OrderId, token: AckToken },

    /// The echoed token does not match the one minted for the order.
    #[error("OG_ERR_401: Acknowledgement token rejected for order {0}")]
    InvalidAcknowledgement(OrderId),

    // =================================================================
    // Event Delivery Errors (5xx)
    // =================================================================
    /// The event stream did not acknowledge the event. Retry with the same id.
    #[error("OG_ERR_500: Settlement event {event_id} not delivered: {reason}")]
    EventDeliveryPending { event_id: EventId, reason: String },

    /// The event stream permanently refused the event.
    #[error("OG_ERR_501: Settlement event {event_id} rejected by stream: {reason}")]
    EventRejected { event_id: EventId, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error (e.g. a poisoned lock).
    #[error("OG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("OG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("OG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("OG_ERR_903: I/O error: {0}")]
    Io(String),
}

impl OrderguardError {
    /// Whether retrying the same request may succeed without changes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EventDeliveryPending { .. } | Self::BaselineUnavailable { .. }
        )
    }

    /// Whether this is a benign conflict rather than a bad request.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::LockAlreadyActive { .. }
                | Self::IllegalTransition { .. }
                | Self::QuoteAlreadyRedeemed(_)
        )
    }

    /// Whether the failure is a synchronous validation rejection.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::NegativeEscrowAmount(_)
                | Self::InvalidRiskFactor { .. }
                | Self::UnknownVariant { .. }
                | Self::LockNotFound(_)
                | Self::QuoteNotFound(_)
                | Self::NoEligibleTier { .. }
                | Self::InvalidBaseline { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OrderguardError>;

impl From<std::io::Error> for OrderguardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OrderguardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<::config::ConfigError> for OrderguardError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = OrderguardError::LockNotFound(OrderId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("OG_ERR_104"), "Got: {msg}");
    }

    #[test]
    fn illegal_transition_display() {
        let err = OrderguardError::IllegalTransition {
            order_id: OrderId::new(),
            from: EscrowStatus::Released,
            to: EscrowStatus::Releasing,
        };
        let msg = format!("{err}");
        assert!(msg.contains("OG_ERR_201"));
        assert!(msg.contains("RELEASED"));
        assert!(msg.contains("RELEASING"));
    }

    #[test]
    fn classification() {
        assert!(OrderguardError::NegativeEscrowAmount(Decimal::NEGATIVE_ONE).is_validation());
        assert!(
            OrderguardError::LockAlreadyActive {
                order_id: OrderId::new(),
                status: EscrowStatus::Locked,
            }
            .is_conflict()
        );
        assert!(
            OrderguardError::EventDeliveryPending {
                event_id: EventId::deterministic(OrderId::new(), 0, "x"),
                reason: "timeout".into(),
            }
            .is_retryable()
        );
        assert!(!OrderguardError::InvalidAcknowledgement(OrderId::new()).is_retryable());
    }

    #[test]
    fn all_errors_have_og_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(OrderguardError::QuoteNotFound(QuoteId::new())),
            Box::new(OrderguardError::InvalidAcknowledgement(OrderId::new())),
            Box::new(OrderguardError::StaleQuote {
                quote_id: QuoteId::new(),
                valid_until: Utc::now(),
            }),
            Box::new(OrderguardError::Internal("test".into())),
            Box::new(OrderguardError::Configuration("bad".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("OG_ERR_"),
                "Error missing OG_ERR_ prefix: {msg}"
            );
        }
    }
}
