//! Risk incidents and the per-player profile derived from them.
//!
//! Incidents are produced by external dispute and fraud systems and are
//! append-only here: the only later change accepted for an incident is its
//! resolution timestamp.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IncidentId, OrderguardError, PlayerId, RiskGrade};

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    PaymentDelay,
    ContractBreach,
    DisputeLoss,
    FraudAttempt,
    Arbitration,
}

impl IncidentType {
    pub const ALL: [Self; 5] = [
        Self::PaymentDelay,
        Self::ContractBreach,
        Self::DisputeLoss,
        Self::FraudAttempt,
        Self::Arbitration,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentDelay => "payment_delay",
            Self::ContractBreach => "contract_breach",
            Self::DisputeLoss => "dispute_loss",
            Self::FraudAttempt => "fraud_attempt",
            Self::Arbitration => "arbitration",
        }
    }

    /// Relative weight of the incident type in the profile score.
    #[must_use]
    pub fn weight(&self) -> f64 {
        match self {
            Self::Arbitration => 0.5,
            Self::PaymentDelay => 0.6,
            Self::DisputeLoss => 0.8,
            Self::ContractBreach => 1.0,
            Self::FraudAttempt => 1.5,
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrderguardError::UnknownVariant {
                kind: "incident type",
                value: s.to_string(),
            })
    }
}

/// How bad it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    /// Score contributed by a fresh incident of this severity, before the
    /// type weight is applied.
    #[must_use]
    pub fn base_score(&self) -> f64 {
        match self {
            Self::Low => 2.5,
            Self::Medium => 5.0,
            Self::High => 7.5,
            Self::Critical => 10.0,
        }
    }
}

impl FromStr for IncidentSeverity {
    type Err = OrderguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(OrderguardError::UnknownVariant {
                kind: "incident severity",
                value: other.to_string(),
            }),
        }
    }
}

/// One recorded incident against a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIncident {
    pub id: IncidentId,
    pub player_id: PlayerId,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskIncident {
    #[must_use]
    pub fn new(
        player_id: PlayerId,
        incident_type: IncidentType,
        severity: IncidentSeverity,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IncidentId::new(),
            player_id,
            incident_type,
            severity,
            occurred_at,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Undecayed score of this incident, capped at 10.
    #[must_use]
    pub fn base_score(&self) -> f64 {
        (self.severity.base_score() * self.incident_type.weight()).min(10.0)
    }
}

/// Rolling risk view of one player. Only the profile aggregator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRiskProfile {
    pub player_id: PlayerId,
    /// Decay-weighted average incident score plus unresolved penalty, `[0, 10]`.
    pub score: f64,
    pub grade: RiskGrade,
    /// Incidents in occurrence order.
    pub incidents: Vec<RiskIncident>,
    pub unresolved_count: usize,
    pub last_evaluated_at: DateTime<Utc>,
}

impl PlayerRiskProfile {
    /// A player with no history.
    #[must_use]
    pub fn empty(player_id: PlayerId, now: DateTime<Utc>) -> Self {
        Self {
            player_id,
            score: 0.0,
            grade: RiskGrade::Low,
            incidents: Vec::new(),
            unresolved_count: 0,
            last_evaluated_at: now,
        }
    }

    /// No unresolved incidents and a low grade.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unresolved_count == 0 && self.grade == RiskGrade::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraud_outweighs_delay() {
        let player = PlayerId::new();
        let now = Utc::now();
        let fraud = RiskIncident::new(
            player,
            IncidentType::FraudAttempt,
            IncidentSeverity::Medium,
            now,
        );
        let delay = RiskIncident::new(
            player,
            IncidentType::PaymentDelay,
            IncidentSeverity::Medium,
            now,
        );
        assert!(fraud.base_score() > delay.base_score());
    }

    #[test]
    fn base_score_is_capped() {
        let incident = RiskIncident::new(
            PlayerId::new(),
            IncidentType::FraudAttempt,
            IncidentSeverity::Critical,
            Utc::now(),
        );
        assert!((incident.base_score() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn incident_type_parse() {
        assert_eq!(
            "dispute_loss".parse::<IncidentType>().unwrap(),
            IncidentType::DisputeLoss
        );
        assert!("chargeback".parse::<IncidentType>().is_err());
        assert!("catastrophic".parse::<IncidentSeverity>().is_err());
    }

    #[test]
    fn empty_profile_is_clean() {
        let profile = PlayerRiskProfile::empty(PlayerId::new(), Utc::now());
        assert!(profile.is_clean());
        assert_eq!(profile.grade, RiskGrade::Low);
    }
}
