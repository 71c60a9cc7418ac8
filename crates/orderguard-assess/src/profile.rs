//! Per-player rolling risk profile.
//!
//! Each incident scores `severity × type weight`, decayed by
//! `0.5 ^ (age / half_life)`. The profile score is the mean decayed incident
//! score plus a capped penalty per unresolved incident, clamped to `[0, 10]`.
//!
//! Profiles are recomputed when an incident arrives or is resolved and on
//! [`RiskProfileAggregator::refresh_all`] sweeps; reads are plain clones.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orderguard_types::constants::{RISK_SCORE_MAX, RISK_SCORE_MIN};
use orderguard_types::{
    GradeThresholds, IncidentId, OrderguardError, PlayerId, PlayerRiskProfile, ProfilePolicy,
    Result, RiskIncident,
};

const SECONDS_PER_DAY: f64 = 86_400.0;

pub struct RiskProfileAggregator {
    policy: ProfilePolicy,
    thresholds: GradeThresholds,
    profiles: DashMap<PlayerId, PlayerRiskProfile>,
}

impl RiskProfileAggregator {
    pub fn new(policy: ProfilePolicy, thresholds: GradeThresholds) -> Result<Self> {
        policy.validate()?;
        thresholds.validate()?;
        Ok(Self {
            policy,
            thresholds,
            profiles: DashMap::new(),
        })
    }

    /// Record an incident and recompute the player's profile.
    ///
    /// An incident id already on file is ignored, so feeds may redeliver.
    pub fn ingest(&self, incident: RiskIncident, now: DateTime<Utc>) -> PlayerRiskProfile {
        let player_id = incident.player_id;
        let mut profile = self
            .profiles
            .entry(player_id)
            .or_insert_with(|| PlayerRiskProfile::empty(player_id, now));

        if profile.incidents.iter().any(|i| i.id == incident.id) {
            tracing::debug!(
                player_id = %player_id,
                incident_id = %incident.id,
                "Duplicate incident ignored"
            );
            return profile.clone();
        }

        let incident_type = incident.incident_type;
        let pos = profile
            .incidents
            .partition_point(|i| i.occurred_at <= incident.occurred_at);
        profile.incidents.insert(pos, incident);
        self.recompute(&mut profile, now);

        tracing::info!(
            player_id = %player_id,
            incident_type = %incident_type,
            score = profile.score,
            grade = %profile.grade,
            unresolved = profile.unresolved_count,
            "Risk incident ingested"
        );
        profile.clone()
    }

    /// Mark an incident resolved. Resolving twice keeps the first timestamp.
    ///
    /// # Errors
    /// [`OrderguardError::InvalidRequest`] if the player or incident is unknown.
    pub fn resolve(
        &self,
        player_id: PlayerId,
        incident_id: IncidentId,
        resolved_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PlayerRiskProfile> {
        let unknown = || OrderguardError::InvalidRequest {
            reason: format!("incident {incident_id} not recorded for player {player_id}"),
        };
        let mut profile = self.profiles.get_mut(&player_id).ok_or_else(unknown)?;
        let incident = profile
            .incidents
            .iter_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(unknown)?;
        if incident.resolved_at.is_some() {
            return Ok(profile.clone());
        }
        incident.resolved_at = Some(resolved_at);
        self.recompute(&mut profile, now);

        tracing::info!(
            player_id = %player_id,
            incident_id = %incident_id,
            score = profile.score,
            grade = %profile.grade,
            "Risk incident resolved"
        );
        Ok(profile.clone())
    }

    /// Stored profile, if the player has any history.
    #[must_use]
    pub fn profile(&self, player_id: PlayerId) -> Option<PlayerRiskProfile> {
        self.profiles.get(&player_id).map(|p| p.clone())
    }

    /// Re-apply decay to every profile. Returns how many were refreshed.
    pub fn refresh_all(&self, now: DateTime<Utc>) -> usize {
        let mut refreshed = 0;
        for mut entry in self.profiles.iter_mut() {
            self.recompute(entry.value_mut(), now);
            refreshed += 1;
        }
        tracing::debug!(refreshed, "Risk profiles refreshed");
        refreshed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn recompute(&self, profile: &mut PlayerRiskProfile, now: DateTime<Utc>) {
        let unresolved = profile.incidents.iter().filter(|i| !i.is_resolved()).count();
        let mean = if profile.incidents.is_empty() {
            0.0
        } else {
            let total: f64 = profile
                .incidents
                .iter()
                .map(|i| i.base_score() * self.decay(i.occurred_at, now))
                .sum();
            #[allow(clippy::cast_precision_loss)]
            let n = profile.incidents.len() as f64;
            total / n
        };
        #[allow(clippy::cast_precision_loss)]
        let penalty = (unresolved as f64 * self.policy.unresolved_penalty)
            .min(self.policy.max_unresolved_penalty);

        profile.score = (mean + penalty).clamp(RISK_SCORE_MIN, RISK_SCORE_MAX);
        profile.grade = self.thresholds.grade_for(profile.score);
        profile.unresolved_count = unresolved;
        profile.last_evaluated_at = now;
    }

    fn decay(&self, occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let age_days = ((now - occurred_at).num_seconds().max(0) as f64) / SECONDS_PER_DAY;
        0.5_f64.powf(age_days / self.policy.half_life_days)
    }
}
