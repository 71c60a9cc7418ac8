//! Engine configuration.
//!
//! Every tunable of the engine lives here: scoring weights and grade bands,
//! budget thresholds, quote pricing, escrow hold bounds and retention, event
//! delivery and profile decay, plus the insurance tier catalog.
//!
//! Loading is layered with the `config` crate, later layers winning:
//!
//! 1. `Default` values
//! 2. an optional JSON or TOML file (any subset of fields)
//! 3. `ORDERGUARD_<SECTION>__<FIELD>` environment variables
//!
//! and the merged result is validated before use.

use std::path::Path;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, InsuranceTierDefinition, OrderguardError, Result, RiskGrade};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskScoringConfig,
    pub budget: BudgetPolicy,
    pub quote: QuotePolicy,
    pub escrow: EscrowPolicy,
    pub publisher: PublisherConfig,
    pub profile: ProfilePolicy,
    pub tiers: TierCatalogConfig,
}

impl EngineConfig {
    /// Parse a JSON document over the defaults and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::build(Self::defaults()?.add_source(File::from_str(json, FileFormat::Json)))
    }

    /// Read a JSON or TOML file (by extension) over the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Self::defaults()?.add_source(File::from(path.as_ref())))
    }

    /// Defaults, then the file named by `ORDERGUARD_CONFIG` if set, then
    /// `ORDERGUARD_*` overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(constants::CONFIG_ENV_VAR);
        Self::layered(path.as_deref().map(Path::new), Self::env_overrides())
    }

    /// Defaults, then `path` (required when given), then `env`.
    pub fn layered(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        Self::build(builder.add_source(env))
    }

    /// `ORDERGUARD_ESCROW__MAX_HOLD_MINUTES=60` sets `escrow.max_hold_minutes`.
    #[must_use]
    pub fn env_overrides() -> Environment {
        Environment::with_prefix(constants::CONFIG_ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder().add_source(Config::try_from(&Self::default())?))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;
        self.budget.validate()?;
        self.quote.validate()?;
        self.escrow.validate()?;
        self.publisher.validate()?;
        self.profile.validate()?;
        self.tiers.validate()
    }
}

// ---------------------------------------------------------------------------
// Risk scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskScoringConfig {
    pub weights: RiskWeights,
    pub thresholds: GradeThresholds,
}

impl RiskScoringConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.thresholds.validate()
    }
}

/// Linear weight of each factor in the raw score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub complexity: f64,
    pub risk_modifier: f64,
    pub market_index: f64,
    pub time_modifier: f64,
    pub district: f64,
    pub faction: f64,
    pub manual: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            complexity: 0.5,
            risk_modifier: 1.5,
            market_index: 0.5,
            time_modifier: 0.5,
            district: 1.0,
            faction: 1.0,
            manual: 1.0,
        }
    }
}

impl RiskWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.complexity,
            self.risk_modifier,
            self.market_index,
            self.time_modifier,
            self.district,
            self.faction,
            self.manual,
        ];
        if all.iter().any(|w| !w.is_finite()) {
            return Err(OrderguardError::Configuration(
                "risk weights must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower bounds of each grade band above `Low`. Scores below `moderate` are `Low`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub moderate: f64,
    pub elevated: f64,
    pub high: f64,
    pub severe: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            moderate: 2.0,
            elevated: 4.0,
            high: 6.0,
            severe: 8.0,
        }
    }
}

impl GradeThresholds {
    /// Band boundaries must be finite, strictly ascending and inside `(0, 10]`.
    pub fn validate(&self) -> Result<()> {
        let bounds = [self.moderate, self.elevated, self.high, self.severe];
        let finite = bounds.iter().all(|b| b.is_finite());
        let ascending = bounds.windows(2).all(|w| w[0] < w[1]);
        let in_range = self.moderate > constants::RISK_SCORE_MIN && self.severe <= constants::RISK_SCORE_MAX;
        if finite && ascending && in_range {
            Ok(())
        } else {
            Err(OrderguardError::Configuration(format!(
                "grade thresholds must ascend within (0, 10]: {bounds:?}"
            )))
        }
    }

    /// Grade for a (clamped) score. Monotonic non-decreasing in `score`.
    #[must_use]
    pub fn grade_for(&self, score: f64) -> RiskGrade {
        if score >= self.severe {
            RiskGrade::Severe
        } else if score >= self.high {
            RiskGrade::High
        } else if score >= self.elevated {
            RiskGrade::Elevated
        } else if score >= self.moderate {
            RiskGrade::Moderate
        } else {
            RiskGrade::Low
        }
    }
}

// ---------------------------------------------------------------------------
// Budget comparison
// ---------------------------------------------------------------------------

/// Deviation thresholds in percent. Negative values are below the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetPolicy {
    pub over_warn_percent: Decimal,
    pub over_error_percent: Decimal,
    pub under_warn_percent: Decimal,
    pub under_error_percent: Decimal,
    /// Absolute recent market movement that raises a spike/drop warning.
    pub market_move_percent: Decimal,
    /// Escrow below `proposed × ratio` raises `ESCROW_TOO_LOW`.
    pub min_escrow_ratio: Decimal,
    /// Commission below this rate raises `COMMISSION_TOO_LOW`.
    pub min_commission_rate: Decimal,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            over_warn_percent: Decimal::new(25, 0),
            over_error_percent: Decimal::new(100, 0),
            under_warn_percent: Decimal::new(-25, 0),
            under_error_percent: Decimal::new(-50, 0),
            market_move_percent: Decimal::new(20, 0),
            min_escrow_ratio: Decimal::new(10, 2),
            min_commission_rate: Decimal::new(5, 2),
        }
    }
}

impl BudgetPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.over_warn_percent <= Decimal::ZERO || self.over_error_percent < self.over_warn_percent {
            return Err(OrderguardError::Configuration(
                "over-budget thresholds must be positive and warn <= error".to_string(),
            ));
        }
        if self.under_warn_percent >= Decimal::ZERO || self.under_error_percent > self.under_warn_percent {
            return Err(OrderguardError::Configuration(
                "under-budget thresholds must be negative and error <= warn".to_string(),
            ));
        }
        if self.market_move_percent <= Decimal::ZERO {
            return Err(OrderguardError::Configuration(
                "market move threshold must be positive".to_string(),
            ));
        }
        if self.min_escrow_ratio.is_sign_negative() || self.min_commission_rate.is_sign_negative() {
            return Err(OrderguardError::Configuration(
                "minimum escrow ratio and commission rate must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Insurance quoting
// ---------------------------------------------------------------------------

/// Premium multiplier per risk grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeMultipliers {
    pub low: Decimal,
    pub moderate: Decimal,
    pub elevated: Decimal,
    pub high: Decimal,
    pub severe: Decimal,
}

impl Default for GradeMultipliers {
    fn default() -> Self {
        Self {
            low: Decimal::ONE,
            moderate: Decimal::new(120, 2),
            elevated: Decimal::new(150, 2),
            high: Decimal::new(200, 2),
            severe: Decimal::new(300, 2),
        }
    }
}

impl GradeMultipliers {
    #[must_use]
    pub fn for_grade(&self, grade: RiskGrade) -> Decimal {
        match grade {
            RiskGrade::Low => self.low,
            RiskGrade::Moderate => self.moderate,
            RiskGrade::Elevated => self.elevated,
            RiskGrade::High => self.high,
            RiskGrade::Severe => self.severe,
        }
    }

    /// Multipliers must be positive and strictly increase with the grade.
    pub fn validate(&self) -> Result<()> {
        let values = RiskGrade::ALL.map(|g| self.for_grade(g));
        let positive = values[0] > Decimal::ZERO;
        let increasing = values.windows(2).all(|w| w[0] < w[1]);
        if positive && increasing {
            Ok(())
        } else {
            Err(OrderguardError::Configuration(
                "grade multipliers must be positive and strictly increasing".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotePolicy {
    pub lifetime_minutes: u32,
    /// Floor applied to every cash premium.
    pub min_premium: Decimal,
    pub grade_multipliers: GradeMultipliers,
    pub corporate_discount: Decimal,
    pub clean_history_discount: Decimal,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            lifetime_minutes: constants::DEFAULT_QUOTE_LIFETIME_MINUTES,
            min_premium: Decimal::new(1, 2),
            grade_multipliers: GradeMultipliers::default(),
            corporate_discount: Decimal::new(10, 2),
            clean_history_discount: Decimal::new(5, 2),
        }
    }
}

impl QuotePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.lifetime_minutes == 0 {
            return Err(OrderguardError::Configuration(
                "quote lifetime must be positive".to_string(),
            ));
        }
        if self.min_premium <= Decimal::ZERO {
            return Err(OrderguardError::Configuration(
                "minimum premium must be positive".to_string(),
            ));
        }
        let discount_ok = |d: Decimal| d >= Decimal::ZERO && d < Decimal::ONE;
        if !discount_ok(self.corporate_discount) || !discount_ok(self.clean_history_discount) {
            return Err(OrderguardError::Configuration(
                "discounts must lie in [0, 1)".to_string(),
            ));
        }
        self.grade_multipliers.validate()
    }
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowPolicy {
    pub min_hold_minutes: u32,
    pub max_hold_minutes: u32,
    /// How long a parked request waits for its acknowledgement.
    pub ack_window_minutes: u32,
    pub sweep_interval_secs: u64,
    /// Terminal locks, their history and outstanding acknowledgements are
    /// dropped by the sweep this long after their last update.
    pub terminal_retention_minutes: u32,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            min_hold_minutes: constants::MIN_HOLD_MINUTES,
            max_hold_minutes: constants::MAX_HOLD_MINUTES,
            ack_window_minutes: constants::DEFAULT_ACK_WINDOW_MINUTES,
            sweep_interval_secs: constants::DEFAULT_SWEEP_INTERVAL_SECS,
            terminal_retention_minutes: constants::DEFAULT_TERMINAL_RETENTION_MINUTES,
        }
    }
}

impl EscrowPolicy {
    #[must_use]
    pub fn clamp_hold(&self, requested_minutes: u32) -> u32 {
        requested_minutes.clamp(self.min_hold_minutes, self.max_hold_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_hold_minutes == 0 || self.min_hold_minutes > self.max_hold_minutes {
            return Err(OrderguardError::Configuration(format!(
                "hold bounds invalid: [{}, {}]",
                self.min_hold_minutes, self.max_hold_minutes
            )));
        }
        if self.ack_window_minutes == 0 || self.sweep_interval_secs == 0 {
            return Err(OrderguardError::Configuration(
                "acknowledgement window and sweep interval must be positive".to_string(),
            ));
        }
        if self.terminal_retention_minutes < self.ack_window_minutes {
            return Err(OrderguardError::Configuration(format!(
                "terminal retention {}m must cover the acknowledgement window {}m",
                self.terminal_retention_minutes, self.ack_window_minutes
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub dedup_cache_size: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_PUBLISH_ATTEMPTS,
            backoff_ms: constants::DEFAULT_PUBLISH_BACKOFF_MS,
            dedup_cache_size: constants::EVENT_DEDUP_CACHE_SIZE,
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.dedup_cache_size == 0 {
            return Err(OrderguardError::Configuration(
                "publisher attempts and dedup cache size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Player risk profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePolicy {
    pub half_life_days: f64,
    /// Added to the score per unresolved incident.
    pub unresolved_penalty: f64,
    pub max_unresolved_penalty: f64,
}

impl Default for ProfilePolicy {
    fn default() -> Self {
        Self {
            half_life_days: constants::DEFAULT_INCIDENT_HALF_LIFE_DAYS,
            unresolved_penalty: 0.5,
            max_unresolved_penalty: 2.0,
        }
    }
}

impl ProfilePolicy {
    pub fn validate(&self) -> Result<()> {
        let ok = self.half_life_days.is_finite()
            && self.half_life_days > 0.0
            && self.unresolved_penalty.is_finite()
            && self.unresolved_penalty >= 0.0
            && self.max_unresolved_penalty.is_finite()
            && self.max_unresolved_penalty >= 0.0;
        if ok {
            Ok(())
        } else {
            Err(OrderguardError::Configuration(
                "profile half-life must be positive and penalties non-negative".to_string(),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Tier catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierCatalogConfig(pub Vec<InsuranceTierDefinition>);

impl Default for TierCatalogConfig {
    fn default() -> Self {
        Self(InsuranceTierDefinition::default_catalog())
    }
}

impl TierCatalogConfig {
    /// Non-empty, every tier valid, no tier listed twice.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(OrderguardError::Configuration(
                "tier catalog must not be empty".to_string(),
            ));
        }
        for (i, def) in self.0.iter().enumerate() {
            def.validate()?;
            if self.0[..i].iter().any(|other| other.id == def.id) {
                return Err(OrderguardError::Configuration(format!(
                    "tier {} defined twice",
                    def.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn grade_bands() {
        let t = GradeThresholds::default();
        assert_eq!(t.grade_for(0.0), RiskGrade::Low);
        assert_eq!(t.grade_for(1.99), RiskGrade::Low);
        assert_eq!(t.grade_for(2.0), RiskGrade::Moderate);
        assert_eq!(t.grade_for(5.0), RiskGrade::Elevated);
        assert_eq!(t.grade_for(6.5), RiskGrade::High);
        assert_eq!(t.grade_for(9.0), RiskGrade::Severe);
        assert_eq!(t.grade_for(10.0), RiskGrade::Severe);
    }

    #[test]
    fn non_ascending_thresholds_rejected() {
        let t = GradeThresholds {
            moderate: 2.0,
            elevated: 6.0,
            high: 4.0,
            severe: 8.0,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn flat_multipliers_rejected() {
        let m = GradeMultipliers {
            high: Decimal::new(150, 2),
            ..GradeMultipliers::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn hold_is_clamped() {
        let p = EscrowPolicy::default();
        assert_eq!(p.clamp_hold(0), 5);
        assert_eq!(p.clamp_hold(10), 10);
        assert_eq!(p.clamp_hold(10_000), 1440);
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let json = r#"{ "escrow": { "max_hold_minutes": 60 }, "quote": { "lifetime_minutes": 5 } }"#;
        let cfg = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.escrow.max_hold_minutes, 60);
        assert_eq!(cfg.escrow.min_hold_minutes, 5);
        assert_eq!(cfg.quote.lifetime_minutes, 5);
        assert_eq!(cfg.tiers.0.len(), 4);
    }

    #[test]
    fn invalid_json_config_rejected() {
        let json = r#"{ "escrow": { "min_hold_minutes": 100, "max_hold_minutes": 10 } }"#;
        assert!(matches!(
            EngineConfig::from_json_str(json),
            Err(OrderguardError::Configuration(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(OrderguardError::Configuration(_))
        ));
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        EngineConfig::env_overrides().source(Some(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ))
    }

    #[test]
    fn env_overrides_individual_fields() {
        let cfg = EngineConfig::layered(
            None,
            env(&[
                ("ORDERGUARD_ESCROW__MAX_HOLD_MINUTES", "60"),
                ("ORDERGUARD_BUDGET__OVER_ERROR_PERCENT", "150"),
                ("ORDERGUARD_PROFILE__HALF_LIFE_DAYS", "7.5"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.escrow.max_hold_minutes, 60);
        assert_eq!(cfg.escrow.min_hold_minutes, 5);
        assert_eq!(cfg.budget.over_error_percent, Decimal::new(150, 0));
        assert!((cfg.profile.half_life_days - 7.5).abs() < f64::EPSILON);
        assert_eq!(cfg.tiers.0.len(), 4);
    }

    #[test]
    fn env_wins_over_file() {
        let dir = std::env::temp_dir().join(format!("orderguard-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");
        std::fs::write(&path, "[escrow]\nmax_hold_minutes = 120\nack_window_minutes = 10\n").unwrap();

        let cfg = EngineConfig::layered(
            Some(&path),
            env(&[("ORDERGUARD_ESCROW__MAX_HOLD_MINUTES", "90")]),
        )
        .unwrap();
        assert_eq!(cfg.escrow.max_hold_minutes, 90);
        assert_eq!(cfg.escrow.ack_window_minutes, 10);

        let from_file = EngineConfig::load(&path).unwrap();
        assert_eq!(from_file.escrow.max_hold_minutes, 120);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn invalid_env_override_rejected() {
        let err = EngineConfig::layered(
            None,
            env(&[("ORDERGUARD_ESCROW__MIN_HOLD_MINUTES", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, OrderguardError::Configuration(_)));
        assert!(EngineConfig::layered(None, env(&[("ORDERGUARD_ESCROW__MAX_HOLD_MINUTES", "soon")])).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(EngineConfig::load("/nonexistent/orderguard.json").is_err());
    }

    #[test]
    fn retention_must_cover_ack_window() {
        let p = EscrowPolicy {
            terminal_retention_minutes: 10,
            ..EscrowPolicy::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn duplicate_tier_rejected() {
        let mut tiers = InsuranceTierDefinition::default_catalog();
        tiers.push(tiers[0].clone());
        assert!(TierCatalogConfig(tiers).validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(back.budget.over_error_percent, cfg.budget.over_error_percent);
        assert_eq!(back.tiers.0, cfg.tiers.0);
    }
}
