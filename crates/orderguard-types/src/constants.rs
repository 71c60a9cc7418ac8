//! System-wide constants for the OrderGuard settlement engine.

/// Lower bound of the risk score range.
pub const RISK_SCORE_MIN: f64 = 0.0;

/// Upper bound of the risk score range.
pub const RISK_SCORE_MAX: f64 = 10.0;

/// Expected upper bound of the complexity factor (values above raise an alert).
pub const COMPLEXITY_MAX: f64 = 10.0;

/// Expected upper bound of the multiplicative modifiers (risk, market, time).
pub const MODIFIER_MAX: f64 = 5.0;

/// Shortest escrow hold, in minutes.
pub const MIN_HOLD_MINUTES: u32 = 5;

/// Longest escrow hold, in minutes (24 hours).
pub const MAX_HOLD_MINUTES: u32 = 1440;

/// How long a parked (acknowledgement-pending) lock request stays reserved.
pub const DEFAULT_ACK_WINDOW_MINUTES: u32 = 30;

/// Default interval between expiry sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// How long an insurance quote may be redeemed after issue.
pub const DEFAULT_QUOTE_LIFETIME_MINUTES: u32 = 15;

/// Allowed commission rate range for insurance tiers, in basis points.
pub const COMMISSION_RATE_MIN_BPS: i64 = 500;
pub const COMMISSION_RATE_MAX_BPS: i64 = 1200;

/// Allowed escrow multiplier range for insurance tiers, in basis points.
pub const ESCROW_MULTIPLIER_MIN_BPS: i64 = 1000;
pub const ESCROW_MULTIPLIER_MAX_BPS: i64 = 3000;

/// Default delivery attempts per settlement event before deferring to the sweeper.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

/// Default pause between delivery attempts, in milliseconds.
pub const DEFAULT_PUBLISH_BACKOFF_MS: u64 = 25;

/// Consumer-side de-duplication cache size (number of event ids to remember).
pub const EVENT_DEDUP_CACHE_SIZE: usize = 100_000;

/// Half-life of an incident's weight in the rolling risk profile, in days.
pub const DEFAULT_INCIDENT_HALF_LIFE_DAYS: f64 = 30.0;

/// How long a terminal lock (and a redeemed quote) is kept before the sweeper drops it.
pub const DEFAULT_TERMINAL_RETENTION_MINUTES: u32 = 1440;

/// Environment variable naming a configuration file (JSON or TOML).
pub const CONFIG_ENV_VAR: &str = "ORDERGUARD_CONFIG";

/// Prefix of per-field environment overrides, e.g. `ORDERGUARD_ESCROW__MAX_HOLD_MINUTES=60`.
pub const CONFIG_ENV_PREFIX: &str = "ORDERGUARD";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OrderGuard";
