//! # orderguard-assess
//!
//! **Assessment Plane**: everything that is decided about an order before
//! funds move.
//!
//! ## Architecture
//!
//! 1. **RiskScorer**: context factors to a clamped score and grade (pure)
//! 2. **BudgetComparator**: proposed budget vs. market baseline, warnings and
//!    the acknowledgement gate (pure over a baseline snapshot)
//! 3. **InsuranceRateTable**: read-only tier catalog with controlled reload
//! 4. **InsuranceQuoter**: score + tier to a priced, time-limited quote
//! 5. **RiskProfileAggregator**: per-player rolling score from incidents
//!
//! ## Flow
//!
//! ```text
//! RiskContext → RiskScorer.evaluate() → InsuranceQuoter.quote() → InsuranceQuote
//! proposed budget → BudgetComparator.compare() → warnings (+ AckToken)
//! incident feed → RiskProfileAggregator.ingest() → PlayerRiskProfile
//! ```

pub mod budget;
pub mod profile;
pub mod quoter;
pub mod rate_table;
pub mod scorer;

pub use budget::{BudgetComparator, MarketBaselineSource, StaticBaselineSource};
pub use profile::RiskProfileAggregator;
pub use quoter::InsuranceQuoter;
pub use rate_table::InsuranceRateTable;
pub use scorer::RiskScorer;
