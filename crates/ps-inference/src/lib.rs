//! # ps-inference
//!
//! Propensity-score causal effect estimation on simulated observational
//! data.
//!
//! The crate is a linear batch pipeline; each stage consumes the previous
//! stage's output and enriches the record collection in place:
//!
//! 1. [`simulate`] — seeded generation of a population with confounding.
//! 2. [`propensity`] — logistic exposure model, fitted scores per record.
//! 3. Adjustment: [`strata`] (quantile bins), [`matching`] (full matching),
//!    or [`weighting`] (inverse-probability ATE weights), with covariate
//!    [`balance`] diagnostics.
//! 4. [`effect`] — outcome regression and the average marginal effect of
//!    exposure with sandwich (HC3 / cluster-robust) variance.
//!
//! [`pipeline`] ties the stages into end-to-end workflows.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Covariate balance diagnostics (standardized mean differences).
pub mod balance;
/// Explicit design-matrix construction from term lists.
pub mod design;
/// Outcome regression and effect contrasts with robust variance.
pub mod effect;
/// Full matching on the propensity score.
pub mod matching;
/// Numerically stable scalar helpers.
pub mod math;
/// End-to-end analysis workflows.
pub mod pipeline;
/// Logistic exposure model and fitted propensity scores.
pub mod propensity;
/// Synthetic observational population generator.
pub mod simulate;
/// Quantile stratification on the propensity score.
pub mod strata;
/// Inverse-probability weighting for the average treatment effect.
pub mod weighting;

pub use balance::{BalanceEntry, BalanceReport, covariate_balance, DEFAULT_BALANCE_THRESHOLD};
pub use design::{build_design, exposure_model_terms, Covariate, Term};
pub use effect::{estimate_effect, EffectConfig, EffectResult, VarianceEstimator};
pub use matching::{full_match, MatchedSet, Matching, MatchingConfig};
pub use pipeline::{
    analyze_population, run_analysis, AdjustmentStrategy, AnalysisConfig, AnalysisReport,
};
pub use propensity::{fit_propensity, PropensityConfig};
pub use simulate::{simulate_population, simulate_population_with, Record, SimulationConfig};
pub use strata::{assign_strata, Stratification, StratumSummary, DEFAULT_STRATA};
pub use weighting::{assign_ipw_weights, WeightingSummary};
