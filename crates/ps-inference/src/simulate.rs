//! Synthetic observational population generator.
//!
//! Generates a fixed-size population of units with two confounders (`w1`,
//! `w2`), two noise covariates (`w3`, `w4`), a binary exposure whose
//! probability depends on the confounders, and a continuous outcome whose
//! mean depends on the confounders and the exposure. Generation is fully
//! deterministic given a seed, and the RNG is an explicit handle threaded
//! through every draw — no process-wide random state.

use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use ps_core::{Error, Result};

use crate::math::sigmoid;

/// One simulated unit.
///
/// Records are created once per run and enriched in place as the pipeline
/// advances: `propensity_score` after the exposure-model fit, `stratum`
/// during stratification or matching, `weight` during weighting or
/// matching. No record is deleted or duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, assigned sequentially from 0.
    pub id: u64,
    /// Continuous confounder, `Uniform(0.02, 0.70)`.
    pub w1: f64,
    /// Continuous confounder, `Normal(0.2 + 0.125·w1, 1)`.
    pub w2: f64,
    /// Continuous noise covariate, `Normal(-2, 0.7)`.
    pub w3: f64,
    /// Binary noise covariate, `Bernoulli(0.4)`.
    pub w4: u8,
    /// Exposure indicator (1 = exposed).
    pub exposure: u8,
    /// Continuous outcome.
    pub outcome: f64,
    /// Fitted probability of exposure given confounders; absent until the
    /// exposure model is fitted.
    pub propensity_score: Option<f64>,
    /// Propensity stratum (or matched-set label); absent until adjustment.
    pub stratum: Option<usize>,
    /// Adjustment weight; absent until weighting or matching.
    pub weight: Option<f64>,
}

/// Configuration for the population generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Population size.
    pub n: usize,
    /// Random seed.
    pub seed: u64,
    /// Additive effect of exposure on the outcome mean.
    pub exposure_effect: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { n: 2000, seed: 42, exposure_effect: 2.0 }
    }
}

/// Standard normal draw via Box-Muller from two uniform variates.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    let u1 = u1.clamp(1e-12, 1.0 - 1e-12);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Generate a population from a fresh RNG seeded with `config.seed`.
///
/// Identical configuration always yields an identical population.
pub fn simulate_population(config: &SimulationConfig) -> Result<Vec<Record>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    simulate_population_with(config, &mut rng)
}

/// Generate a population from an explicitly passed RNG handle.
///
/// The data-generating process, per unit:
///
/// ```text
/// w1 ~ Uniform(0.02, 0.70)
/// w2 ~ Normal(0.2 + 0.125·w1, 1)
/// w3 ~ Normal(-2, 0.7)          w4 ~ Bernoulli(0.4)
/// xlogit  = -0.5 + w1 + 0.1·w1² - 0.5·w2 + 0.5·w1·w2
/// exposure ~ Bernoulli(sigmoid(xlogit))
/// outcome ~ Normal(-0.5 + 3·w1 + 3·w1² - 2·w2 + effect·exposure, 1)
/// ```
///
/// `w3` and `w4` influence neither exposure nor outcome; they exist so the
/// balance diagnostics have known-null covariates to report on.
pub fn simulate_population_with<R: Rng>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<Vec<Record>> {
    if config.n == 0 {
        return Err(Error::Input("population size must be > 0".into()));
    }
    if !config.exposure_effect.is_finite() {
        return Err(Error::Input("exposure_effect must be finite".into()));
    }

    let mut records = Vec::with_capacity(config.n);
    for id in 0..config.n as u64 {
        let w1 = 0.02 + (0.70 - 0.02) * rng.random::<f64>();
        let w2 = 0.2 + 0.125 * w1 + standard_normal(rng);
        let w3 = -2.0 + 0.7 * standard_normal(rng);
        let u4: f64 = rng.random();
        let w4: u8 = if u4 < 0.4 { 1 } else { 0 };

        let xlogit = -0.5 + w1 + 0.1 * w1 * w1 - 0.5 * w2 + 0.5 * w1 * w2;
        let ua: f64 = rng.random();
        let exposure: u8 = if ua < sigmoid(xlogit) { 1 } else { 0 };

        let mean = -0.5 + 3.0 * w1 + 3.0 * w1 * w1 - 2.0 * w2
            + config.exposure_effect * exposure as f64;
        let outcome = mean + standard_normal(rng);

        records.push(Record {
            id,
            w1,
            w2,
            w3,
            w4,
            exposure,
            outcome,
            propensity_score: None,
            stratum: None,
            weight: None,
        });
    }
    Ok(records)
}
