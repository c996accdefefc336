//! Shared result types for fitted models and effect contrasts.

use serde::{Deserialize, Serialize};

/// Summary of a fitted generalized linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmFit {
    /// Design-column labels, same order as `coefficients`.
    pub names: Vec<String>,

    /// Coefficient estimates.
    pub coefficients: Vec<f64>,

    /// Standard errors (square root of the covariance diagonal).
    pub se: Vec<f64>,

    /// Covariance matrix of the coefficients (row-major, p×p).
    pub covariance: Vec<f64>,

    /// Negative log-likelihood at the optimum.
    pub nll: f64,

    /// Whether fitting converged within the iteration budget.
    pub converged: bool,

    /// Number of scoring iterations used.
    pub n_iter: usize,
}

impl GlmFit {
    /// Look up a coefficient by design-column label.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.coefficients[i])
    }

    /// z-statistics (coefficient / standard error), `NaN` where the
    /// standard error is not positive.
    pub fn z_values(&self) -> Vec<f64> {
        self.coefficients
            .iter()
            .zip(&self.se)
            .map(|(&b, &s)| if s > 0.0 { b / s } else { f64::NAN })
            .collect()
    }
}

/// A point estimate with a robust standard error and a normal-approximation
/// confidence interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// Point estimate.
    pub estimate: f64,

    /// Standard error.
    pub std_error: f64,

    /// z-statistic (estimate / std_error), `NaN` when the standard error
    /// is not positive.
    pub statistic: f64,

    /// Lower confidence bound.
    pub conf_low: f64,

    /// Upper confidence bound.
    pub conf_high: f64,
}

impl EffectEstimate {
    /// Build an estimate from a point value, its standard error, and the
    /// two-sided normal critical value for the requested confidence level.
    pub fn from_point(estimate: f64, std_error: f64, z_crit: f64) -> Self {
        let statistic = if std_error > 0.0 { estimate / std_error } else { f64::NAN };
        Self {
            estimate,
            std_error,
            statistic,
            conf_low: estimate - z_crit * std_error,
            conf_high: estimate + z_crit * std_error,
        }
    }
}
