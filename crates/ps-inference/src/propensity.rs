//! Logistic exposure model and fitted propensity scores.
//!
//! Fits `P(exposure = 1 | confounders)` by Fisher scoring (Newton steps on
//! the Bernoulli log-likelihood; observed and expected information coincide
//! under the canonical logit link) and annotates every record with its
//! fitted probability.

use nalgebra::{DMatrix, DVector};

use ps_core::{Error, GlmFit, Result};

use crate::design::{build_design, exposure_model_terms, Term};
use crate::math::{log1pexp, sigmoid};
use crate::simulate::Record;

/// Configuration for the exposure-model fit.
#[derive(Debug, Clone)]
pub struct PropensityConfig {
    /// Design terms for the exposure model.
    pub terms: Vec<Term>,
    /// Maximum number of scoring iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the largest absolute Newton step.
    pub tol: f64,
}

impl Default for PropensityConfig {
    fn default() -> Self {
        Self { terms: exposure_model_terms(), max_iter: 25, tol: 1e-8 }
    }
}

/// Fit the logistic exposure model and annotate each record with its
/// fitted probability of exposure.
///
/// Guarantees on success:
/// - every `propensity_score` lies strictly in `(0, 1)`;
/// - coefficients are deterministic given identical input data.
///
/// Failure modes:
/// - [`Error::Input`] for non-finite covariates or an exposure value
///   outside `{0, 1}`;
/// - [`Error::Convergence`] when scoring does not converge within
///   `max_iter`, the information matrix is singular (separation), or a
///   fitted probability collapses to the floating-point boundary.
pub fn fit_propensity(records: &mut [Record], config: &PropensityConfig) -> Result<GlmFit> {
    let x = build_design(records, &config.terms)?;
    for r in records.iter() {
        if r.exposure > 1 {
            return Err(Error::Input(format!(
                "record {} has exposure {}, expected 0 or 1",
                r.id, r.exposure
            )));
        }
    }
    let y: Vec<f64> = records.iter().map(|r| r.exposure as f64).collect();
    let names: Vec<String> = config.terms.iter().map(|t| t.label()).collect();

    let fit = logistic_fit(&x, &y, names, config)?;

    // Annotate scores, refusing boundary probabilities: a score of exactly
    // 0 or 1 would make downstream inverse weights unbounded and signals a
    // (quasi-)separated fit rather than a usable model.
    let mut scores = Vec::with_capacity(records.len());
    for row in &x {
        let eta: f64 = row.iter().zip(&fit.coefficients).map(|(&v, &b)| v * b).sum();
        let p = sigmoid(eta);
        if p <= 0.0 || p >= 1.0 {
            return Err(Error::Convergence(format!(
                "fitted exposure probability reached the boundary (eta = {eta:.3})"
            )));
        }
        scores.push(p);
    }
    for (r, p) in records.iter_mut().zip(scores) {
        r.propensity_score = Some(p);
    }
    Ok(fit)
}

/// Fisher scoring for logistic regression on a prebuilt design.
fn logistic_fit(
    x: &[Vec<f64>],
    y: &[f64],
    names: Vec<String>,
    config: &PropensityConfig,
) -> Result<GlmFit> {
    let n = x.len();
    let p = x[0].len();
    let mut beta = vec![0.0_f64; p];

    for iter in 1..=config.max_iter {
        // Score g = X'(y - mu) and information H = X' diag(mu(1-mu)) X.
        let mut g = vec![0.0_f64; p];
        let mut h = vec![0.0_f64; p * p];
        for i in 0..n {
            let row = &x[i];
            let eta: f64 = row.iter().zip(&beta).map(|(&v, &b)| v * b).sum();
            let mu = sigmoid(eta);
            let w = mu * (1.0 - mu);
            let resid = y[i] - mu;
            for a in 0..p {
                g[a] += resid * row[a];
                for b in 0..p {
                    h[a * p + b] += w * row[a] * row[b];
                }
            }
        }

        let h_mat = DMatrix::from_row_slice(p, p, &h);
        let g_vec = DVector::from_vec(g);
        let step = h_mat.clone().lu().solve(&g_vec).ok_or_else(|| {
            Error::Convergence(
                "singular information matrix (perfect separation or collinear design)".into(),
            )
        })?;

        for (b, s) in beta.iter_mut().zip(step.iter()) {
            *b += s;
        }
        if step.iter().any(|s| !s.is_finite()) {
            return Err(Error::Convergence("diverging Newton step".into()));
        }

        if step.amax() < config.tol {
            let cov = h_mat.try_inverse().ok_or_else(|| {
                Error::Computation("information matrix not invertible at the optimum".into())
            })?;
            let se: Vec<f64> = (0..p).map(|j| cov[(j, j)].max(0.0).sqrt()).collect();
            let covariance: Vec<f64> =
                (0..p).flat_map(|a| (0..p).map(move |b| (a, b))).map(|(a, b)| cov[(a, b)]).collect();

            let mut nll = 0.0;
            for i in 0..n {
                let eta: f64 = x[i].iter().zip(&beta).map(|(&v, &b)| v * b).sum();
                nll += log1pexp(eta) - y[i] * eta;
            }

            return Ok(GlmFit {
                names,
                coefficients: beta,
                se,
                covariance,
                nll,
                converged: true,
                n_iter: iter,
            });
        }
    }

    Err(Error::Convergence(format!(
        "exposure model did not converge in {} iterations",
        config.max_iter
    )))
}
