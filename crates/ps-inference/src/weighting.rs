//! Inverse-probability weighting for the average treatment effect.
//!
//! Exposed records receive `1 / e`, unexposed records `1 / (1 - e)`, where
//! `e` is the fitted propensity score. Under a well-specified exposure
//! model both reweighted arms then stand in for the full population, so
//! their weight totals are each approximately `n`.

use serde::Serialize;

use ps_core::{Error, Result};

use crate::simulate::Record;

/// Summary of an inverse-probability weighting pass.
#[derive(Debug, Clone, Serialize)]
pub struct WeightingSummary {
    /// Number of exposed records.
    pub n_exposed: usize,
    /// Number of unexposed records.
    pub n_unexposed: usize,
    /// Sum of weights over the exposed arm.
    pub weight_sum_exposed: f64,
    /// Sum of weights over the unexposed arm.
    pub weight_sum_unexposed: f64,
    /// Largest single weight.
    pub max_weight: f64,
    /// Kish effective sample size, `(Σw)² / Σw²`.
    pub effective_sample_size: f64,
}

/// Assign ATE weights from the fitted propensity scores.
///
/// The whole population is validated before any record is annotated: a
/// missing score is [`Error::Input`], and a score of exactly 0 or 1 is
/// [`Error::InfiniteWeight`] (the corresponding weight would be unbounded).
pub fn assign_ipw_weights(records: &mut [Record]) -> Result<WeightingSummary> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }

    let mut weights = Vec::with_capacity(records.len());
    for r in records.iter() {
        let e = r.propensity_score.ok_or_else(|| {
            Error::Input(format!(
                "record {} has no propensity score; fit the exposure model first",
                r.id
            ))
        })?;
        if e <= 0.0 || e >= 1.0 {
            return Err(Error::InfiniteWeight(format!(
                "record {} has propensity score {e}; weights require scores strictly in (0, 1)",
                r.id
            )));
        }
        weights.push(if r.exposure == 1 { 1.0 / e } else { 1.0 / (1.0 - e) });
    }

    let mut summary = WeightingSummary {
        n_exposed: 0,
        n_unexposed: 0,
        weight_sum_exposed: 0.0,
        weight_sum_unexposed: 0.0,
        max_weight: 0.0,
        effective_sample_size: 0.0,
    };
    let mut sum_w = 0.0;
    let mut sum_w2 = 0.0;
    for (r, &w) in records.iter().zip(&weights) {
        if r.exposure == 1 {
            summary.n_exposed += 1;
            summary.weight_sum_exposed += w;
        } else {
            summary.n_unexposed += 1;
            summary.weight_sum_unexposed += w;
        }
        summary.max_weight = summary.max_weight.max(w);
        sum_w += w;
        sum_w2 += w * w;
    }
    summary.effective_sample_size = sum_w * sum_w / sum_w2;

    for (r, w) in records.iter_mut().zip(weights) {
        r.weight = Some(w);
    }
    Ok(summary)
}
