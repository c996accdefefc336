//! Outcome regression and effect contrasts with robust variance.
//!
//! Fits a (weighted) linear outcome model on the adjusted population and
//! reports the average marginal effect of exposure by g-computation: every
//! record is predicted under exposure 1 and exposure 0, and the weighted
//! mean contrast is the ATE. Per-arm averages of the same predictions give
//! the expected outcome under each exposure level.
//!
//! The outcome design follows the adjustment structure:
//! - stratified records (no weights): stratum indicators, exposure×stratum
//!   interactions, and shared confounder-adjustment terms — the contrast is
//!   then the stratum-size-weighted average of within-stratum effects;
//! - weighted records (IPW or matching): intercept + exposure + adjustment
//!   terms, fitted by weighted least squares.
//!
//! Variance is a sandwich estimator: cluster-robust over `stratum`
//! (Liang-Zeger, with a small-sample correction) whenever strata or matched
//! sets are present, HC3 otherwise. Contrast standard errors follow by the
//! delta method, since every reported quantity is linear in the
//! coefficients.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use ps_core::{EffectEstimate, Error, Result};

use crate::design::{Covariate, Term};
use crate::simulate::Record;

/// Variance estimator used for the effect contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarianceEstimator {
    /// Heteroskedasticity-consistent HC3 sandwich.
    Hc3,
    /// Cluster-robust sandwich over the `stratum` annotation.
    ClusterRobust,
}

/// Configuration for effect estimation.
#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// Two-sided confidence level for intervals.
    pub conf_level: f64,
    /// Confounder-adjustment terms appended to the outcome design. These
    /// must not involve the exposure indicator's main column (the
    /// estimator adds exposure columns itself).
    pub adjustment: Vec<Term>,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            conf_level: 0.95,
            adjustment: vec![
                Term::Main(Covariate::W1),
                Term::Quadratic(Covariate::W1),
                Term::Main(Covariate::W2),
            ],
        }
    }
}

/// Result of effect estimation.
#[derive(Debug, Clone, Serialize)]
pub struct EffectResult {
    /// Average marginal effect of exposure on the outcome.
    pub ate: EffectEstimate,
    /// Average predicted outcome under exposure.
    pub mean_exposed: EffectEstimate,
    /// Average predicted outcome under no exposure.
    pub mean_unexposed: EffectEstimate,
    /// Variance estimator that produced the standard errors.
    pub variance: VarianceEstimator,
    /// Number of records used.
    pub n_obs: usize,
    /// Number of clusters, when the cluster-robust estimator was used.
    pub n_clusters: Option<usize>,
}

/// Estimate the average treatment effect on the adjusted population.
///
/// Identical inputs and identical adjustment structure always produce the
/// same point estimates. Fails with [`Error::Input`] on malformed data or
/// partial annotation, [`Error::DegenerateStratum`] when a stratum holds a
/// single exposure arm, and [`Error::Computation`] on a singular design.
pub fn estimate_effect(records: &[Record], config: &EffectConfig) -> Result<EffectResult> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }
    if !(config.conf_level > 0.0 && config.conf_level < 1.0) {
        return Err(Error::Input(format!(
            "conf_level must be in (0, 1), got {}",
            config.conf_level
        )));
    }
    for t in &config.adjustment {
        if matches!(t, Term::Exposure) {
            return Err(Error::Input(
                "adjustment terms must not repeat the exposure column".into(),
            ));
        }
    }
    for r in records {
        if !r.outcome.is_finite() {
            return Err(Error::Input(format!("record {} has non-finite outcome", r.id)));
        }
        if r.exposure > 1 {
            return Err(Error::Input(format!(
                "record {} has exposure {}, expected 0 or 1",
                r.id, r.exposure
            )));
        }
    }
    let n = records.len();
    let n_exposed = records.iter().filter(|r| r.exposure == 1).count();
    if n_exposed == 0 || n_exposed == n {
        return Err(Error::Input("population contains a single exposure arm".into()));
    }

    // Adjustment structure: all-or-nothing annotations.
    let n_weighted = records.iter().filter(|r| r.weight.is_some()).count();
    if n_weighted > 0 && n_weighted < n {
        return Err(Error::Input("weights assigned to only part of the population".into()));
    }
    let n_stratified = records.iter().filter(|r| r.stratum.is_some()).count();
    if n_stratified > 0 && n_stratified < n {
        return Err(Error::Input("strata assigned to only part of the population".into()));
    }
    let weighted = n_weighted == n;
    let stratified = n_stratified == n;

    let weights: Vec<f64> = if weighted {
        let w: Vec<f64> = records.iter().map(|r| r.weight.unwrap_or(0.0)).collect();
        if w.iter().any(|&wi| !wi.is_finite() || wi < 0.0) {
            return Err(Error::Input("weights must be finite and non-negative".into()));
        }
        if w.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Input("weights must not all be zero".into()));
        }
        w
    } else {
        vec![1.0; n]
    };

    // Cluster labels (dense, 0-based) when strata/matched sets are present.
    let clusters: Option<Vec<usize>> = if stratified {
        let labels: Vec<usize> = records.iter().map(|r| r.stratum.unwrap_or(0)).collect();
        Some(labels)
    } else {
        None
    };

    // Interact exposure with stratum only on the pure stratification path;
    // matched sets are numerous and small, so they enter through the
    // weights and the cluster variance instead.
    let interacted = stratified && !weighted;

    let design = build_effect_design(records, config, interacted, clusters.as_deref())?;
    let p = design.n_cols;

    // Weighted least squares: (X'WX) beta = X'Wy.
    let mut xtwx = vec![0.0_f64; p * p];
    let mut xtwy = vec![0.0_f64; p];
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        let row = design.row(i);
        let y = records[i].outcome;
        for a in 0..p {
            xtwy[a] += w * row[a] * y;
            for b in 0..p {
                xtwx[a * p + b] += w * row[a] * row[b];
            }
        }
    }
    let xtwx = DMatrix::from_row_slice(p, p, &xtwx);
    let xtwy = DVector::from_vec(xtwy);
    let beta = xtwx
        .clone()
        .lu()
        .solve(&xtwy)
        .ok_or_else(|| Error::Computation("singular outcome design (X'WX)".into()))?;
    let bread = xtwx
        .try_inverse()
        .ok_or_else(|| Error::Computation("outcome design not invertible".into()))?;

    // Residuals.
    let resid: Vec<f64> = (0..n)
        .map(|i| {
            let row = design.row(i);
            let fitted: f64 = row.iter().zip(beta.iter()).map(|(&x, &b)| x * b).sum();
            records[i].outcome - fitted
        })
        .collect();

    // Sandwich covariance of beta.
    let (cov, variance, n_clusters) = match &clusters {
        Some(labels) => {
            let n_clusters = labels.iter().max().unwrap_or(&0) + 1;
            let cov =
                cluster_robust_covariance(&design, &weights, &resid, &bread, labels, n_clusters);
            (cov, VarianceEstimator::ClusterRobust, Some(n_clusters))
        }
        None => {
            let cov = hc3_covariance(&design, &weights, &resid, &bread);
            (cov, VarianceEstimator::Hc3, None)
        }
    };

    // g-computation contrast rows, averaged with the analysis weights.
    let wsum: f64 = weights.iter().sum();
    let mut c1 = vec![0.0_f64; p];
    let mut c0 = vec![0.0_f64; p];
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        let r1 = design.counterfactual_row(i, 1.0);
        let r0 = design.counterfactual_row(i, 0.0);
        for a in 0..p {
            c1[a] += w * r1[a];
            c0[a] += w * r0[a];
        }
    }
    for a in 0..p {
        c1[a] /= wsum;
        c0[a] /= wsum;
    }
    let c_ate: Vec<f64> = c1.iter().zip(&c0).map(|(&a, &b)| a - b).collect();

    let alpha = 1.0 - config.conf_level;
    let z_crit = standard_normal().inverse_cdf(1.0 - alpha / 2.0);

    let contrast = |c: &[f64]| -> EffectEstimate {
        let est: f64 = c.iter().zip(beta.iter()).map(|(&ci, &bi)| ci * bi).sum();
        let var: f64 = (0..p)
            .map(|a| (0..p).map(|b| c[a] * cov[(a, b)] * c[b]).sum::<f64>())
            .sum();
        EffectEstimate::from_point(est, var.max(0.0).sqrt(), z_crit)
    };

    Ok(EffectResult {
        ate: contrast(&c_ate),
        mean_exposed: contrast(&c1),
        mean_unexposed: contrast(&c0),
        variance,
        n_obs: n,
        n_clusters,
    })
}

#[inline]
fn standard_normal() -> Normal {
    // Safe by construction for mean 0, sigma 1.
    Normal::new(0.0, 1.0).expect("standard normal is constructible")
}

/// Outcome design with enough structure to rebuild rows under a
/// counterfactual exposure value.
struct EffectDesign {
    n_cols: usize,
    /// Row-major design values at the observed exposure.
    rows: Vec<f64>,
    /// Exposure-dependent columns: (column index, per-record column value
    /// when exposure = 1). A counterfactual row scales these by the
    /// overridden exposure; every other column is exposure-invariant.
    exposure_cols: Vec<(usize, Vec<f64>)>,
}

impl EffectDesign {
    fn row(&self, i: usize) -> &[f64] {
        &self.rows[i * self.n_cols..(i + 1) * self.n_cols]
    }

    /// Row `i` with the exposure indicator overridden.
    fn counterfactual_row(&self, i: usize, exposure: f64) -> Vec<f64> {
        let mut row = self.row(i).to_vec();
        for (col, units) in &self.exposure_cols {
            row[*col] = exposure * units[i];
        }
        row
    }
}

/// Build the outcome design.
fn build_effect_design(
    records: &[Record],
    config: &EffectConfig,
    interacted: bool,
    clusters: Option<&[usize]>,
) -> Result<EffectDesign> {
    let n = records.len();

    if interacted {
        let labels = clusters.expect("interacted design requires cluster labels");
        let k = labels.iter().max().unwrap_or(&0) + 1;

        // Every stratum needs both arms for its interaction column to be
        // identifiable.
        let mut n_in = vec![0usize; k];
        let mut n_exp = vec![0usize; k];
        for (r, &s) in records.iter().zip(labels) {
            n_in[s] += 1;
            if r.exposure == 1 {
                n_exp[s] += 1;
            }
        }
        for s in 0..k {
            if n_in[s] == 0 {
                return Err(Error::DegenerateStratum(format!("stratum {s} is empty")));
            }
            if n_exp[s] == 0 || n_exp[s] == n_in[s] {
                return Err(Error::DegenerateStratum(format!(
                    "stratum {s} has {} exposed of {} records",
                    n_exp[s], n_in[s]
                )));
            }
        }

        // Columns: [stratum dummies | exposure×stratum | adjustment terms].
        let p = 2 * k + config.adjustment.len();
        let mut rows = vec![0.0_f64; n * p];
        // Exposure×stratum column for stratum s equals the stratum
        // indicator when exposed, so its unit value is that indicator.
        let mut units: Vec<Vec<f64>> = vec![vec![0.0; n]; k];
        for i in 0..n {
            let s = labels[i];
            let a = records[i].exposure as f64;
            rows[i * p + s] = 1.0;
            rows[i * p + k + s] = a;
            units[s][i] = 1.0;
            for (j, t) in config.adjustment.iter().enumerate() {
                let v = t.value(&records[i]);
                if !v.is_finite() {
                    return Err(Error::Input(format!(
                        "record {} has non-finite value for design column '{}'",
                        records[i].id,
                        t.label()
                    )));
                }
                rows[i * p + 2 * k + j] = v;
            }
        }
        let mut exposure_cols: Vec<(usize, Vec<f64>)> =
            units.into_iter().enumerate().map(|(s, u)| (k + s, u)).collect();
        for (j, t) in config.adjustment.iter().enumerate() {
            if let Term::ExposureInteraction(c) = t {
                exposure_cols
                    .push((2 * k + j, records.iter().map(|r| c.value(r)).collect()));
            }
        }
        return Ok(EffectDesign { n_cols: p, rows, exposure_cols });
    }

    // Plain path: intercept + exposure + adjustment terms.
    let mut terms = vec![Term::Intercept, Term::Exposure];
    terms.extend(config.adjustment.iter().copied());
    let p = terms.len();
    let mut rows = vec![0.0_f64; n * p];
    let mut exposure_cols: Vec<(usize, Vec<f64>)> = Vec::new();
    for (j, t) in terms.iter().enumerate() {
        match t {
            Term::Exposure => exposure_cols.push((j, vec![1.0; n])),
            Term::ExposureInteraction(c) => {
                exposure_cols.push((j, records.iter().map(|r| c.value(r)).collect()));
            }
            _ => {}
        }
    }
    for i in 0..n {
        for (j, t) in terms.iter().enumerate() {
            let v = t.value(&records[i]);
            if !v.is_finite() {
                return Err(Error::Input(format!(
                    "record {} has non-finite value for design column '{}'",
                    records[i].id,
                    t.label()
                )));
            }
            rows[i * p + j] = v;
        }
    }
    Ok(EffectDesign { n_cols: p, rows, exposure_cols })
}

/// HC3 sandwich: `(X'WX)⁻¹ [Σ w_i² e_i²/(1-h_ii)² x_i x_i'] (X'WX)⁻¹`
/// with leverage `h_ii = w_i x_i'(X'WX)⁻¹x_i`.
fn hc3_covariance(
    design: &EffectDesign,
    weights: &[f64],
    resid: &[f64],
    bread: &DMatrix<f64>,
) -> DMatrix<f64> {
    let n = resid.len();
    let p = design.n_cols;
    let mut meat = DMatrix::zeros(p, p);
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        let row = design.row(i);
        let mut bx = vec![0.0_f64; p];
        for a in 0..p {
            let mut acc = 0.0;
            for b in 0..p {
                acc += bread[(a, b)] * row[b];
            }
            bx[a] = acc;
        }
        let h: f64 = w * row.iter().zip(&bx).map(|(&x, &v)| x * v).sum::<f64>();
        // Guard exact-leverage rows against division blow-up.
        let one_minus_h = (1.0 - h).max(1e-8);
        let scale = (w * resid[i] / one_minus_h).powi(2);
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += scale * row[a] * row[b];
            }
        }
    }
    bread * meat * bread
}

/// Liang-Zeger cluster-robust sandwich with the `G/(G-1)·(N-1)/(N-K)`
/// small-sample correction.
fn cluster_robust_covariance(
    design: &EffectDesign,
    weights: &[f64],
    resid: &[f64],
    bread: &DMatrix<f64>,
    labels: &[usize],
    n_clusters: usize,
) -> DMatrix<f64> {
    let n = resid.len();
    let p = design.n_cols;

    // Per-cluster scores s_g = Σ_{i∈g} w_i e_i x_i.
    let mut scores = vec![0.0_f64; n_clusters * p];
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        let row = design.row(i);
        let we = w * resid[i];
        let g = labels[i];
        for a in 0..p {
            scores[g * p + a] += we * row[a];
        }
    }

    let mut meat = DMatrix::zeros(p, p);
    for g in 0..n_clusters {
        let s = &scores[g * p..(g + 1) * p];
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += s[a] * s[b];
            }
        }
    }

    let g = n_clusters as f64;
    let n_f = n as f64;
    let p_f = p as f64;
    let correction = if g > 1.0 && n_f > p_f {
        (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - p_f))
    } else {
        1.0
    };

    (bread * meat * bread) * correction
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal as RandNormal};

    fn record(id: u64, exposure: u8, outcome: f64) -> Record {
        Record {
            id,
            w1: 0.3,
            w2: 0.0,
            w3: -2.0,
            w4: 0,
            exposure,
            outcome,
            propensity_score: None,
            stratum: None,
            weight: None,
        }
    }

    #[test]
    fn unadjusted_two_group_contrast_is_the_mean_difference() {
        let records = vec![
            record(0, 0, 1.0),
            record(1, 0, 1.0),
            record(2, 1, 3.0),
            record(3, 1, 3.0),
        ];
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        let res = estimate_effect(&records, &config).unwrap();
        assert!((res.ate.estimate - 2.0).abs() < 1e-12);
        assert!((res.mean_exposed.estimate - 3.0).abs() < 1e-12);
        assert!((res.mean_unexposed.estimate - 1.0).abs() < 1e-12);
        assert_eq!(res.variance, VarianceEstimator::Hc3);
        assert_eq!(res.n_clusters, None);
        // Exact fit: zero residuals, zero standard error.
        assert!(res.ate.std_error.abs() < 1e-9);
    }

    #[test]
    fn stratified_contrast_averages_within_stratum_effects() {
        // Stratum 0 effect 1, stratum 1 effect 3, equal sizes: ATE = 2.
        let mut records = Vec::new();
        for i in 0..8u64 {
            let stratum = (i / 4) as usize;
            let exposure = (i % 2) as u8;
            let base = if stratum == 0 { 10.0 } else { 20.0 };
            let effect = if stratum == 0 { 1.0 } else { 3.0 };
            let mut r = record(i, exposure, base + effect * exposure as f64);
            r.stratum = Some(stratum);
            records.push(r);
        }
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        let res = estimate_effect(&records, &config).unwrap();
        assert!((res.ate.estimate - 2.0).abs() < 1e-10, "ate = {}", res.ate.estimate);
        assert_eq!(res.variance, VarianceEstimator::ClusterRobust);
        assert_eq!(res.n_clusters, Some(2));
        // Arm means follow the same stratum-size weighting.
        assert!((res.mean_exposed.estimate - 17.0).abs() < 1e-10);
        assert!((res.mean_unexposed.estimate - 15.0).abs() < 1e-10);
    }

    #[test]
    fn weighted_contrast_recovers_a_known_effect_with_noise() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let noise = RandNormal::new(0.0, 0.5).unwrap();
        let mut records = Vec::with_capacity(400);
        for i in 0..400u64 {
            let exposure = (i % 2) as u8;
            let outcome = 1.0 + 2.0 * exposure as f64 + noise.sample(&mut rng);
            let mut r = record(i, exposure, outcome);
            r.weight = Some(1.0);
            records.push(r);
        }
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        let res = estimate_effect(&records, &config).unwrap();
        assert!(res.ate.std_error > 0.0);
        assert!(
            (res.ate.estimate - 2.0).abs() < 4.0 * res.ate.std_error,
            "ate = {} (se {})",
            res.ate.estimate,
            res.ate.std_error
        );
        assert!(res.ate.conf_low < res.ate.estimate && res.ate.estimate < res.ate.conf_high);
        assert_eq!(res.variance, VarianceEstimator::Hc3);
    }

    #[test]
    fn identical_inputs_produce_identical_estimates() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let noise = RandNormal::new(0.0, 1.0).unwrap();
        let records: Vec<Record> = (0..100u64)
            .map(|i| {
                record(i, (i % 2) as u8, noise.sample(&mut rng) + (i % 2) as f64)
            })
            .collect();
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        let a = estimate_effect(&records, &config).unwrap();
        let b = estimate_effect(&records, &config).unwrap();
        assert_eq!(a.ate.estimate, b.ate.estimate);
        assert_eq!(a.ate.std_error, b.ate.std_error);
    }

    #[test]
    fn degenerate_stratum_is_reported() {
        let mut records = Vec::new();
        for i in 0..8u64 {
            let stratum = (i / 4) as usize;
            // Stratum 1 gets only exposed records.
            let exposure = if stratum == 1 { 1 } else { (i % 2) as u8 };
            let mut r = record(i, exposure, i as f64);
            r.stratum = Some(stratum);
            records.push(r);
        }
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        let err = estimate_effect(&records, &config).unwrap_err();
        assert!(matches!(err, Error::DegenerateStratum(_)));
    }

    #[test]
    fn partial_annotation_is_an_input_error() {
        let mut records =
            vec![record(0, 0, 1.0), record(1, 1, 2.0), record(2, 0, 1.5), record(3, 1, 2.5)];
        records[0].weight = Some(1.0);
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        assert!(matches!(
            estimate_effect(&records, &config),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn single_arm_population_is_rejected() {
        let records = vec![record(0, 1, 1.0), record(1, 1, 2.0)];
        let config = EffectConfig { adjustment: vec![], ..Default::default() };
        assert!(matches!(estimate_effect(&records, &config), Err(Error::Input(_))));
    }

    #[test]
    fn bad_conf_level_is_rejected() {
        let records = vec![record(0, 0, 1.0), record(1, 1, 2.0)];
        let config = EffectConfig { conf_level: 1.0, adjustment: vec![] };
        assert!(matches!(estimate_effect(&records, &config), Err(Error::Input(_))));
    }

    #[test]
    fn exposure_in_adjustment_terms_is_rejected() {
        let records = vec![record(0, 0, 1.0), record(1, 1, 2.0)];
        let config = EffectConfig {
            adjustment: vec![Term::Exposure],
            ..Default::default()
        };
        assert!(matches!(estimate_effect(&records, &config), Err(Error::Input(_))));
    }

    #[test]
    fn wider_conf_level_widens_the_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(29);
        let noise = RandNormal::new(0.0, 1.0).unwrap();
        let records: Vec<Record> = (0..200u64)
            .map(|i| record(i, (i % 2) as u8, (i % 2) as f64 + noise.sample(&mut rng)))
            .collect();
        let narrow = estimate_effect(
            &records,
            &EffectConfig { conf_level: 0.80, adjustment: vec![] },
        )
        .unwrap();
        let wide = estimate_effect(
            &records,
            &EffectConfig { conf_level: 0.99, adjustment: vec![] },
        )
        .unwrap();
        let narrow_width = narrow.ate.conf_high - narrow.ate.conf_low;
        let wide_width = wide.ate.conf_high - wide.ate.conf_low;
        assert!(wide_width > narrow_width);
        assert_eq!(narrow.ate.estimate, wide.ate.estimate);
    }
}
