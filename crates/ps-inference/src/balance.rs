//! Covariate balance diagnostics.
//!
//! Reports the standardized mean difference (SMD) of every baseline
//! covariate between exposure arms, before and after adjustment. The
//! adjusted comparison uses whatever structure the records carry: explicit
//! weights when present, stratum-implied ATE weights when only strata are
//! assigned, and unit weights otherwise (in which case the adjusted column
//! repeats the unadjusted one).
//!
//! The SMD denominator is always the unadjusted pooled group variance, so
//! the before/after columns are on the same scale.

use serde::Serialize;

use ps_core::{Error, Result};

use crate::design::Covariate;
use crate::simulate::Record;

/// Default flag threshold on the absolute standardized mean difference.
pub const DEFAULT_BALANCE_THRESHOLD: f64 = 0.1;

/// Balance row for one covariate.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    /// Covariate label.
    pub name: String,
    /// SMD between arms before adjustment.
    pub smd_unadjusted: f64,
    /// SMD between arms under the adjustment structure.
    pub smd_adjusted: f64,
    /// True when |`smd_adjusted`| exceeds the threshold.
    pub flagged: bool,
}

/// Balance report across all baseline covariates.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    /// Flag threshold used.
    pub threshold: f64,
    /// One row per covariate, in reporting order.
    pub entries: Vec<BalanceEntry>,
    /// True when no covariate is flagged.
    pub balanced: bool,
}

impl BalanceReport {
    /// Balance rows restricted to the confounders (`w1`, `w2`).
    pub fn confounders(&self) -> impl Iterator<Item = &BalanceEntry> {
        self.entries.iter().filter(|e| {
            Covariate::CONFOUNDERS.iter().any(|c| c.label() == e.name)
        })
    }
}

/// Compute the balance report for the current adjustment structure.
///
/// Rerunning on an unchanged population reproduces the same report; the
/// diagnostic never mutates the records.
pub fn covariate_balance(records: &[Record], threshold: f64) -> Result<BalanceReport> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }
    if !(threshold > 0.0 && threshold.is_finite()) {
        return Err(Error::Input(format!("threshold must be positive and finite, got {threshold}")));
    }
    let n_exposed = records.iter().filter(|r| r.exposure == 1).count();
    if n_exposed < 2 || records.len() - n_exposed < 2 {
        return Err(Error::Input(
            "balance needs at least two records in each exposure arm".into(),
        ));
    }

    let unit = vec![1.0; records.len()];
    let adjusted = adjustment_weights(records)?;

    let mut entries = Vec::with_capacity(Covariate::ALL.len());
    for c in Covariate::ALL {
        let smd_unadjusted = weighted_smd(records, c, &unit);
        let smd_adjusted = weighted_smd(records, c, &adjusted);
        let flagged = smd_adjusted.abs() > threshold;
        entries.push(BalanceEntry {
            name: c.label().to_string(),
            smd_unadjusted,
            smd_adjusted,
            flagged,
        });
    }
    let balanced = entries.iter().all(|e| !e.flagged);
    Ok(BalanceReport { threshold, entries, balanced })
}

/// Weights implied by the adjustment structure carried on the records.
fn adjustment_weights(records: &[Record]) -> Result<Vec<f64>> {
    let n_weighted = records.iter().filter(|r| r.weight.is_some()).count();
    if n_weighted > 0 {
        if n_weighted < records.len() {
            return Err(Error::Input("weights assigned to only part of the population".into()));
        }
        return Ok(records.iter().map(|r| r.weight.unwrap_or(0.0)).collect());
    }

    let n_stratified = records.iter().filter(|r| r.stratum.is_some()).count();
    if n_stratified > 0 {
        if n_stratified < records.len() {
            return Err(Error::Input("strata assigned to only part of the population".into()));
        }
        return stratum_ate_weights(records);
    }

    Ok(vec![1.0; records.len()])
}

/// ATE weights implied by stratification: within stratum `s`, exposed
/// records weigh `n_s / (2·n_s1)` and unexposed `n_s / (2·n_s0)`, so each
/// arm contributes half of every stratum.
fn stratum_ate_weights(records: &[Record]) -> Result<Vec<f64>> {
    let k = records.iter().filter_map(|r| r.stratum).max().unwrap_or(0) + 1;
    let mut n = vec![0usize; k];
    let mut n_exposed = vec![0usize; k];
    for r in records {
        let s = r.stratum.expect("checked by caller");
        n[s] += 1;
        if r.exposure == 1 {
            n_exposed[s] += 1;
        }
    }
    for s in 0..k {
        if n[s] > 0 && (n_exposed[s] == 0 || n_exposed[s] == n[s]) {
            return Err(Error::DegenerateStratum(format!(
                "stratum {s} has a single exposure arm; balance weights undefined"
            )));
        }
    }
    Ok(records
        .iter()
        .map(|r| {
            let s = r.stratum.expect("checked by caller");
            let (n_s, n_s1) = (n[s] as f64, n_exposed[s] as f64);
            if r.exposure == 1 { n_s / (2.0 * n_s1) } else { n_s / (2.0 * (n_s - n_s1)) }
        })
        .collect())
}

/// Weighted SMD with an unweighted pooled-variance denominator.
fn weighted_smd(records: &[Record], c: Covariate, weights: &[f64]) -> f64 {
    let mut sum = [0.0_f64; 2];
    let mut wsum = [0.0_f64; 2];
    for (r, &w) in records.iter().zip(weights) {
        let arm = r.exposure as usize;
        sum[arm] += w * c.value(r);
        wsum[arm] += w;
    }
    let mean_unexposed = sum[0] / wsum[0];
    let mean_exposed = sum[1] / wsum[1];

    let mut ss = [0.0_f64; 2];
    let mut m = [0.0_f64; 2];
    let mut count = [0usize; 2];
    for r in records {
        let arm = r.exposure as usize;
        m[arm] += c.value(r);
        count[arm] += 1;
    }
    m[0] /= count[0] as f64;
    m[1] /= count[1] as f64;
    for r in records {
        let arm = r.exposure as usize;
        let d = c.value(r) - m[arm];
        ss[arm] += d * d;
    }
    let var_unexposed = ss[0] / (count[0] - 1) as f64;
    let var_exposed = ss[1] / (count[1] - 1) as f64;
    let denom = ((var_exposed + var_unexposed) / 2.0).sqrt();

    let diff = mean_exposed - mean_unexposed;
    if denom > 0.0 {
        diff / denom
    } else if diff == 0.0 {
        0.0
    } else {
        f64::INFINITY.copysign(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propensity::{fit_propensity, PropensityConfig};
    use crate::simulate::{simulate_population, SimulationConfig};
    use crate::strata::assign_strata;
    use crate::weighting::assign_ipw_weights;

    fn scored_population(n: usize, seed: u64) -> Vec<Record> {
        let mut records =
            simulate_population(&SimulationConfig { n, seed, ..Default::default() }).unwrap();
        fit_propensity(&mut records, &PropensityConfig::default()).unwrap();
        records
    }

    #[test]
    fn unadjusted_population_shows_confounder_imbalance() {
        let records = scored_population(2000, 7);
        let report = covariate_balance(&records, DEFAULT_BALANCE_THRESHOLD).unwrap();
        assert_eq!(report.entries.len(), 4);
        // Without adjustment the adjusted column repeats the raw column.
        for e in &report.entries {
            assert_eq!(e.smd_unadjusted, e.smd_adjusted);
        }
        // w1 raises exposure probability, w2 lowers it.
        let w1 = &report.entries[0];
        let w2 = &report.entries[1];
        assert!(w1.smd_unadjusted > 0.1, "w1 SMD {}", w1.smd_unadjusted);
        assert!(w2.smd_unadjusted < -0.1, "w2 SMD {}", w2.smd_unadjusted);
    }

    #[test]
    fn ipw_restores_confounder_balance() {
        let mut records = scored_population(2000, 7);
        assign_ipw_weights(&mut records).unwrap();
        let report = covariate_balance(&records, DEFAULT_BALANCE_THRESHOLD).unwrap();
        for e in report.confounders() {
            assert!(
                e.smd_adjusted.abs() < DEFAULT_BALANCE_THRESHOLD,
                "{} adjusted SMD {}",
                e.name,
                e.smd_adjusted
            );
            assert!(!e.flagged);
        }
    }

    #[test]
    fn stratification_weights_reduce_confounder_imbalance() {
        let mut records = scored_population(2000, 7);
        assign_strata(&mut records, 5).unwrap();
        let report = covariate_balance(&records, DEFAULT_BALANCE_THRESHOLD).unwrap();
        for e in report.confounders() {
            assert!(
                e.smd_adjusted.abs() < e.smd_unadjusted.abs(),
                "{}: {} vs {}",
                e.name,
                e.smd_adjusted,
                e.smd_unadjusted
            );
        }
    }

    #[test]
    fn diagnostics_are_idempotent() {
        let mut records = scored_population(1000, 9);
        assign_ipw_weights(&mut records).unwrap();
        let a = covariate_balance(&records, DEFAULT_BALANCE_THRESHOLD).unwrap();
        let b = covariate_balance(&records, DEFAULT_BALANCE_THRESHOLD).unwrap();
        for (ea, eb) in a.entries.iter().zip(&b.entries) {
            assert_eq!(ea.smd_adjusted, eb.smd_adjusted);
            assert_eq!(ea.flagged, eb.flagged);
        }
        assert_eq!(a.balanced, b.balanced);
    }

    #[test]
    fn partial_weights_are_an_input_error() {
        let mut records = scored_population(100, 5);
        records[0].weight = Some(2.0);
        let err = covariate_balance(&records, 0.1).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn bad_threshold_is_rejected() {
        let records = scored_population(100, 5);
        assert!(covariate_balance(&records, 0.0).is_err());
        assert!(covariate_balance(&records, f64::NAN).is_err());
    }
}
