//! Quantile stratification on the propensity score.
//!
//! Partitions the population into `k` contiguous propensity-score ranges
//! using linear-interpolation quantiles as cut points. Coverage is total:
//! the lowest and highest edges are inclusive, a boundary value belongs to
//! the lower stratum, and the global minimum belongs to the first stratum.

use serde::Serialize;

use ps_core::{Error, Result};

use crate::math::quantile_sorted;
use crate::simulate::Record;

/// Default number of propensity strata.
pub const DEFAULT_STRATA: usize = 5;

/// Summary of a single propensity stratum.
#[derive(Debug, Clone, Serialize)]
pub struct StratumSummary {
    /// Stratum index (0-based, ordered by propensity score).
    pub index: usize,
    /// Number of records in the stratum.
    pub n: usize,
    /// Number of exposed records.
    pub n_exposed: usize,
    /// Number of unexposed records.
    pub n_unexposed: usize,
    /// Smallest propensity score in the stratum.
    pub score_min: f64,
    /// Largest propensity score in the stratum.
    pub score_max: f64,
}

/// Result of a stratification pass.
#[derive(Debug, Clone, Serialize)]
pub struct Stratification {
    /// Interior quantile cut points (length `k - 1`, non-decreasing).
    pub cut_points: Vec<f64>,
    /// Per-stratum summaries, ordered by index.
    pub strata: Vec<StratumSummary>,
}

/// Assign every record to one of `k` propensity strata.
///
/// Requires fitted propensity scores on all records. After assignment each
/// stratum must contain records from both exposure arms; a stratum with a
/// single arm (or no records at all) makes the within-stratum contrast
/// inestimable and is reported as [`Error::DegenerateStratum`]. Records are
/// only annotated when the whole pass succeeds.
pub fn assign_strata(records: &mut [Record], k: usize) -> Result<Stratification> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }
    if k < 2 {
        return Err(Error::Input(format!("need at least 2 strata, got {k}")));
    }

    let mut scores = Vec::with_capacity(records.len());
    for r in records.iter() {
        let s = r.propensity_score.ok_or_else(|| {
            Error::Input(format!(
                "record {} has no propensity score; fit the exposure model first",
                r.id
            ))
        })?;
        scores.push(s);
    }

    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let cut_points: Vec<f64> =
        (1..k).map(|i| quantile_sorted(&sorted, i as f64 / k as f64)).collect();

    // Interval s covers (cut[s-1], cut[s]], with the first interval closed
    // on the left at the global minimum.
    let assign = |score: f64| -> usize {
        let mut s = 0;
        while s < k - 1 && score > cut_points[s] {
            s += 1;
        }
        s
    };
    let assigned: Vec<usize> = scores.iter().map(|&p| assign(p)).collect();

    let mut strata: Vec<StratumSummary> = (0..k)
        .map(|index| StratumSummary {
            index,
            n: 0,
            n_exposed: 0,
            n_unexposed: 0,
            score_min: f64::INFINITY,
            score_max: f64::NEG_INFINITY,
        })
        .collect();
    for (r, (&s, &p)) in records.iter().zip(assigned.iter().zip(&scores)) {
        let sum = &mut strata[s];
        sum.n += 1;
        if r.exposure == 1 {
            sum.n_exposed += 1;
        } else {
            sum.n_unexposed += 1;
        }
        sum.score_min = sum.score_min.min(p);
        sum.score_max = sum.score_max.max(p);
    }

    for sum in &strata {
        if sum.n == 0 {
            return Err(Error::DegenerateStratum(format!(
                "stratum {} is empty (k = {k} too large for this population?)",
                sum.index
            )));
        }
        if sum.n_exposed == 0 || sum.n_unexposed == 0 {
            return Err(Error::DegenerateStratum(format!(
                "stratum {} has {} exposed and {} unexposed records",
                sum.index, sum.n_exposed, sum.n_unexposed
            )));
        }
    }

    for (r, s) in records.iter_mut().zip(assigned) {
        r.stratum = Some(s);
    }
    Ok(Stratification { cut_points, strata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propensity::{fit_propensity, PropensityConfig};
    use crate::simulate::{simulate_population, SimulationConfig};

    fn scored_population(n: usize, seed: u64) -> Vec<Record> {
        let mut records =
            simulate_population(&SimulationConfig { n, seed, ..Default::default() }).unwrap();
        fit_propensity(&mut records, &PropensityConfig::default()).unwrap();
        records
    }

    #[test]
    fn every_record_lands_in_exactly_one_stratum() {
        let mut records = scored_population(1000, 7);
        let result = assign_strata(&mut records, DEFAULT_STRATA).unwrap();

        assert_eq!(result.cut_points.len(), 4);
        assert_eq!(result.strata.len(), 5);
        let total: usize = result.strata.iter().map(|s| s.n).sum();
        assert_eq!(total, 1000);
        assert!(records.iter().all(|r| r.stratum.is_some()));
        assert!(records.iter().all(|r| r.stratum.unwrap() < 5));
    }

    #[test]
    fn stratum_score_ranges_are_non_decreasing() {
        let mut records = scored_population(1000, 7);
        let result = assign_strata(&mut records, 5).unwrap();
        for pair in result.strata.windows(2) {
            assert!(
                pair[0].score_max <= pair[1].score_min,
                "stratum {} max {} exceeds stratum {} min {}",
                pair[0].index,
                pair[0].score_max,
                pair[1].index,
                pair[1].score_min
            );
        }
    }

    #[test]
    fn quantile_strata_have_near_equal_sizes() {
        let mut records = scored_population(1000, 7);
        let result = assign_strata(&mut records, 5).unwrap();
        for s in &result.strata {
            assert!(s.n >= 180 && s.n <= 220, "stratum {} has n={}", s.index, s.n);
        }
    }

    #[test]
    fn boundary_score_belongs_to_the_lower_stratum() {
        // Five evenly spaced scores with k = 2: the median cut lands exactly
        // on the middle record's score (0.3).
        let mut records =
            simulate_population(&SimulationConfig { n: 5, seed: 11, ..Default::default() })
                .unwrap();
        let scores = [0.1, 0.2, 0.3, 0.4, 0.5];
        for (r, &p) in records.iter_mut().zip(&scores) {
            r.propensity_score = Some(p);
            // Alternate arms so neither stratum is degenerate.
            r.exposure = (r.id % 2) as u8;
        }
        let result = assign_strata(&mut records, 2).unwrap();
        assert!((result.cut_points[0] - 0.3).abs() < 1e-12);
        // The record exactly on the cut goes to the lower stratum, and the
        // global minimum is in the first stratum.
        assert_eq!(records[2].stratum, Some(0));
        assert_eq!(records[0].stratum, Some(0));
        assert_eq!(records[3].stratum, Some(1));
        assert_eq!(result.strata[0].n, 3);
        assert_eq!(result.strata[1].n, 2);
    }

    #[test]
    fn missing_scores_are_an_input_error() {
        let mut records =
            simulate_population(&SimulationConfig { n: 20, seed: 1, ..Default::default() })
                .unwrap();
        let err = assign_strata(&mut records, 5).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn single_arm_stratum_is_degenerate() {
        let mut records = scored_population(50, 3);
        // Force all low-score records to the unexposed arm so the first
        // stratum has one exposure group only.
        let mut sorted: Vec<f64> =
            records.iter().map(|r| r.propensity_score.unwrap()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let cut = quantile_sorted(&sorted, 0.2);
        for r in records.iter_mut() {
            if r.propensity_score.unwrap() <= cut {
                r.exposure = 0;
            }
        }
        let err = assign_strata(&mut records, 5).unwrap_err();
        assert!(matches!(err, Error::DegenerateStratum(_)));
        // No partial annotation on failure.
        assert!(records.iter().all(|r| r.stratum.is_none()));
    }

    #[test]
    fn rejects_k_below_two() {
        let mut records = scored_population(20, 2);
        assert!(matches!(assign_strata(&mut records, 1), Err(Error::Input(_))));
    }
}
