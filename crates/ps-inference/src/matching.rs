//! Full matching on the propensity score.
//!
//! Builds variable-size matched sets, each containing at least one exposed
//! and one unexposed record, that keep within-set propensity distances
//! small. The construction is a deterministic nearest-anchor pass:
//!
//! 1. the smaller exposure arm provides one anchor per set, sorted by
//!    propensity score;
//! 2. every record of the larger arm attaches to the anchor with the
//!    closest score (ties go to the lower-scored anchor);
//! 3. sets that end up below the minimum size, or without a member from
//!    both arms, are merged with their score-adjacent neighbour.
//!
//! No record is dropped: every unit keeps a strictly positive weight, and
//! within each set the weights make the two arms contribute equally
//! (`n_s / (2·n_s1)` for exposed members, `n_s / (2·n_s0)` for unexposed).
//! The matched-set label is written to `stratum`, making it the clustering
//! variable for downstream variance estimation.

use serde::Serialize;

use ps_core::{Error, Result};

use crate::simulate::Record;

/// Configuration for full matching.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Minimum number of records per matched set (counting both arms).
    pub min_set_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { min_set_size: 2 }
    }
}

/// A matched set of exposed and unexposed record ids.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedSet {
    /// Set label, also written to each member's `stratum` field.
    pub index: usize,
    /// Ids of exposed members.
    pub exposed: Vec<u64>,
    /// Ids of unexposed members.
    pub unexposed: Vec<u64>,
}

/// Result of a full-matching pass.
#[derive(Debug, Clone, Serialize)]
pub struct Matching {
    /// All matched sets, ordered by propensity score.
    pub sets: Vec<MatchedSet>,
    /// Sum of |score − anchor score| over all attached records.
    pub total_distance: f64,
    /// Size of the largest matched set.
    pub max_set_size: usize,
}

/// Construct matched sets and annotate records with set labels and
/// arm-equalising weights.
///
/// Requires fitted propensity scores. Fails with [`Error::Input`] when
/// scores are missing, the population has a single exposure arm, or
/// `min_set_size < 2`.
pub fn full_match(records: &mut [Record], config: &MatchingConfig) -> Result<Matching> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }
    if config.min_set_size < 2 {
        return Err(Error::Input(format!(
            "min_set_size must be at least 2, got {}",
            config.min_set_size
        )));
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

    let exposed: Vec<usize> =
        (0..records.len()).filter(|&i| records[i].exposure == 1).collect();
    let unexposed: Vec<usize> =
        (0..records.len()).filter(|&i| records[i].exposure == 0).collect();
    if exposed.is_empty() || unexposed.is_empty() {
        return Err(Error::Input("population contains a single exposure arm".into()));
    }

    // The smaller arm anchors the sets; the larger arm attaches greedily.
    let (minority, majority) = if exposed.len() <= unexposed.len() {
        (exposed, unexposed)
    } else {
        (unexposed, exposed)
    };

    let mut anchors = minority;
    anchors.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
    let anchor_scores: Vec<f64> = anchors.iter().map(|&i| scores[i]).collect();

    let mut members: Vec<Vec<usize>> = anchors.iter().map(|&i| vec![i]).collect();
    let mut total_distance = 0.0;

    let mut attach = majority;
    attach.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
    for &j in &attach {
        let p = scores[j];
        let k = anchor_scores.partition_point(|&a| a < p);
        let best = if k == 0 {
            0
        } else if k >= anchor_scores.len() {
            anchor_scores.len() - 1
        } else if p - anchor_scores[k - 1] <= anchor_scores[k] - p {
            k - 1
        } else {
            k
        };
        total_distance += (p - anchor_scores[best]).abs();
        members[best].push(j);
    }

    // Merge pass: anchors that attracted nothing (or too little) fold into
    // their score-adjacent neighbour so every set meets the size floor and
    // holds both arms.
    let mut merged: Vec<Vec<usize>> = Vec::with_capacity(members.len());
    for set in members {
        match merged.last_mut() {
            Some(prev) if set.len() < config.min_set_size => prev.extend(set),
            _ => merged.push(set),
        }
    }
    let mut i = 0;
    while i < merged.len() {
        let n_exp = merged[i].iter().filter(|&&m| records[m].exposure == 1).count();
        let mixed = n_exp > 0 && n_exp < merged[i].len();
        if merged[i].len() >= config.min_set_size && mixed {
            i += 1;
        } else if i + 1 < merged.len() {
            let set = merged.remove(i);
            merged[i].splice(0..0, set);
        } else if i > 0 {
            let set = merged.remove(i);
            merged[i - 1].extend(set);
            i -= 1;
        } else {
            // A single set spanning the whole population; both arms are
            // present because the population has both.
            break;
        }
    }

    let mut weights = vec![0.0_f64; records.len()];
    let mut strata = vec![0_usize; records.len()];
    let mut sets = Vec::with_capacity(merged.len());
    let mut max_set_size = 0;
    for (index, set) in merged.iter().enumerate() {
        let n_s = set.len();
        let n_s1 = set.iter().filter(|&&m| records[m].exposure == 1).count();
        let n_s0 = n_s - n_s1;
        max_set_size = max_set_size.max(n_s);

        let mut exposed_ids = Vec::with_capacity(n_s1);
        let mut unexposed_ids = Vec::with_capacity(n_s0);
        for &m in set {
            if records[m].exposure == 1 {
                weights[m] = n_s as f64 / (2.0 * n_s1 as f64);
                exposed_ids.push(records[m].id);
            } else {
                weights[m] = n_s as f64 / (2.0 * n_s0 as f64);
                unexposed_ids.push(records[m].id);
            }
            strata[m] = index;
        }
        sets.push(MatchedSet { index, exposed: exposed_ids, unexposed: unexposed_ids });
    }

    for (i, r) in records.iter_mut().enumerate() {
        r.weight = Some(weights[i]);
        r.stratum = Some(strata[i]);
    }

    Ok(Matching { sets, total_distance, max_set_size })
}
