//! Explicit design-matrix construction.
//!
//! Model specifications are plain data rather than formula strings: a design
//! is a list of [`Term`]s, and [`build_design`] maps a record collection to
//! a rectangular row-major matrix. Nothing is evaluated at runtime beyond
//! products of covariate values.

use serde::{Deserialize, Serialize};

use ps_core::{Error, Result};

use crate::simulate::Record;

/// Baseline covariate identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Covariate {
    /// First confounder.
    W1,
    /// Second confounder.
    W2,
    /// Continuous noise covariate.
    W3,
    /// Binary noise covariate.
    W4,
}

impl Covariate {
    /// All baseline covariates, in reporting order.
    pub const ALL: [Covariate; 4] = [Covariate::W1, Covariate::W2, Covariate::W3, Covariate::W4];

    /// The covariates that confound the exposure-outcome relationship.
    pub const CONFOUNDERS: [Covariate; 2] = [Covariate::W1, Covariate::W2];

    /// Value of this covariate on a record.
    pub fn value(self, r: &Record) -> f64 {
        match self {
            Covariate::W1 => r.w1,
            Covariate::W2 => r.w2,
            Covariate::W3 => r.w3,
            Covariate::W4 => r.w4 as f64,
        }
    }

    /// Reporting label.
    pub fn label(self) -> &'static str {
        match self {
            Covariate::W1 => "w1",
            Covariate::W2 => "w2",
            Covariate::W3 => "w3",
            Covariate::W4 => "w4",
        }
    }
}

/// One column of a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// Constant 1.
    Intercept,
    /// Exposure indicator.
    Exposure,
    /// Covariate main effect.
    Main(Covariate),
    /// Squared covariate.
    Quadratic(Covariate),
    /// Product of two covariates.
    Interaction(Covariate, Covariate),
    /// Product of the exposure indicator and a covariate.
    ExposureInteraction(Covariate),
}

impl Term {
    /// Evaluate the term on a record with the stored exposure value.
    pub fn value(self, r: &Record) -> f64 {
        self.value_at(r, r.exposure as f64)
    }

    /// Evaluate the term on a record, overriding the exposure indicator.
    ///
    /// The override is what makes g-computation contrasts possible: the
    /// same row can be predicted under exposure 1 and exposure 0.
    pub fn value_at(self, r: &Record, exposure: f64) -> f64 {
        match self {
            Term::Intercept => 1.0,
            Term::Exposure => exposure,
            Term::Main(c) => c.value(r),
            Term::Quadratic(c) => {
                let v = c.value(r);
                v * v
            }
            Term::Interaction(a, b) => a.value(r) * b.value(r),
            Term::ExposureInteraction(c) => exposure * c.value(r),
        }
    }

    /// Reporting label for the design column.
    pub fn label(self) -> String {
        match self {
            Term::Intercept => "intercept".to_string(),
            Term::Exposure => "exposure".to_string(),
            Term::Main(c) => c.label().to_string(),
            Term::Quadratic(c) => format!("{}^2", c.label()),
            Term::Interaction(a, b) => format!("{}:{}", a.label(), b.label()),
            Term::ExposureInteraction(c) => format!("exposure:{}", c.label()),
        }
    }
}

/// Exposure-model design: `1 + w1 + w1² + w2 + w1·w2`.
pub fn exposure_model_terms() -> Vec<Term> {
    vec![
        Term::Intercept,
        Term::Main(Covariate::W1),
        Term::Quadratic(Covariate::W1),
        Term::Main(Covariate::W2),
        Term::Interaction(Covariate::W1, Covariate::W2),
    ]
}

/// Build a row-major design matrix for the given terms.
///
/// Every evaluated cell must be finite; a NaN or infinite covariate is an
/// input error, not a silent NaN propagated into the fit.
pub fn build_design(records: &[Record], terms: &[Term]) -> Result<Vec<Vec<f64>>> {
    if records.is_empty() {
        return Err(Error::Input("records must be non-empty".into()));
    }
    if terms.is_empty() {
        return Err(Error::Input("design must have at least one term".into()));
    }
    let mut rows = Vec::with_capacity(records.len());
    for r in records {
        let mut row = Vec::with_capacity(terms.len());
        for t in terms {
            let v = t.value(r);
            if !v.is_finite() {
                return Err(Error::Input(format!(
                    "record {} has non-finite value for design column '{}'",
                    r.id,
                    t.label()
                )));
            }
            row.push(v);
        }
        rows.push(row);
    }
    Ok(rows)
}
