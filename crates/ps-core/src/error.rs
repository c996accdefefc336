//! Error types for the pscore pipeline.

use thiserror::Error;

/// Pipeline error type.
///
/// Every stage failure is terminal for the run: callers abort downstream
/// stages and surface the error unchanged. There is no retry or
/// partial-result path.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input data: a non-finite covariate or outcome,
    /// an annotation (score, stratum, weight) absent where a stage needs it,
    /// or an annotation present on only part of the population.
    #[error("input error: {0}")]
    Input(String),

    /// Model fitting did not converge (e.g. separation in the exposure
    /// model, or a fitted probability at the floating-point boundary).
    #[error("convergence error: {0}")]
    Convergence(String),

    /// A propensity stratum holds a single exposure group, so no
    /// within-stratum contrast is estimable.
    #[error("degenerate stratum: {0}")]
    DegenerateStratum(String),

    /// A propensity score of exactly 0 or 1 makes an inverse-probability
    /// weight unbounded.
    #[error("infinite weight: {0}")]
    InfiniteWeight(String),

    /// Numerical linear-algebra failure (singular system, failed inversion).
    #[error("computation error: {0}")]
    Computation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let e = Error::DegenerateStratum("stratum 3 has no unexposed records".into());
        assert_eq!(e.to_string(), "degenerate stratum: stratum 3 has no unexposed records");

        let e = Error::InfiniteWeight("record 17 has propensity score 1".into());
        assert!(e.to_string().starts_with("infinite weight:"));
    }
}
