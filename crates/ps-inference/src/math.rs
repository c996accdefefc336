//! Numerically stable scalar helpers shared by the pipeline stages.

/// Stable `log(1 + exp(x))`.
///
/// `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`; the exponential argument
/// is never positive, so it cannot overflow.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    x.max(0.0) + e.ln_1p()
}

/// Stable logistic function `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let r = 1.0 / (1.0 + e);
    // x >= 0: 1/(1+exp(-x)); x < 0: exp(x)/(1+exp(x))
    if x >= 0.0 { r } else { e * r }
}

/// Inverse of [`sigmoid`]: `log(p / (1 - p))`.
#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Quantile of pre-sorted data via linear interpolation.
///
/// - `q = 0` returns the minimum, `q = 1` the maximum.
/// - Empty input returns `NaN`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}
