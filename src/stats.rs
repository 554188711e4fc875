//! NaN-aware reducers shared by every pipeline stage.
//!
//! All reducers treat non-finite values as absent and return NaN when the
//! finite set is empty. NaN results are deliberate signal ("no data"), and
//! must stay distinguishable from an exact zero.

/// Finite subset of a slice, in input order.
pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Mean over finite values; NaN when none are finite.
pub fn nan_mean(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Median over finite values; NaN when none are finite.
pub fn nan_median(values: &[f64]) -> f64 {
    nan_percentile(values, 50.0)
}

/// Linearly interpolated percentile over finite values (numpy-style).
/// `q` is in [0, 100]. NaN when no finite values exist.
pub fn nan_percentile(values: &[f64], q: f64) -> f64 {
    let mut v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (q / 100.0).clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return v[lo];
    }
    let frac = rank - lo as f64;
    v[lo] * (1.0 - frac) + v[hi] * frac
}

/// Population standard deviation over finite values; NaN when none are finite.
pub fn nan_std_pop(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
    var.sqrt()
}

/// Weighted mean skipping pairs where the value or weight is non-finite or
/// the weight is not positive. NaN when no pair survives.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (&v, &w) in values.iter().zip(weights.iter()) {
        if v.is_finite() && w.is_finite() && w > 0.0 {
            num += v * w;
            den += w;
        }
    }
    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

/// Least-squares slope of y against x. NaN when fewer than two finite pairs
/// exist or x has zero variance.
pub fn lsq_slope(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (px, py) in &pairs {
        sxx += (px - mx) * (px - mx);
        sxy += (px - mx) * (py - my);
    }
    if sxx == 0.0 {
        return f64::NAN;
    }
    sxy / sxx
}

/// Clip to [lo, hi]; NaN passes through unchanged.
pub fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        v
    } else {
        v.clamp(lo, hi)
    }
}

/// NaN becomes 0.0; finite values pass through.
pub fn zero_if_nan(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}
