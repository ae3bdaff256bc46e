//! Descriptive statistics and series helpers.
//!
//! Everything here operates on plain `&[f64]` slices so the fitting and
//! validation code stays free of any framework types. Conventions follow the
//! usual numerical ones: population standard deviation, linear-interpolated
//! quantiles, `R² = 0` when the total sum of squares is zero.

/// Goodness-of-fit triple for a fitted series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoodnessOfFit {
    pub r_squared: f64,
    pub rmse: f64,
    pub mae: f64,
}

/// Compute R², RMSE, and MAE of predictions against observations.
///
/// A constant observed series has `ss_tot == 0`; R² is defined as 0 there so
/// downstream thresholds treat it as a poor fit rather than dividing by zero.
pub fn goodness_of_fit(actual: &[f64], predicted: &[f64]) -> GoodnessOfFit {
    debug_assert_eq!(actual.len(), predicted.len());
    let n = actual.len() as f64;
    if actual.is_empty() {
        return GoodnessOfFit {
            r_squared: 0.0,
            rmse: 0.0,
            mae: 0.0,
        };
    }

    let mean_act = actual.iter().sum::<f64>() / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut abs_sum = 0.0;
    for (&a, &p) in actual.iter().zip(predicted.iter()) {
        let r = a - p;
        ss_res += r * r;
        ss_tot += (a - mean_act) * (a - mean_act);
        abs_sum += r.abs();
    }

    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    GoodnessOfFit {
        r_squared,
        rmse: (ss_res / n).sqrt(),
        mae: abs_sum / n,
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|&v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Median of a slice (sorts a copy).
pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Linear-interpolated quantile, `p` in [0, 1]. Non-finite inputs are
/// ignored; returns `None` when nothing finite remains.
pub fn quantile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        let frac = pos - lo as f64;
        Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
    }
}

/// One pass of a trailing 3-point rolling mean.
///
/// The window is trimmed at the start of the series (the first point averages
/// only itself), so the output has the same length as the input and the first
/// value is unchanged.
pub fn rolling_mean3(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let lo = i.saturating_sub(2);
        let window = &values[lo..=i];
        out.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    out
}

/// Apply `passes` passes of the 3-point rolling mean.
pub fn smooth(values: &[f64], passes: usize) -> Vec<f64> {
    let mut out = values.to_vec();
    for _ in 0..passes {
        out = rolling_mean3(&out);
    }
    out
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let mut total = 0.0;
    for i in 1..x.len() {
        total += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
    }
    total
}
