//! Bourdet-style derivative outlier rejection.
//!
//! Production rates are noisy in a very particular way: single months with a
//! shut-in, a mis-allocated volume, or a partial reporting period sit far off
//! the local decline trend. In log space such a point produces a wild
//! excursion in the numerical derivative, while genuine regime changes move
//! the derivative level smoothly. So: compute the log-rate derivative,
//! smooth it over a window of neighboring points, and flag points whose
//! derivative deviates from the smoothed one by more than `z_threshold`
//! local-spread units.
//!
//! Points are removed, never corrected, and the result never shrinks below
//! the configured floor: if removal would violate it, the least-anomalous
//! flagged points are retained.

use crate::error::CoreError;
use crate::math::{median, std_dev};

/// Knobs for the outlier filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierOptions {
    /// Number of neighboring points the derivative is smoothed over.
    pub smoothing_window: usize,
    /// Deviation threshold in local-spread units.
    pub z_threshold: f64,
    /// The filtered series never drops below this many points.
    pub min_points: usize,
}

/// Floor on the deviation spread, in log-rate-per-month units. On very
/// clean data the measured spread collapses toward zero and edge-window
/// artifacts would start scoring as outliers; anything below a few percent
/// month-over-month is production noise, not an excursion.
const MIN_SPREAD: f64 = 0.05;

impl Default for OutlierOptions {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            z_threshold: 2.0,
            min_points: 6,
        }
    }
}

/// Remove outliers from a rate series, returning new `(t, q)` vectors.
///
/// The input is not mutated. Series at or below the floor are returned
/// unchanged.
pub fn bourdet_filter(
    t: &[f64],
    q: &[f64],
    opts: &OutlierOptions,
) -> Result<(Vec<f64>, Vec<f64>), CoreError> {
    if t.len() != q.len() {
        return Err(CoreError::configuration(format!(
            "time/rate length mismatch: {} vs {}",
            t.len(),
            q.len()
        )));
    }
    if q.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
        return Err(CoreError::configuration(
            "outlier filter requires positive finite rates (log space)",
        ));
    }
    let n = t.len();
    if n <= opts.min_points || n < 4 {
        return Ok((t.to_vec(), q.to_vec()));
    }

    let log_q: Vec<f64> = q.iter().map(|&v| v.ln()).collect();
    let derivative = log_derivative(t, &log_q);

    // Deviation of each derivative from the rolling median of its
    // neighborhood, normalized by the overall spread of those deviations.
    // The median reference keeps a slow decline trend from registering as
    // deviation while staying insensitive to the outliers themselves.
    let smoothed = rolling_median(&derivative, opts.smoothing_window.max(3));
    let deviations: Vec<f64> = derivative
        .iter()
        .zip(smoothed.iter())
        .map(|(&d, &m)| d - m)
        .collect();
    let spread = std_dev(&deviations).max(MIN_SPREAD);
    let z_scores: Vec<f64> = deviations.iter().map(|&d| (d / spread).abs()).collect();

    let mut flagged: Vec<usize> = (0..n).filter(|&i| z_scores[i] > opts.z_threshold).collect();

    // Honor the floor: drop the worst offenders first, keep the rest.
    let removal_budget = n.saturating_sub(opts.min_points);
    if flagged.len() > removal_budget {
        flagged.sort_by(|&a, &b| {
            z_scores[b]
                .partial_cmp(&z_scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        flagged.truncate(removal_budget);
    }

    let mut keep = vec![true; n];
    for &i in &flagged {
        keep[i] = false;
    }

    let mut t_out = Vec::with_capacity(n - flagged.len());
    let mut q_out = Vec::with_capacity(n - flagged.len());
    for i in 0..n {
        if keep[i] {
            t_out.push(t[i]);
            q_out.push(q[i]);
        }
    }
    Ok((t_out, q_out))
}

/// Backward-difference derivative of `y` with respect to `t`; the first
/// point uses the forward difference so every point gets a value.
fn log_derivative(t: &[f64], y: &[f64]) -> Vec<f64> {
    let n = t.len();
    let mut out = Vec::with_capacity(n);
    out.push((y[1] - y[0]) / (t[1] - t[0]));
    for i in 1..n {
        out.push((y[i] - y[i - 1]) / (t[i] - t[i - 1]));
    }
    out
}

/// Centered rolling median with a trimmed window near the edges.
fn rolling_median(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        out.push(median(&values[lo..hi]).unwrap_or(values[i]));
    }
    out
}
