//! Diagnostic b-factor bounds from the loss-ratio derivative.
//!
//! For an ideal hyperbolic decline the reciprocal loss ratio `1/D` (with
//! `D = -d ln q / dt`) is linear in time with slope exactly `b`. Real data is
//! nowhere near that clean, so instead of one slope we take the pointwise
//! discrete slope, keep the usable values, and summarize them with the 10th,
//! 50th, and 90th percentiles. The clamped spread of those percentiles then
//! replaces the preset b-factor bounds for the well.

use serde::{Deserialize, Serialize};

use crate::domain::BFactorBounds;
use crate::error::CoreError;
use crate::math::quantile;

/// Pointwise b estimates are discarded outside this range before the
/// percentile summary; values beyond it are numerical noise, not physics.
const B_USABLE_MIN: f64 = 0.0;
const B_USABLE_MAX: f64 = 5.0;

/// Fewer usable pointwise estimates than this and the percentiles are
/// meaningless.
const MIN_USABLE_POINTS: usize = 6;

/// The upper bound is pushed to at least this multiple of the lower bound so
/// the optimizer always has room to move.
const B_MIN_SPREAD: f64 = 1.1;

/// Global clamp range applied to diagnostic bounds before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BFactorLimits {
    pub min_b: f64,
    pub max_b: f64,
}

impl Default for BFactorLimits {
    fn default() -> Self {
        Self {
            min_b: 0.5,
            max_b: 1.4,
        }
    }
}

/// Percentile summary of the pointwise b estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BFactorDiagnostics {
    /// 10th percentile.
    pub low: f64,
    /// Median.
    pub mid: f64,
    /// 90th percentile.
    pub high: f64,
    /// Number of pointwise estimates that survived filtering.
    pub usable_points: usize,
}

/// Estimate pointwise b values from the rate series and summarize them.
///
/// Fails with `DataInsufficiency` when fewer than six usable pointwise
/// estimates remain; callers fall back to the preset bounds in that case.
pub fn b_factor_diagnostics(t: &[f64], q: &[f64]) -> Result<BFactorDiagnostics, CoreError> {
    if t.len() != q.len() {
        return Err(CoreError::configuration(format!(
            "time/rate length mismatch: {} vs {}",
            t.len(),
            q.len()
        )));
    }
    if q.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
        return Err(CoreError::configuration(
            "b-factor diagnostics require positive finite rates",
        ));
    }
    let n = t.len();
    if n < MIN_USABLE_POINTS + 2 {
        return Err(CoreError::data_insufficiency(format!(
            "b-factor diagnostics need at least {} points, got {n}",
            MIN_USABLE_POINTS + 2
        )));
    }

    // Nominal decline on each interval: D = -(ln q2 - ln q1) / (t2 - t1).
    let mut decline = Vec::with_capacity(n - 1);
    for i in 0..n - 1 {
        let dt = t[i + 1] - t[i];
        if !(dt > 0.0) {
            return Err(CoreError::configuration(
                "time offsets must be strictly increasing",
            ));
        }
        decline.push(-(q[i + 1].ln() - q[i].ln()) / dt);
    }

    // b = d(1/D)/dt, discretized on consecutive intervals. The time unit
    // cancels, so months work as well as years here.
    let mut estimates = Vec::with_capacity(n - 2);
    for i in 0..decline.len() - 1 {
        let (d1, d2) = (decline[i], decline[i + 1]);
        if d1 <= 0.0 || d2 <= 0.0 {
            continue;
        }
        let mid1 = (t[i] + t[i + 1]) / 2.0;
        let mid2 = (t[i + 1] + t[i + 2]) / 2.0;
        let b = (1.0 / d2 - 1.0 / d1) / (mid2 - mid1);
        if b.is_finite() && (B_USABLE_MIN..=B_USABLE_MAX).contains(&b) {
            estimates.push(b);
        }
    }

    if estimates.len() < MIN_USABLE_POINTS {
        return Err(CoreError::data_insufficiency(format!(
            "only {} usable b-factor estimates (need {MIN_USABLE_POINTS})",
            estimates.len()
        )));
    }

    estimates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(BFactorDiagnostics {
        low: quantile(&estimates, 0.10).unwrap_or(f64::NAN),
        mid: quantile(&estimates, 0.50).unwrap_or(f64::NAN),
        high: quantile(&estimates, 0.90).unwrap_or(f64::NAN),
        usable_points: estimates.len(),
    })
}

/// Turn raw diagnostics into fitting bounds.
///
/// Both ends are clamped into `limits`, the upper end is forced to at least
/// `1.1x` the lower (capped at the clamp maximum), and the guess is the
/// median when it lands inside the resulting interval. A median outside the
/// interval, or a non-finite one, is replaced by the interval midpoint.
pub fn clamp_b_bounds(diag: &BFactorDiagnostics, limits: &BFactorLimits) -> BFactorBounds {
    let min = diag.low.clamp(limits.min_b, limits.max_b);
    let mut max = diag.high.clamp(limits.min_b, limits.max_b);
    if max < min * B_MIN_SPREAD {
        max = (min * B_MIN_SPREAD).min(limits.max_b);
    }
    let guess = if diag.mid.is_finite() && (min..=max).contains(&diag.mid) {
        diag.mid
    } else {
        (min + max) / 2.0
    };
    BFactorBounds { min, guess, max }
}
