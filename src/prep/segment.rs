//! Regime segmentation via penalized changepoint detection.
//!
//! Workovers, choke changes, and refracs show up as structural breaks in the
//! rate trajectory. We partition the series into contiguous segments, each
//! modeled as a linear trend in log rate, using an optimal-partitioning
//! dynamic program: each additional changepoint must reduce the within-
//! segment squared error by more than `penalty`. A declining well is close
//! to linear in log space, so ordinary decline (including its curvature)
//! stays in one segment and only level or slope breaks pay for a split.
//! Labels are increasing integer segment ids, one per point.
//!
//! Segment selection for fitting: grow from the first (or last) segment,
//! absorbing neighbors until the minimum fit length is covered; series that
//! cannot reach the minimum fall back to the full range.

use crate::domain::SegmentPolicy;
use crate::error::CoreError;

/// Minimum points per segment; breaks closer together than this are noise.
const MIN_SEGMENT_LEN: usize = 2;

/// Label each point with a segment id (0, 1, 2, ... in time order).
///
/// `penalty` is the cost (in log-rate squared-error units) a new changepoint
/// must pay; higher values mean fewer segments.
pub fn detect_changepoints(t: &[f64], q: &[f64], penalty: f64) -> Result<Vec<usize>, CoreError> {
    if t.len() != q.len() {
        return Err(CoreError::configuration(format!(
            "time/rate length mismatch: {} vs {}",
            t.len(),
            q.len()
        )));
    }
    if q.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
        return Err(CoreError::configuration(
            "changepoint detection requires positive finite rates",
        ));
    }
    if !(penalty.is_finite() && penalty >= 0.0) {
        return Err(CoreError::configuration(format!(
            "changepoint penalty must be non-negative, got {penalty}"
        )));
    }

    let n = q.len();
    if n < 2 * MIN_SEGMENT_LEN {
        return Ok(vec![0; n]);
    }

    let y: Vec<f64> = q.iter().map(|&v| v.ln()).collect();

    // Prefix sums for O(1) segment cost: SSE of [i, j) around its own
    // least-squares line y = a + b*t.
    let mut s_t = vec![0.0; n + 1];
    let mut s_tt = vec![0.0; n + 1];
    let mut s_y = vec![0.0; n + 1];
    let mut s_yy = vec![0.0; n + 1];
    let mut s_ty = vec![0.0; n + 1];
    for i in 0..n {
        s_t[i + 1] = s_t[i] + t[i];
        s_tt[i + 1] = s_tt[i] + t[i] * t[i];
        s_y[i + 1] = s_y[i] + y[i];
        s_yy[i + 1] = s_yy[i] + y[i] * y[i];
        s_ty[i + 1] = s_ty[i] + t[i] * y[i];
    }
    let seg_cost = |i: usize, j: usize| -> f64 {
        let len = (j - i) as f64;
        let st = s_t[j] - s_t[i];
        let sy = s_y[j] - s_y[i];
        let sxx = (s_tt[j] - s_tt[i]) - st * st / len;
        let sxy = (s_ty[j] - s_ty[i]) - st * sy / len;
        let syy = (s_yy[j] - s_yy[i]) - sy * sy / len;
        if sxx > 1e-12 {
            (syy - sxy * sxy / sxx).max(0.0)
        } else {
            // Coincident time offsets; fall back to the spread around the
            // mean.
            syy.max(0.0)
        }
    };

    // Optimal partitioning: best[j] = min over i of best[i] + cost(i, j) +
    // penalty. O(n^2), fine for monthly series.
    let mut best = vec![f64::INFINITY; n + 1];
    let mut prev = vec![0usize; n + 1];
    best[0] = -penalty;
    for j in MIN_SEGMENT_LEN..=n {
        for i in 0..=(j - MIN_SEGMENT_LEN) {
            if i != 0 && i < MIN_SEGMENT_LEN {
                continue;
            }
            let candidate = best[i] + seg_cost(i, j) + penalty;
            if candidate < best[j] {
                best[j] = candidate;
                prev[j] = i;
            }
        }
    }

    // Walk back from the end to recover the breakpoints.
    let mut boundaries = Vec::new();
    let mut j = n;
    while j > 0 {
        boundaries.push(j);
        j = prev[j];
    }
    boundaries.reverse();

    let mut labels = vec![0usize; n];
    let mut start = 0;
    for (seg_id, &end) in boundaries.iter().enumerate() {
        for label in labels.iter_mut().take(end).skip(start) {
            *label = seg_id;
        }
        start = end;
    }
    Ok(labels)
}

/// Pick the index range `[start, end)` to fit, given segment labels.
///
/// When the whole series is shorter than `min_fit_points` no segmentation is
/// applied and the full range is returned.
pub fn select_segment(
    labels: &[usize],
    policy: SegmentPolicy,
    min_fit_points: usize,
) -> (usize, usize) {
    let n = labels.len();
    let min_fit_points = min_fit_points.max(1);
    if n <= min_fit_points {
        return (0, n);
    }
    let last_segment = match labels.last() {
        Some(&id) => id,
        None => return (0, 0),
    };

    match policy {
        SegmentPolicy::First => {
            // Absorb segments forward until the cumulative length suffices.
            let mut segment = 0;
            let mut end = 0;
            while end < n && end < min_fit_points && segment <= last_segment {
                end = labels.iter().rposition(|&l| l == segment).map_or(end, |p| p + 1);
                segment += 1;
            }
            if end < min_fit_points { (0, n) } else { (0, end) }
        }
        SegmentPolicy::Last => {
            let mut segment = last_segment as isize;
            let mut start = n;
            while start > 0 && (n - start) < min_fit_points && segment >= 0 {
                start = labels
                    .iter()
                    .position(|&l| l == segment as usize)
                    .unwrap_or(start);
                segment -= 1;
            }
            if n - start < min_fit_points { (0, n) } else { (start, n) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_series() -> (Vec<f64>, Vec<f64>) {
        // 12 months around 100, then a sharp step down to around 30.
        let t: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let mut q = Vec::new();
        for i in 0..24 {
            if i < 12 {
                q.push(100.0 - i as f64 * 0.5);
            } else {
                q.push(30.0 - (i - 12) as f64 * 0.3);
            }
        }
        (t, q)
    }

    #[test]
    fn step_change_splits_into_two_segments() {
        let (t, q) = step_series();
        let labels = detect_changepoints(&t, &q, 1.0).unwrap();
        assert_eq!(labels.len(), 24);
        assert_eq!(labels[0], 0);
        assert_eq!(labels[11], 0);
        assert_eq!(labels[12], 1);
        assert_eq!(labels[23], 1);
    }

    #[test]
    fn smooth_decline_is_one_segment() {
        // Hyperbolic decline curves in log space, but curvature is not a
        // regime break; the default penalty must keep it whole.
        use crate::domain::DeclineParameters;
        use crate::models::predict_rates;
        let t: Vec<f64> = (0..36).map(|i| i as f64).collect();
        let p = DeclineParameters::new(600.0, 0.45, 0.08, 0.9).unwrap();
        let q = predict_rates(&p, &t);
        let labels = detect_changepoints(&t, &q, 1.0).unwrap();
        assert!(
            labels.iter().all(|&l| l == 0),
            "smooth decline split into {} segments",
            labels.last().map_or(0, |&l| l + 1)
        );
    }

    #[test]
    fn slope_break_without_level_jump_is_detected() {
        // Constant level for a year, then a steep exponential decline; the
        // break is in slope only.
        let t: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let q: Vec<f64> = t
            .iter()
            .map(|&m| {
                if m < 12.0 {
                    200.0
                } else {
                    200.0 * (-0.25 * (m - 12.0)).exp()
                }
            })
            .collect();
        let labels = detect_changepoints(&t, &q, 1.0).unwrap();
        assert!(labels.last().copied().unwrap_or(0) >= 1);
        assert_eq!(labels[0], labels[11]);
    }

    #[test]
    fn flat_series_is_one_segment() {
        let t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let q = vec![50.0; 20];
        let labels = detect_changepoints(&t, &q, 1.0).unwrap();
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn huge_penalty_suppresses_changepoints() {
        let (t, q) = step_series();
        let labels = detect_changepoints(&t, &q, 1e6).unwrap();
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn select_first_grows_until_minimum() {
        // Segments of length 5, 4, and 15.
        let mut labels = vec![0; 5];
        labels.extend(vec![1; 4]);
        labels.extend(vec![2; 15]);
        let (start, end) = select_segment(&labels, SegmentPolicy::First, 12);
        assert_eq!(start, 0);
        // 5 + 4 < 12, so segment 2 is absorbed too.
        assert_eq!(end, 24);
    }

    #[test]
    fn select_last_grows_backward() {
        let mut labels = vec![0; 15];
        labels.extend(vec![1; 4]);
        labels.extend(vec![2; 5]);
        let (start, end) = select_segment(&labels, SegmentPolicy::Last, 12);
        assert_eq!(end, 24);
        // 5 + 4 < 12, so segment 0 is absorbed from the back.
        assert_eq!(start, 0);
    }

    #[test]
    fn select_last_stops_when_satisfied() {
        let mut labels = vec![0; 10];
        labels.extend(vec![1; 14]);
        let (start, end) = select_segment(&labels, SegmentPolicy::Last, 12);
        assert_eq!((start, end), (10, 24));
    }

    #[test]
    fn short_series_uses_full_range() {
        let labels = vec![0, 0, 1, 1, 1];
        assert_eq!(select_segment(&labels, SegmentPolicy::First, 12), (0, 5));
        assert_eq!(select_segment(&labels, SegmentPolicy::Last, 12), (0, 5));
    }
}
