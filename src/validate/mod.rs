//! Post-fit sanity checks.
//!
//! Six independent tests run over a completed fit: time origin, first-point
//! alignment, decline trend, goodness of fit, parameter reasonableness, and
//! residual bias. Each produces a per-test record; failures become warnings
//! (or errors for structurally broken inputs) and flip `overall_pass`. The
//! validator holds no state, so a report always describes exactly one fit.
//!
//! In strict mode a failed report is promoted to a `ValidationFailure` error
//! carrying the accumulated messages.

use serde::{Deserialize, Serialize};

use crate::domain::DeclineParameters;
use crate::error::CoreError;
use crate::math::{goodness_of_fit, mean, std_dev};

/// Thresholds for the six validation tests. Every value is a judgment call
/// inherited from the analytics workflow, so all of them are overridable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationThresholds {
    /// |t[0]| above this fails the time-origin test.
    pub time_zero_tolerance: f64,
    /// Relative first-point error above this fails the alignment test.
    pub first_point_fail: f64,
    /// Relative first-point error above this (but below fail) only warns.
    pub first_point_warn: f64,
    /// Month-over-month predicted increase ratio tolerated as noise.
    pub monthly_increase_tolerance: f64,
    /// R-squared below this fails the goodness-of-fit test.
    pub r_squared_acceptable: f64,
    /// R-squared below this (but above acceptable) warns.
    pub r_squared_good: f64,
    /// |mean residual| above this multiple of the residual std fails the
    /// bias test.
    pub bias_ratio: f64,
    /// Upper b-factor bound for parameter reasonableness.
    pub max_b_factor: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            time_zero_tolerance: 0.01,
            first_point_fail: 0.15,
            first_point_warn: 0.10,
            monthly_increase_tolerance: 1.05,
            r_squared_acceptable: 0.70,
            r_squared_good: 0.85,
            bias_ratio: 0.5,
            max_b_factor: 2.0,
        }
    }
}

/// Outcome of the first-point alignment test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirstPointTest {
    pub pass: bool,
    /// |q_pred(0) - q_act(0)| / q_act(0).
    pub relative_error: f64,
}

/// Outcome of the decline-trend test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclineTrendTest {
    pub pass: bool,
    /// Indices where the prediction rose beyond the noise tolerance.
    pub increase_indices: Vec<usize>,
}

/// Outcome of the goodness-of-fit test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoodnessTest {
    pub pass: bool,
    pub r_squared: f64,
    pub rmse: f64,
    pub mae: f64,
}

/// Outcome of the parameter-reasonableness test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTest {
    pub pass: bool,
    pub issues: Vec<String>,
}

/// Outcome of the residual-bias test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualTest {
    pub pass: bool,
    pub mean_residual: f64,
    pub std_residual: f64,
}

/// Full validation report for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub time_starts_at_zero: bool,
    pub first_point: FirstPointTest,
    pub decline_trend: DeclineTrendTest,
    pub goodness_of_fit: GoodnessTest,
    pub parameters: ParameterTest,
    pub residuals: ResidualTest,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub overall_pass: bool,
}

/// Run all six tests over a completed fit.
///
/// `t_act`/`q_act` are the fitted series, `q_pred` the model rates at the
/// same offsets. Never fails in itself; structural problems (empty arrays,
/// mismatched lengths) are recorded as report errors. Use
/// [`validate_fit_strict`] to turn a failed report into an error.
pub fn validate_fit(
    t_act: &[f64],
    q_act: &[f64],
    q_pred: &[f64],
    params: &DeclineParameters,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    // Test 1: the model identity q(0) = Qi only holds if time starts at 0.
    let time_starts_at_zero = match t_act.first() {
        None => {
            errors.push("time array is empty".to_string());
            false
        }
        Some(&t0) if t0.abs() > thresholds.time_zero_tolerance => {
            errors.push(format!(
                "time array does not start at 0 (t[0]={t0:.4}); q(0)=Qi does not hold"
            ));
            false
        }
        Some(_) => true,
    };

    // Test 2: first predicted point against first actual point.
    let first_point = match (q_act.first(), q_pred.first()) {
        (Some(&a), Some(&p)) if a > 0.0 => {
            let relative_error = (p - a).abs() / a;
            let pass = relative_error <= thresholds.first_point_fail;
            if !pass {
                warnings.push(format!(
                    "first point misaligned: q_pred(0)={p:.2}, q_act(0)={a:.2}, error={:.1}%",
                    relative_error * 100.0
                ));
            } else if relative_error > thresholds.first_point_warn {
                warnings.push(format!(
                    "first point alignment acceptable but not ideal: error={:.1}%",
                    relative_error * 100.0
                ));
            }
            FirstPointTest {
                pass,
                relative_error,
            }
        }
        _ => {
            errors.push("empty or non-positive rate arrays".to_string());
            FirstPointTest {
                pass: false,
                relative_error: f64::INFINITY,
            }
        }
    };

    // Test 3: predictions should not rise beyond the noise tolerance.
    // Fewer than 2 points cannot exhibit a trend, so they pass.
    let mut increase_indices = Vec::new();
    for i in 1..q_pred.len() {
        if q_pred[i] > q_pred[i - 1] * thresholds.monthly_increase_tolerance {
            increase_indices.push(i);
        }
    }
    if !increase_indices.is_empty() {
        warnings.push(format!(
            "predicted rates increased at {} points (expected monotonic decline)",
            increase_indices.len()
        ));
    }
    let decline_trend = DeclineTrendTest {
        pass: increase_indices.is_empty(),
        increase_indices,
    };

    // Test 4: R-squared with RMSE/MAE alongside.
    let gof = goodness_of_fit(q_act, q_pred);
    let goodness_pass = gof.r_squared > thresholds.r_squared_acceptable;
    if !goodness_pass {
        warnings.push(format!(
            "poor fit: R²={:.3} (expected >{:.2})",
            gof.r_squared, thresholds.r_squared_acceptable
        ));
    } else if gof.r_squared < thresholds.r_squared_good {
        warnings.push(format!(
            "acceptable fit: R²={:.3} (good fit is >{:.2})",
            gof.r_squared, thresholds.r_squared_good
        ));
    }
    let goodness_of_fit = GoodnessTest {
        pass: goodness_pass,
        r_squared: gof.r_squared,
        rmse: gof.rmse,
        mae: gof.mae,
    };

    // Test 5: fitted parameters inside the physical envelope. The
    // constructor already enforces most of this; re-checking here catches
    // parameter sets assembled by other means.
    let mut issues = Vec::new();
    if params.qi <= 0.0 {
        issues.push(format!("Qi={:.2} must be positive", params.qi));
    }
    if !(0.0..=1.0).contains(&params.dei) {
        issues.push(format!("Dei={:.4} outside valid range [0, 1]", params.dei));
    }
    if params.b < 0.0 || params.b > thresholds.max_b_factor {
        issues.push(format!(
            "b={:.4} outside typical range [0, {}]",
            params.b, thresholds.max_b_factor
        ));
    }
    if params.dei < params.def_ {
        issues.push(format!(
            "Dei={:.4} < Def={:.4} (initial decline should exceed terminal)",
            params.dei, params.def_
        ));
    }
    warnings.extend(issues.iter().cloned());
    let parameters = ParameterTest {
        pass: issues.is_empty(),
        issues,
    };

    // Test 6: a mean residual well away from zero relative to the residual
    // spread indicates the curve sits systematically above or below the data.
    let residual_values: Vec<f64> = q_act
        .iter()
        .zip(q_pred.iter())
        .map(|(&a, &p)| a - p)
        .collect();
    let mean_residual = mean(&residual_values);
    let std_residual = std_dev(&residual_values);
    let biased = mean_residual.abs() > std_residual * thresholds.bias_ratio;
    if biased {
        warnings.push(format!(
            "systematic bias detected: mean residual={mean_residual:.2}, std={std_residual:.2}"
        ));
    }
    let residuals = ResidualTest {
        pass: !biased,
        mean_residual,
        std_residual,
    };

    let overall_pass = time_starts_at_zero
        && first_point.pass
        && decline_trend.pass
        && goodness_of_fit.pass
        && parameters.pass
        && residuals.pass;

    ValidationReport {
        time_starts_at_zero,
        first_point,
        decline_trend,
        goodness_of_fit,
        parameters,
        residuals,
        warnings,
        errors,
        overall_pass,
    }
}

/// Strict variant: a failed report becomes a `ValidationFailure` error
/// carrying every warning and error message.
pub fn validate_fit_strict(
    t_act: &[f64],
    q_act: &[f64],
    q_pred: &[f64],
    params: &DeclineParameters,
    thresholds: &ValidationThresholds,
) -> Result<ValidationReport, CoreError> {
    let report = validate_fit(t_act, q_act, q_pred, params, thresholds);
    if report.overall_pass {
        return Ok(report);
    }
    let mut messages = report.errors.clone();
    messages.extend(report.warnings.iter().cloned());
    Err(CoreError::validation(format!(
        "fit validation failed: {}",
        messages.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::predict_rates;

    fn good_fit() -> (Vec<f64>, Vec<f64>, Vec<f64>, DeclineParameters) {
        let p = DeclineParameters::new(600.0, 0.45, 0.06, 0.9).unwrap();
        let t: Vec<f64> = (0..36).map(|i| i as f64).collect();
        let q_pred = predict_rates(&p, &t);
        // Small alternating perturbation: unbiased, high R².
        let q_act: Vec<f64> = q_pred
            .iter()
            .enumerate()
            .map(|(i, &v)| v * if i % 2 == 0 { 1.01 } else { 0.99 })
            .collect();
        (t, q_act, q_pred, p)
    }

    #[test]
    fn good_fit_passes_everything() {
        let (t, q_act, q_pred, p) = good_fit();
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(report.overall_pass, "warnings: {:?}", report.warnings);
        assert!(report.errors.is_empty());
        assert!(report.goodness_of_fit.r_squared > 0.99);
    }

    #[test]
    fn nonzero_time_origin_is_an_error() {
        let (mut t, q_act, q_pred, p) = good_fit();
        for v in t.iter_mut() {
            *v += 3.0;
        }
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(!report.time_starts_at_zero);
        assert!(!report.overall_pass);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn misaligned_first_point_fails() {
        let (t, mut q_act, q_pred, p) = good_fit();
        q_act[0] = q_pred[0] * 2.0;
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(!report.first_point.pass);
        assert!(!report.overall_pass);
    }

    #[test]
    fn slightly_off_first_point_only_warns() {
        let (t, mut q_act, q_pred, p) = good_fit();
        q_act[0] = q_pred[0] * 1.12;
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(report.first_point.pass);
        assert!(report.warnings.iter().any(|w| w.contains("not ideal")));
    }

    #[test]
    fn rising_prediction_fails_trend() {
        let (t, q_act, mut q_pred, p) = good_fit();
        q_pred[10] = q_pred[9] * 1.5;
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(!report.decline_trend.pass);
        assert_eq!(report.decline_trend.increase_indices, vec![10]);
    }

    #[test]
    fn poor_r_squared_fails_goodness() {
        let (t, q_act, _, p) = good_fit();
        let q_pred = vec![1.0; q_act.len()];
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(!report.goodness_of_fit.pass);
        assert!(!report.overall_pass);
    }

    #[test]
    fn out_of_range_b_fails_parameters() {
        let (t, q_act, q_pred, _) = good_fit();
        let p = DeclineParameters::new(600.0, 0.45, 0.06, 2.5).unwrap();
        let report = validate_fit(&t, &q_act, &q_pred, &p, &ValidationThresholds::default());
        assert!(!report.parameters.pass);
        assert_eq!(report.parameters.issues.len(), 1);
    }

    #[test]
    fn systematic_offset_fails_bias() {
        let (t, q_act, q_pred, p) = good_fit();
        // Shift every prediction up; residual mean dominates its spread.
        let shifted: Vec<f64> = q_pred.iter().map(|&v| v + 50.0).collect();
        let report = validate_fit(&t, &q_act, &shifted, &p, &ValidationThresholds::default());
        assert!(!report.residuals.pass);
    }

    #[test]
    fn short_series_passes_trend_test() {
        let p = DeclineParameters::new(100.0, 0.3, 0.08, 0.9).unwrap();
        let report = validate_fit(&[0.0], &[100.0], &[100.0], &p, &ValidationThresholds::default());
        assert!(report.decline_trend.pass);
    }

    #[test]
    fn strict_mode_promotes_failure_to_error() {
        let (t, q_act, _, p) = good_fit();
        let q_pred = vec![1.0; q_act.len()];
        let err =
            validate_fit_strict(&t, &q_act, &q_pred, &p, &ValidationThresholds::default())
                .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailure);
    }

    #[test]
    fn strict_mode_passes_good_fit_through() {
        let (t, q_act, q_pred, p) = good_fit();
        let report =
            validate_fit_strict(&t, &q_act, &q_pred, &p, &ValidationThresholds::default()).unwrap();
        assert!(report.overall_pass);
    }
}
