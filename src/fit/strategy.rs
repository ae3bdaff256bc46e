//! Strategy selection: which fit a series can actually support.
//!
//! The cascade runs once per well, in order:
//!
//! 1. first rate below the abandonment threshold, or fewer than 3 points:
//!    degenerate record straight from the guesses, no optimization.
//! 2. fewer than 7 points: single-parameter fit (only Dei free).
//! 3. otherwise: full optimization of {Dei, b} on the smoothed series with
//!    Qi pinned to the smoothed first point.
//!
//! Optimizer failure falls through to the next-simpler strategy and the
//! reason is recorded on the output, so a batch run can report why a well
//! ended up with a simpler fit. Qi is never a free parameter here: with
//! time starting at zero the first point is the model value at the origin,
//! so optimizing it only lets the curve detach from the data.

use crate::domain::{BFactorBounds, DeclineParameters, DeclinePresets, FitMethod, FitType, ProductionSeries};
use crate::error::CoreError;
use crate::fit::config::{FitConfiguration, ParamSetting};
use crate::fit::fitter::perform_curve_fit;
use crate::math::{GoodnessOfFit, goodness_of_fit, smooth};
use crate::models::predict_rates;

/// Below this many points no optimization runs at all.
const MIN_POINTS_ANY_FIT: usize = 3;

/// Below this many points only the single-parameter fit runs.
const MIN_POINTS_FULL_FIT: usize = 7;

/// Optimizer settings shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyOptions {
    pub method: FitMethod,
    /// Sampling/generation budget for the stochastic methods.
    pub trials: usize,
    /// Rolling-mean passes applied before the full fit.
    pub smoothing_passes: usize,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            method: FitMethod::CurveFit,
            trials: 400,
            smoothing_passes: 2,
        }
    }
}

/// A completed strategy run.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFit {
    pub params: DeclineParameters,
    pub fit_type: FitType,
    /// First observed rate before smoothing.
    pub q_guess: f64,
    /// Undefined for degenerate fits.
    pub metrics: Option<GoodnessOfFit>,
    /// Model rates at the input offsets.
    pub predicted: Vec<f64>,
    /// Why simpler strategies were used, newest last. Empty when the first
    /// eligible strategy succeeded.
    pub fallbacks: Vec<String>,
}

/// Outcome of one strategy attempt. Fallback is an expected result, not an
/// error, so the cascade is a plain match rather than error-driven control
/// flow.
pub enum AttemptOutcome {
    Fitted(Box<StrategyFit>),
    Fallback(String),
}

/// Run the cascade over a prepared series.
pub fn select_strategy(
    series: &ProductionSeries,
    presets: &DeclinePresets,
    b_bounds: &BFactorBounds,
    options: &StrategyOptions,
) -> Result<StrategyFit, CoreError> {
    let t = series.t();
    let q = series.q();
    let first_rate = match q.first() {
        Some(&v) => v,
        None => {
            return Err(CoreError::data_insufficiency(
                "cannot fit an empty series",
            ));
        }
    };

    let mut fallbacks = Vec::new();

    if first_rate < presets.abandonment_rate {
        fallbacks.push(format!(
            "first rate {first_rate:.2} below abandonment threshold {:.2}",
            presets.abandonment_rate
        ));
        return degenerate_fit(t, q, presets, b_bounds, fallbacks);
    }
    if q.len() < MIN_POINTS_ANY_FIT {
        fallbacks.push(format!(
            "{} points is too few for any optimization",
            q.len()
        ));
        return degenerate_fit(t, q, presets, b_bounds, fallbacks);
    }

    if q.len() >= MIN_POINTS_FULL_FIT {
        match full_optimize(t, q, presets, b_bounds, options)? {
            AttemptOutcome::Fitted(fit) => {
                let mut fit = *fit;
                fit.fallbacks = fallbacks;
                return Ok(fit);
            }
            AttemptOutcome::Fallback(reason) => fallbacks.push(reason),
        }
    } else {
        fallbacks.push(format!(
            "{} points is too few for the full fit (need {MIN_POINTS_FULL_FIT})",
            q.len()
        ));
    }

    match single_parameter(t, q, presets, b_bounds, options)? {
        AttemptOutcome::Fitted(fit) => {
            let mut fit = *fit;
            fit.fallbacks = fallbacks;
            Ok(fit)
        }
        AttemptOutcome::Fallback(reason) => {
            fallbacks.push(reason);
            degenerate_fit(t, q, presets, b_bounds, fallbacks)
        }
    }
}

/// Full fit: smooth the rates, pin Qi to the smoothed first point, optimize
/// {Dei, b}. Metrics are computed against the smoothed series the optimizer
/// saw. Also used directly by the aggregate-curve builder, which skips the
/// data-sufficiency cascade.
pub fn full_optimize(
    t: &[f64],
    q: &[f64],
    presets: &DeclinePresets,
    b_bounds: &BFactorBounds,
    options: &StrategyOptions,
) -> Result<AttemptOutcome, CoreError> {
    let smoothed = smooth(q, options.smoothing_passes);
    let qi = smoothed[0];

    let config = FitConfiguration::new(
        ParamSetting::Fixed(qi),
        ParamSetting::Free {
            low: presets.initial_decline.min,
            high: presets.initial_decline.max,
            guess: presets.initial_decline.guess,
        },
        ParamSetting::Fixed(presets.terminal_decline),
        ParamSetting::Free {
            low: b_bounds.min,
            high: b_bounds.max,
            guess: b_bounds.guess,
        },
    )?;

    match perform_curve_fit(t, &smoothed, &config, options.method, options.trials) {
        Ok(free) => {
            let params = config.assemble(&free)?;
            let predicted = predict_rates(&params, t);
            let metrics = goodness_of_fit(&smoothed, &predicted);
            Ok(AttemptOutcome::Fitted(Box::new(StrategyFit {
                params,
                fit_type: FitType::FullOptimize,
                q_guess: q[0],
                metrics: Some(metrics),
                predicted,
                fallbacks: Vec::new(),
            })))
        }
        Err(e) => Ok(AttemptOutcome::Fallback(format!("full fit failed: {e}"))),
    }
}

/// Short-series fit: only Dei is free; Qi is the raw first point and b stays
/// at its guess.
fn single_parameter(
    t: &[f64],
    q: &[f64],
    presets: &DeclinePresets,
    b_bounds: &BFactorBounds,
    options: &StrategyOptions,
) -> Result<AttemptOutcome, CoreError> {
    let config = FitConfiguration::new(
        ParamSetting::Fixed(q[0]),
        ParamSetting::Free {
            low: presets.initial_decline.min,
            high: presets.initial_decline.max,
            guess: presets.initial_decline.guess,
        },
        ParamSetting::Fixed(presets.terminal_decline),
        ParamSetting::Fixed(b_bounds.guess),
    )?;

    match perform_curve_fit(t, q, &config, options.method, options.trials) {
        Ok(free) => {
            let params = config.assemble(&free)?;
            let predicted = predict_rates(&params, t);
            let metrics = goodness_of_fit(q, &predicted);
            Ok(AttemptOutcome::Fitted(Box::new(StrategyFit {
                params,
                fit_type: FitType::SingleParameter,
                q_guess: q[0],
                metrics: Some(metrics),
                predicted,
                fallbacks: Vec::new(),
            })))
        }
        Err(e) => Ok(AttemptOutcome::Fallback(format!(
            "single-parameter fit failed: {e}"
        ))),
    }
}

/// Terminal rung of the cascade: parameters straight from the guesses.
fn degenerate_fit(
    t: &[f64],
    q: &[f64],
    presets: &DeclinePresets,
    b_bounds: &BFactorBounds,
    fallbacks: Vec<String>,
) -> Result<StrategyFit, CoreError> {
    let qi = match q.first() {
        Some(&v) => v,
        None => {
            return Err(CoreError::data_insufficiency(
                "cannot fit an empty series",
            ));
        }
    };
    let dei = presets
        .initial_decline
        .guess
        .max(presets.terminal_decline);
    let params = DeclineParameters::new(qi, dei, presets.terminal_decline, b_bounds.guess)?;
    let predicted = predict_rates(&params, t);
    Ok(StrategyFit {
        params,
        fit_type: FitType::Degenerate,
        q_guess: qi,
        metrics: None,
        predicted,
        fallbacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Measure;

    fn series_from(params: &DeclineParameters, months: usize) -> ProductionSeries {
        let t: Vec<f64> = (0..months).map(|i| i as f64).collect();
        let q = predict_rates(params, &t);
        ProductionSeries::new(t, q).unwrap()
    }

    fn oil_presets() -> DeclinePresets {
        DeclinePresets::for_measure(Measure::Oil)
    }

    #[test]
    fn long_clean_series_gets_full_fit() {
        let truth = DeclineParameters::new(600.0, 0.45, 0.08, 0.9).unwrap();
        let series = series_from(&truth, 36);
        let presets = oil_presets();
        // No smoothing so the optimizer sees the exact model curve.
        let options = StrategyOptions {
            smoothing_passes: 0,
            ..StrategyOptions::default()
        };
        let fit =
            select_strategy(&series, &presets, &presets.default_b, &options).unwrap();
        assert_eq!(fit.fit_type, FitType::FullOptimize);
        assert!(fit.fallbacks.is_empty());
        assert!((fit.params.dei - 0.45).abs() / 0.45 < 0.01);
        assert!((fit.params.b - 0.9).abs() / 0.9 < 0.01);
        assert!(fit.metrics.unwrap().r_squared > 0.999);
        assert_eq!(fit.q_guess, series.q()[0]);
    }

    #[test]
    fn smoothing_keeps_qi_at_first_point() {
        let truth = DeclineParameters::new(600.0, 0.45, 0.08, 0.9).unwrap();
        let series = series_from(&truth, 36);
        let presets = oil_presets();
        let fit = select_strategy(
            &series,
            &presets,
            &presets.default_b,
            &StrategyOptions::default(),
        )
        .unwrap();
        // The trailing rolling mean leaves the first point alone, so the
        // pinned Qi equals the raw first rate even with smoothing on.
        assert_eq!(fit.params.qi, series.q()[0]);
        assert_eq!(fit.fit_type, FitType::FullOptimize);
        assert!(fit.metrics.unwrap().r_squared > 0.98);
    }

    #[test]
    fn short_series_gets_single_parameter_fit() {
        let truth = DeclineParameters::new(400.0, 0.35, 0.08, 0.9).unwrap();
        let series = series_from(&truth, 5);
        let presets = oil_presets();
        let fit = select_strategy(
            &series,
            &presets,
            &presets.default_b,
            &StrategyOptions::default(),
        )
        .unwrap();
        assert_eq!(fit.fit_type, FitType::SingleParameter);
        assert_eq!(fit.params.qi, 400.0);
        assert_eq!(fit.params.b, presets.default_b.guess);
        assert!((fit.params.dei - 0.35).abs() < 0.05);
        assert_eq!(fit.fallbacks.len(), 1);
    }

    #[test]
    fn two_points_get_degenerate_fit() {
        let series = ProductionSeries::new(vec![0.0, 1.0], vec![100.0, 90.0]).unwrap();
        let presets = oil_presets();
        let fit = select_strategy(
            &series,
            &presets,
            &presets.default_b,
            &StrategyOptions::default(),
        )
        .unwrap();
        assert_eq!(fit.fit_type, FitType::Degenerate);
        assert_eq!(fit.params.qi, 100.0);
        assert_eq!(fit.params.dei, presets.initial_decline.guess);
        assert!(fit.metrics.is_none());
        assert!(!fit.fallbacks.is_empty());
    }

    #[test]
    fn abandonment_rate_forces_degenerate_even_with_history() {
        let t: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let q = vec![1.5; 24];
        let series = ProductionSeries::new(t, q).unwrap();
        let presets = oil_presets();
        let fit = select_strategy(
            &series,
            &presets,
            &presets.default_b,
            &StrategyOptions::default(),
        )
        .unwrap();
        assert_eq!(fit.fit_type, FitType::Degenerate);
        assert!(fit.fallbacks[0].contains("abandonment"));
    }

    #[test]
    fn stochastic_methods_run_through_the_cascade() {
        let truth = DeclineParameters::new(600.0, 0.45, 0.08, 0.9).unwrap();
        let series = series_from(&truth, 36);
        let presets = oil_presets();
        for method in [FitMethod::MonteCarlo, FitMethod::DifferentialEvolution] {
            let options = StrategyOptions {
                method,
                trials: 600,
                smoothing_passes: 0,
            };
            let fit =
                select_strategy(&series, &presets, &presets.default_b, &options).unwrap();
            assert_eq!(fit.fit_type, FitType::FullOptimize);
            assert!((fit.params.dei - 0.45).abs() < 0.1);
        }
    }
}
