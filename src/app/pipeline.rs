//! Per-well analysis pipeline and the parallel batch driver.
//!
//! One well flows through:
//!
//! 1. drop non-positive rates, sort by date, merge same-month records
//! 2. calendar month offsets from the first kept record
//! 3. optional Bourdet outlier rejection
//! 4. optional b-factor diagnostics (preset bounds on insufficiency)
//! 5. optional changepoint detection and segment selection
//! 6. re-index the selected segment to consecutive offsets starting at 0
//! 7. strategy cascade, then validation for every non-degenerate fit
//!
//! The re-indexing in step 6 matters: gaps in the production history would
//! otherwise let the model coast through months the well was shut in, and
//! the q(0) = Qi identity requires the fitted window to start at zero.
//!
//! The batch driver runs wells in parallel and never aborts the run: a well
//! that cannot be processed yields a `no_data` sentinel row with the reason
//! attached.

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;

use crate::domain::{
    DeclinePresets, FitMethod, FitRecord, FitType, ProductionSeries, SegmentPolicy, WellSeries,
};
use crate::error::CoreError;
use crate::fit::strategy::{StrategyOptions, select_strategy};
use crate::prep::bfactor::{BFactorLimits, b_factor_diagnostics, clamp_b_bounds};
use crate::prep::outliers::{OutlierOptions, bourdet_filter};
use crate::prep::segment::{detect_changepoints, select_segment};
use crate::validate::{ValidationReport, ValidationThresholds, validate_fit, validate_fit_strict};

/// Everything tunable about a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    pub method: FitMethod,
    /// Sampling/generation budget for the stochastic fit methods.
    pub trials: usize,
    /// Rolling-mean passes before the full fit.
    pub smoothing_passes: usize,
    /// Which end of the history the fit anchors on.
    pub segment_policy: SegmentPolicy,
    /// Minimum points the selected segment should cover.
    pub min_fit_points: usize,
    pub filter_outliers: bool,
    pub outlier: OutlierOptions,
    pub detect_changepoints: bool,
    /// Penalty per changepoint, in log-rate squared-error units.
    pub changepoint_penalty: f64,
    /// Replace preset b bounds with loss-ratio diagnostics when possible.
    pub estimate_b: bool,
    /// Global clamp range for diagnostic b bounds.
    pub b_limits: BFactorLimits,
    pub thresholds: ValidationThresholds,
    /// Promote validation failures to errors.
    pub strict_validation: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            method: FitMethod::CurveFit,
            trials: 400,
            smoothing_passes: 2,
            segment_policy: SegmentPolicy::First,
            min_fit_points: 12,
            filter_outliers: true,
            outlier: OutlierOptions::default(),
            detect_changepoints: true,
            changepoint_penalty: 1.0,
            estimate_b: true,
            b_limits: BFactorLimits::default(),
            thresholds: ValidationThresholds::default(),
            strict_validation: false,
        }
    }
}

/// One fully processed well.
#[derive(Debug, Clone, PartialEq)]
pub struct WellFit {
    pub record: FitRecord,
    /// Absent for degenerate and no-data rows.
    pub validation: Option<ValidationReport>,
    /// Model rates at the fitted offsets.
    pub predicted: Vec<f64>,
    /// Cascade fallback reasons and, for sentinel rows, the failure message.
    pub fallbacks: Vec<String>,
}

/// Run the full pipeline for one well.
///
/// Pass `presets: None` to use the per-measure defaults.
pub fn process_well(
    well: &WellSeries,
    presets: Option<&DeclinePresets>,
    options: &AnalysisOptions,
) -> Result<WellFit, CoreError> {
    let defaults = DeclinePresets::for_measure(well.measure);
    let presets = presets.unwrap_or(&defaults);

    if well.dates.len() != well.rates.len() {
        return Err(CoreError::configuration(format!(
            "well {}: {} dates vs {} rates",
            well.well_id,
            well.dates.len(),
            well.rates.len()
        )));
    }

    // Clean: positive finite rates only, in date order, one record per
    // calendar month (same-month records are averaged).
    let mut kept: Vec<(NaiveDate, f64)> = well
        .dates
        .iter()
        .zip(well.rates.iter())
        .filter(|&(_, &r)| r.is_finite() && r > 0.0)
        .map(|(&d, &r)| (d, r))
        .collect();
    kept.sort_by_key(|&(d, _)| d);
    if kept.is_empty() {
        return Err(CoreError::data_insufficiency(format!(
            "well {}: no positive rates",
            well.well_id
        )));
    }

    let first_date = kept[0].0;
    let mut months: Vec<(f64, NaiveDate, f64, usize)> = Vec::new();
    for (date, rate) in kept {
        let offset = month_offset(first_date, date);
        match months.last_mut() {
            Some(last) if last.0 == offset => {
                last.2 += rate;
                last.3 += 1;
            }
            _ => months.push((offset, date, rate, 1)),
        }
    }
    let dated: Vec<(f64, NaiveDate)> = months.iter().map(|&(o, d, _, _)| (o, d)).collect();
    let t_raw: Vec<f64> = months.iter().map(|&(o, _, _, _)| o).collect();
    let q_raw: Vec<f64> = months.iter().map(|&(_, _, sum, n)| sum / n as f64).collect();

    let (t_clean, q_clean) = if options.filter_outliers {
        bourdet_filter(&t_raw, &q_raw, &options.outlier)?
    } else {
        (t_raw, q_raw)
    };

    let b_bounds = if options.estimate_b {
        match b_factor_diagnostics(&t_clean, &q_clean) {
            Ok(diag) => clamp_b_bounds(&diag, &options.b_limits),
            Err(e) if e.kind() == crate::error::ErrorKind::DataInsufficiency => presets.default_b,
            Err(e) => return Err(e),
        }
    } else {
        presets.default_b
    };

    let (start, end) = if options.detect_changepoints && t_clean.len() >= 4 {
        let labels = detect_changepoints(&t_clean, &q_clean, options.changepoint_penalty)?;
        select_segment(&labels, options.segment_policy, options.min_fit_points)
    } else {
        (0, t_clean.len())
    };

    let q_seg = &q_clean[start..end];
    // Consecutive offsets: production gaps collapse so the decline is fit
    // against months actually produced.
    let t_fit: Vec<f64> = (0..q_seg.len()).map(|i| i as f64).collect();
    let series = ProductionSeries::new(t_fit.clone(), q_seg.to_vec())?;

    let strategy_options = StrategyOptions {
        method: options.method,
        trials: options.trials,
        smoothing_passes: options.smoothing_passes,
    };
    let fit = select_strategy(&series, presets, &b_bounds, &strategy_options)?;

    let validation = if fit.fit_type == FitType::Degenerate {
        None
    } else if options.strict_validation {
        Some(validate_fit_strict(
            &t_fit,
            q_seg,
            &fit.predicted,
            &fit.params,
            &options.thresholds,
        )?)
    } else {
        Some(validate_fit(
            &t_fit,
            q_seg,
            &fit.predicted,
            &fit.params,
            &options.thresholds,
        ))
    };

    // The segment's first point maps back to a calendar date through its
    // month offset (outlier removal drops rows, never renumbers them).
    let start_offset = t_clean[start];
    let start_date = dated
        .iter()
        .find(|&&(o, _)| o == start_offset)
        .map(|&(_, d)| d);

    let record = FitRecord {
        well_id: well.well_id.clone(),
        measure: well.measure,
        fit_months: q_seg.len(),
        fit_type: fit.fit_type,
        fit_segment: options.segment_policy,
        start_date,
        start_month: start as u32 + 1,
        q_guess: fit.q_guess,
        qi: fit.params.qi,
        dei: fit.params.dei,
        b_factor: fit.params.b,
        terminal_decline: fit.params.def_,
        r_squared: fit.metrics.map(|m| m.r_squared),
        rmse: fit.metrics.map(|m| m.rmse),
        mae: fit.metrics.map(|m| m.mae),
    };

    Ok(WellFit {
        record,
        validation,
        predicted: fit.predicted,
        fallbacks: fit.fallbacks,
    })
}

/// Process a batch of wells in parallel, preserving input order.
///
/// A well that fails yields a `no_data` sentinel row carrying the failure
/// message instead of aborting the batch.
pub fn process_batch(wells: &[WellSeries], options: &AnalysisOptions) -> Vec<WellFit> {
    wells
        .par_iter()
        .map(|well| match process_well(well, None, options) {
            Ok(fit) => fit,
            Err(e) => WellFit {
                record: FitRecord::no_data(
                    well.well_id.clone(),
                    well.measure,
                    options.segment_policy,
                ),
                validation: None,
                predicted: Vec::new(),
                fallbacks: vec![e.to_string()],
            },
        })
        .collect()
}

/// Whole calendar months between two dates, as used for months-producing
/// offsets.
fn month_offset(from: NaiveDate, to: NaiveDate) -> f64 {
    let years = to.year() - from.year();
    let months = to.month() as i32 - from.month() as i32;
    (years * 12 + months) as f64
}
