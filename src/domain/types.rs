//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can
//! be:
//!
//! - used in-memory during fitting
//! - exported to CSV/JSON by an external I/O layer
//! - reloaded later for plotting or comparisons

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Production phase being fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Measure {
    Oil,
    Gas,
    Water,
}

impl Measure {
    /// Label used in exported records (matches upstream data conventions).
    pub fn display_name(self) -> &'static str {
        match self {
            Measure::Oil => "OIL",
            Measure::Gas => "GAS",
            Measure::Water => "WATER",
        }
    }
}

/// Which optimizer `perform_curve_fit` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Deterministic damped least squares. Fast; can fail to converge.
    CurveFit,
    /// Bounded random search with a Gaussian refinement stage. Used when the
    /// least-squares surface is poorly conditioned.
    MonteCarlo,
    /// Population-based global search. Most robust, most expensive.
    DifferentialEvolution,
}

/// Which regime segment the fit anchors on.
///
/// `First` grows forward from the earliest segment, `Last` grows backward
/// from the most recent one, until the minimum fit length is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPolicy {
    First,
    Last,
}

impl SegmentPolicy {
    pub fn display_name(self) -> &'static str {
        match self {
            SegmentPolicy::First => "first",
            SegmentPolicy::Last => "last",
        }
    }
}

/// Which strategy produced a fit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitType {
    /// Smoothed series, {Dei, b} optimized jointly.
    FullOptimize,
    /// Short series, only Dei optimized.
    SingleParameter,
    /// Too little data (or rate below abandonment); parameters taken from
    /// guesses, goodness-of-fit metrics undefined.
    Degenerate,
    /// Sentinel for a well that could not be processed at all.
    NoData,
}

impl FitType {
    pub fn display_name(self) -> &'static str {
        match self {
            FitType::FullOptimize => "full_optimize",
            FitType::SingleParameter => "single_parameter",
            FitType::Degenerate => "degenerate",
            FitType::NoData => "no_data",
        }
    }
}

/// A complete Arps parameter set.
///
/// Units: `qi` is a monthly volume rate; `dei` and `def_` are effective
/// annual decline fractions; `b` is dimensionless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeclineParameters {
    pub qi: f64,
    pub dei: f64,
    pub def_: f64,
    pub b: f64,
}

impl DeclineParameters {
    /// Validate the physical envelope of a parameter set.
    ///
    /// `dei < 1` is required because the effective-to-nominal conversion
    /// takes `ln(1 - dei)`.
    pub fn new(qi: f64, dei: f64, def_: f64, b: f64) -> Result<Self, CoreError> {
        if !(qi.is_finite() && qi > 0.0) {
            return Err(CoreError::configuration(format!(
                "Qi must be positive and finite, got {qi}"
            )));
        }
        if !(dei.is_finite() && (0.0..1.0).contains(&dei)) {
            return Err(CoreError::configuration(format!(
                "Dei must lie in [0, 1), got {dei}"
            )));
        }
        if !(def_.is_finite() && (0.0..1.0).contains(&def_)) {
            return Err(CoreError::configuration(format!(
                "Def must lie in [0, 1), got {def_}"
            )));
        }
        if def_ > dei {
            return Err(CoreError::configuration(format!(
                "Def ({def_}) must not exceed Dei ({dei})"
            )));
        }
        if !(b.is_finite() && b >= 0.0) {
            return Err(CoreError::configuration(format!(
                "b must be non-negative and finite, got {b}"
            )));
        }
        Ok(Self { qi, dei, def_, b })
    }
}

/// An ordered production time series submitted to fitting.
///
/// Invariants enforced at construction: `t` strictly increasing with
/// `t[0] == 0`, all rates positive.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionSeries {
    t: Vec<f64>,
    q: Vec<f64>,
}

impl ProductionSeries {
    pub fn new(t: Vec<f64>, q: Vec<f64>) -> Result<Self, CoreError> {
        if t.len() != q.len() {
            return Err(CoreError::configuration(format!(
                "time/rate length mismatch: {} vs {}",
                t.len(),
                q.len()
            )));
        }
        if let Some(&t0) = t.first() {
            if t0 != 0.0 {
                return Err(CoreError::configuration(format!(
                    "series must start at t=0, got t[0]={t0}"
                )));
            }
        }
        for pair in t.windows(2) {
            if !(pair[1] > pair[0]) {
                return Err(CoreError::configuration(
                    "time offsets must be strictly increasing",
                ));
            }
        }
        if q.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(CoreError::configuration("rates must be positive and finite"));
        }
        Ok(Self { t, q })
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn t(&self) -> &[f64] {
        &self.t
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }
}

/// A bounded window for a single decline parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeclineWindow {
    pub min: f64,
    pub guess: f64,
    pub max: f64,
}

/// b-factor bounds and guess, either from presets or from the b-factor
/// diagnostics. Consumed directly as fitting bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BFactorBounds {
    pub min: f64,
    pub guess: f64,
    pub max: f64,
}

/// Per-phase fitting presets supplied by the caller.
///
/// The defaults mirror the original analytics configuration; every field is a
/// domain heuristic rather than a derived constant, so callers are expected
/// to override them per play.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeclinePresets {
    /// Terminal effective annual decline (the exponential-tail floor).
    pub terminal_decline: f64,
    /// Bounds and guess for the initial effective annual decline.
    pub initial_decline: DeclineWindow,
    /// Rates below this are treated as abandonment; such wells get a
    /// degenerate fit.
    pub abandonment_rate: f64,
    /// Default b-factor bounds used when diagnostics are disabled or fail.
    pub default_b: BFactorBounds,
}

impl DeclinePresets {
    pub fn for_measure(measure: Measure) -> Self {
        let terminal_decline = match measure {
            Measure::Gas => 0.06,
            Measure::Oil | Measure::Water => 0.08,
        };
        let abandonment_rate = match measure {
            Measure::Oil => 2.0,
            Measure::Gas => 10.0,
            Measure::Water => 2.0,
        };
        Self {
            terminal_decline,
            // Dei floor equals the terminal decline so the optimizer cannot
            // produce Dei < Def.
            initial_decline: DeclineWindow {
                min: terminal_decline,
                guess: 0.15,
                max: 0.98,
            },
            abandonment_rate,
            default_b: BFactorBounds {
                min: 0.5,
                guess: 0.9,
                max: 1.4,
            },
        }
    }
}

/// Raw per-well input as loaded from a production table: dated rates for one
/// measure, in no particular order and possibly containing zeros or negative
/// placeholder values. Cleaning happens in the pipeline, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellSeries {
    pub well_id: String,
    pub measure: Measure,
    pub dates: Vec<NaiveDate>,
    pub rates: Vec<f64>,
}

/// One fitted well/group row, in the fixed export column order.
///
/// Immutable after creation. Metrics are `None` for degenerate and no-data
/// rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub well_id: String,
    pub measure: Measure,
    /// Number of points in the fitted (segment-selected) series.
    pub fit_months: usize,
    pub fit_type: FitType,
    pub fit_segment: SegmentPolicy,
    pub start_date: Option<NaiveDate>,
    /// 1-based month index of the fit's first point within the cleaned
    /// series.
    pub start_month: u32,
    /// Pre-smoothing first observed rate.
    pub q_guess: f64,
    /// Fitted Qi (the possibly smoothed first rate; never a free optimizer
    /// parameter in the general path).
    pub qi: f64,
    pub dei: f64,
    pub b_factor: f64,
    pub terminal_decline: f64,
    pub r_squared: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
}

impl FitRecord {
    /// Sentinel row for a well that could not be processed; batch drivers
    /// emit these instead of aborting the run.
    pub fn no_data(well_id: impl Into<String>, measure: Measure, policy: SegmentPolicy) -> Self {
        Self {
            well_id: well_id.into(),
            measure,
            fit_months: 0,
            fit_type: FitType::NoData,
            fit_segment: policy,
            start_date: None,
            start_month: 0,
            q_guess: f64::NAN,
            qi: f64::NAN,
            dei: f64::NAN,
            b_factor: f64::NAN,
            terminal_decline: f64::NAN,
            r_squared: None,
            rmse: None,
            mae: None,
        }
    }
}
