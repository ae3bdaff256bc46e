//! Aggregate (type-curve) construction across a well population.
//!
//! Dated rates from every well of one measure are bucketed into months,
//! averaged, and the averaged curve is fit with the same full-optimize path
//! a single well uses. Two time origins are supported: `Calendar` offsets
//! every record from the population's earliest date (the original behavior,
//! suitable for a play-level production profile), while `WellNormalized`
//! offsets each well from its own first record, which is what a true type
//! curve wants.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{
    BFactorBounds, DeclinePresets, FitRecord, FitType, Measure, SegmentPolicy, WellSeries,
};
use crate::error::CoreError;
use crate::fit::strategy::{AttemptOutcome, StrategyFit, StrategyOptions, full_optimize};
use crate::validate::{ValidationReport, ValidationThresholds, validate_fit};

/// Group id used on aggregate fit records.
pub const AGGREGATE_GROUP_ID: &str = "AGGREGATE";

/// Average month length used to turn day offsets into month buckets.
const DAYS_PER_MONTH: f64 = 30.42;

/// Fewer populated buckets than this and the aggregate is returned without
/// a fit.
const MIN_BUCKETS_FOR_FIT: usize = 3;

/// Where month zero sits when bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOrigin {
    /// Offsets from the earliest date across the population.
    Calendar,
    /// Offsets from each well's own first date.
    WellNormalized,
}

/// One averaged month of the aggregate curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub month: usize,
    pub avg_rate: f64,
    /// Distinct wells contributing at least one record to this month.
    pub well_count: usize,
    /// Model rate at this month, present when the aggregate was fit.
    pub predicted: Option<f64>,
}

/// The averaged curve plus (when enough buckets exist) its fit.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCurve {
    pub measure: Measure,
    pub origin: TimeOrigin,
    /// Earliest date across the population; `None` for an empty input or a
    /// well-normalized origin.
    pub origin_date: Option<NaiveDate>,
    pub buckets: Vec<AggregateBucket>,
    pub fit: Option<StrategyFit>,
    pub validation: Option<ValidationReport>,
}

impl AggregateCurve {
    /// Export row for the aggregate, under the fixed group id.
    pub fn record(&self) -> FitRecord {
        match &self.fit {
            Some(fit) => FitRecord {
                well_id: AGGREGATE_GROUP_ID.to_string(),
                measure: self.measure,
                fit_months: self.buckets.len(),
                fit_type: fit.fit_type,
                fit_segment: SegmentPolicy::First,
                start_date: self.origin_date,
                start_month: 1,
                q_guess: fit.q_guess,
                qi: fit.params.qi,
                dei: fit.params.dei,
                b_factor: fit.params.b,
                terminal_decline: fit.params.def_,
                r_squared: fit.metrics.map(|m| m.r_squared),
                rmse: fit.metrics.map(|m| m.rmse),
                mae: fit.metrics.map(|m| m.mae),
            },
            None => {
                let mut record =
                    FitRecord::no_data(AGGREGATE_GROUP_ID, self.measure, SegmentPolicy::First);
                record.fit_months = self.buckets.len();
                record.start_date = self.origin_date;
                record
            }
        }
    }
}

/// Bucket, average, and (when possible) fit the population curve for one
/// measure.
///
/// Wells of other measures and non-positive rates are dropped up front.
/// Returns a curve with `fit: None` when fewer than three buckets remain or
/// the optimizer diverges; only structural problems (mismatched date/rate
/// lengths) are errors.
pub fn build_aggregate(
    wells: &[WellSeries],
    measure: Measure,
    origin: TimeOrigin,
    presets: &DeclinePresets,
    b_bounds: &BFactorBounds,
    options: &StrategyOptions,
    thresholds: &ValidationThresholds,
) -> Result<AggregateCurve, CoreError> {
    for well in wells {
        if well.dates.len() != well.rates.len() {
            return Err(CoreError::configuration(format!(
                "well {}: {} dates vs {} rates",
                well.well_id,
                well.dates.len(),
                well.rates.len()
            )));
        }
    }

    let selected: Vec<&WellSeries> = wells.iter().filter(|w| w.measure == measure).collect();
    // Origin of the calendar axis: earliest date that carries production.
    // Zero-rate placeholder records must not shift the bucket boundaries.
    let global_min = selected
        .iter()
        .flat_map(|w| w.dates.iter().zip(w.rates.iter()))
        .filter(|&(_, &r)| r.is_finite() && r > 0.0)
        .map(|(d, _)| *d)
        .min();

    // month bucket -> (rate sum, record count, contributing well ids)
    let mut accum: BTreeMap<usize, (f64, usize, HashSet<&str>)> = BTreeMap::new();
    for well in &selected {
        let well_min = well
            .dates
            .iter()
            .zip(well.rates.iter())
            .filter(|&(_, &r)| r.is_finite() && r > 0.0)
            .map(|(d, _)| *d)
            .min();
        let anchor = match origin {
            TimeOrigin::Calendar => global_min,
            TimeOrigin::WellNormalized => well_min,
        };
        let Some(anchor) = anchor else { continue };

        for (date, &rate) in well.dates.iter().zip(well.rates.iter()) {
            if !(rate.is_finite() && rate > 0.0) {
                continue;
            }
            let days = (*date - anchor).num_days();
            if days < 0 {
                continue;
            }
            let month = (days as f64 / DAYS_PER_MONTH).floor() as usize;
            let entry = accum.entry(month).or_insert_with(|| (0.0, 0, HashSet::new()));
            entry.0 += rate;
            entry.1 += 1;
            entry.2.insert(well.well_id.as_str());
        }
    }

    let mut buckets: Vec<AggregateBucket> = accum
        .into_iter()
        .map(|(month, (sum, count, wells))| AggregateBucket {
            month,
            avg_rate: sum / count as f64,
            well_count: wells.len(),
            predicted: None,
        })
        .collect();

    let origin_date = match origin {
        TimeOrigin::Calendar => global_min,
        TimeOrigin::WellNormalized => None,
    };

    if buckets.len() < MIN_BUCKETS_FOR_FIT {
        return Ok(AggregateCurve {
            measure,
            origin,
            origin_date,
            buckets,
            fit: None,
            validation: None,
        });
    }

    // The fit wants offsets from the first populated bucket. With a
    // calendar origin bucket 0 always exists, but a sparse population can
    // leave leading gaps under a well-normalized origin.
    let first_month = buckets[0].month;
    let t: Vec<f64> = buckets.iter().map(|b| (b.month - first_month) as f64).collect();
    let q: Vec<f64> = buckets.iter().map(|b| b.avg_rate).collect();

    match full_optimize(&t, &q, presets, b_bounds, options)? {
        AttemptOutcome::Fitted(fit) => {
            let fit = *fit;
            debug_assert_eq!(fit.fit_type, FitType::FullOptimize);
            for (bucket, &pred) in buckets.iter_mut().zip(fit.predicted.iter()) {
                bucket.predicted = Some(pred);
            }
            let report = validate_fit(&t, &q, &fit.predicted, &fit.params, thresholds);
            Ok(AggregateCurve {
                measure,
                origin,
                origin_date,
                buckets,
                fit: Some(fit),
                validation: Some(report),
            })
        }
        AttemptOutcome::Fallback(_) => Ok(AggregateCurve {
            measure,
            origin,
            origin_date,
            buckets,
            fit: None,
            validation: None,
        }),
    }
}
