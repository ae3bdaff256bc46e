//! Formatted terminal output for fit runs.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)
//!
//! Column order in the record table is fixed; downstream spreadsheets key on
//! position, not header text.

use crate::app::WellFit;
use crate::domain::{FitRecord, FitType};

/// Format fit records as a fixed-order table.
pub fn format_record_table(records: &[FitRecord]) -> String {
    let mut out = String::new();

    out.push_str(
        format!(
            "{:<16} {:<7} {:>6} {:<16} {:<7} {:<10} {:>5} {:>10} {:>10} {:>8} {:>6} {:>6} {:>8} {:>10} {:>10}\n",
            "well_id",
            "measure",
            "months",
            "fit_type",
            "segment",
            "start_date",
            "month",
            "q_guess",
            "qi",
            "dei",
            "b",
            "def",
            "r2",
            "rmse",
            "mae",
        )
        .trim_end(),
    );
    out.push('\n');

    for r in records {
        let start_date = r
            .start_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{:<16} {:<7} {:>6} {:<16} {:<7} {:<10} {:>5} {:>10} {:>10} {:>8} {:>6} {:>6} {:>8} {:>10} {:>10}\n",
                truncate(&r.well_id, 16),
                r.measure.display_name(),
                r.fit_months,
                r.fit_type.display_name(),
                r.fit_segment.display_name(),
                start_date,
                r.start_month,
                fmt_rate(r.q_guess),
                fmt_rate(r.qi),
                fmt_frac(r.dei),
                fmt_frac(r.b_factor),
                fmt_frac(r.terminal_decline),
                fmt_opt(r.r_squared, 4),
                fmt_opt(r.rmse, 2),
                fmt_opt(r.mae, 2),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

/// Format the batch run summary: counts per fit type plus validation totals.
pub fn format_batch_summary(fits: &[WellFit]) -> String {
    let mut out = String::new();

    let count = |ft: FitType| fits.iter().filter(|f| f.record.fit_type == ft).count();
    let full = count(FitType::FullOptimize);
    let single = count(FitType::SingleParameter);
    let degenerate = count(FitType::Degenerate);
    let no_data = count(FitType::NoData);

    let validated = fits.iter().filter(|f| f.validation.is_some()).count();
    let passed = fits
        .iter()
        .filter(|f| f.validation.as_ref().is_some_and(|v| v.overall_pass))
        .count();
    let warnings: usize = fits
        .iter()
        .filter_map(|f| f.validation.as_ref())
        .map(|v| v.warnings.len())
        .sum();

    out.push_str("=== Decline fit batch summary ===\n");
    out.push_str(&format!("Wells: {}\n", fits.len()));
    out.push_str(&format!(
        "Fits : full={full} | single={single} | degenerate={degenerate} | no_data={no_data}\n"
    ));
    out.push_str(&format!(
        "Validation: {passed}/{validated} passed | {warnings} warnings\n"
    ));

    let fallbacks: Vec<&WellFit> = fits.iter().filter(|f| !f.fallbacks.is_empty()).collect();
    if !fallbacks.is_empty() {
        out.push_str("\nFallbacks:\n");
        for f in fallbacks {
            out.push_str(&format!(
                "- {} {}: {}\n",
                f.record.well_id,
                f.record.measure.display_name(),
                f.fallbacks.join("; ")
            ));
        }
    }

    out
}

fn fmt_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "-".to_string()
    }
}

fn fmt_frac(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.4}")
    } else {
        "-".to_string()
    }
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.decimals$}"),
        _ => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
