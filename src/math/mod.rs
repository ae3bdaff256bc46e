//! Small numerical utilities: descriptive statistics, rolling smoothing, and
//! goodness-of-fit metrics.

pub mod stats;

pub use stats::*;
