//! `arps-dca` library crate.
//!
//! Arps decline-curve analysis for oil/gas/water production series:
//!
//! - the decline-curve model itself (hyperbolic with a terminal-exponential
//!   switch)
//! - data conditioning (Bourdet outlier rejection, changepoint segmentation,
//!   b-factor diagnostics)
//! - a cascading fit engine with three interchangeable optimizers
//! - type-curve aggregation across wells
//! - a six-rule fit validator
//!
//! Loading production records, configuration files, plotting, and CLI
//! surfaces are deliberately left to callers; everything in this crate is
//! pure in-memory computation so it stays testable and reusable.

pub mod aggregate;
pub mod app;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod prep;
pub mod report;
pub mod validate;
