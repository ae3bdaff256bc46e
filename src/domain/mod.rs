//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - phase/measure and policy enums (`Measure`, `SegmentPolicy`, `FitMethod`)
//! - the decline parameter set (`DeclineParameters`)
//! - per-phase fitting presets (`DeclinePresets`, `DeclineWindow`,
//!   `BFactorBounds`)
//! - raw and validated series inputs (`WellSeries`, `ProductionSeries`)
//! - fit outputs (`FitRecord`, `FitType`)

pub mod types;

pub use types::*;
