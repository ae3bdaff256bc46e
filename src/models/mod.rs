//! Decline-curve model evaluation.
//!
//! The fitter relies on two primitive operations:
//! - predict rates on a time grid given a parameter set (for residuals)
//! - produce the full rate/decline/cumulative curve (for reports and
//!   validation)
//!
//! Both are implemented in `arps.rs`.

pub mod arps;

pub use arps::*;
