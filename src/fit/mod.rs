//! Curve fitting.
//!
//! Responsibilities:
//!
//! - typed free/fixed parameter configuration (`config`)
//! - the three optimization strategies behind one contract (`fitter`)
//! - the data-sufficiency cascade that picks a strategy per well
//!   (`strategy`)

pub mod config;
pub mod fitter;
pub mod strategy;

pub use config::*;
pub use fitter::*;
pub use strategy::*;
