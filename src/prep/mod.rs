//! Data conditioning applied before fitting.
//!
//! - `outliers`: Bourdet-derivative outlier rejection on log rates
//! - `segment`: penalized changepoint partition and segment selection
//! - `bfactor`: diagnostic b-factor bounds from local derivative behavior

pub mod bfactor;
pub mod outliers;
pub mod segment;

pub use bfactor::*;
pub use outliers::*;
pub use segment::*;
