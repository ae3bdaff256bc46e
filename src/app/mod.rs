//! End-to-end analysis flow: cleaning, conditioning, fitting, validation,
//! and the batch driver.

pub mod pipeline;

pub use pipeline::*;
