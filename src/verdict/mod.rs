//! Failure classification
//!
//! Maps stage failures into the closed `Timeout | ResourceExhausted | Unknown` taxonomy.

pub mod classifier;
