//! Utilities
//!
//! Deadline tracking and bounded output collection.

pub mod deadline;
pub mod output;
