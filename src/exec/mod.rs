//! Execution control
//!
//! Stages a request's code, launches the confined interpreter and orchestrates
//! draining, classification and cleanup.

pub mod executor;
pub mod launcher;
pub mod request;
pub mod stager;
