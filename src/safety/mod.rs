//! Safety and cleanup
//!
//! Post-request process sweep and temp directory baseline checks.

pub mod cleanup;
pub mod reaper;
