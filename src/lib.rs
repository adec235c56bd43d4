//! jailrun: run untrusted ruby code in a chroot jail under hard resource limits
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::credentials`]: uid/gid validation and the in-process identity drop
//! - [`kernel::rlimits`]: Resource ceilings applied in the spawn hook
//! - [`kernel::jail`]: chroot entry for native confinement
//! - [`kernel::process`]: Host process table access (procfs, kill)
//!
//! ## Execution Control ([`exec`])
//! - [`exec::stager`]: Scoped, auto-deleting script files in the jail temp dir
//! - [`exec::launcher`]: Confined command construction and spawn
//! - [`exec::request`]: Request parsing and version checks
//! - [`exec::executor`]: Per-request orchestration and cleanup guarantees
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classifier`]: `Timeout | ResourceExhausted | Unknown` classification
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::reaper`]: Process group kill plus keyword sweep
//! - [`safety::cleanup`]: Temp directory baseline equivalence
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared types, closed enums and the error type
//! - [`config::loader`]: JSON configuration loading
//! - [`config::validator`]: Startup validation
//!
//! ## Utilities ([`utils`])
//! - [`utils::deadline`]: Single wall-clock deadline
//! - [`utils::output`]: Bounded concurrent output collection
//!
//! # Request lifecycle
//!
//! stage -> launch -> drain under deadline and ceiling -> classify -> sweep -> delete.
//! The sweep and the delete run on every path, in that order.

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint for the jailrun binary
pub mod cli;

pub use config::types::*;
pub use exec::executor::{ExecutionResult, RequestExecutor};
pub use exec::request::{ExecutionRequest, RequestError};
pub use verdict::classifier::ErrorKind;
