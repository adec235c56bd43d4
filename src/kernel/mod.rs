//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Code reachable from `pre_exec` (rlimits, jail, credentials) is
//! async-signal-safe: no allocation, no locks, no logging.

pub mod credentials;
pub mod jail;
pub mod process;
pub mod rlimits;
