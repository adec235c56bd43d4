//! Resource limit application.
//!
//! [`rlimit_entries`] expands a [`ResourceLimitSet`] into concrete
//! (resource, soft, hard) triples before fork; [`apply_rlimits`] runs in the
//! child after fork and only issues setrlimit calls.

use crate::config::types::ResourceLimitSet;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::io;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitEntry {
    pub name: &'static str,
    pub resource: Resource,
    pub soft: u64,
    pub hard: u64,
}

impl RlimitEntry {
    fn new(name: &'static str, resource: Resource, soft: u64, hard: u64) -> Self {
        Self {
            name,
            resource,
            soft,
            hard,
        }
    }
}

/// Every ceiling of the set, in the order it is applied
pub fn rlimit_entries(limits: &ResourceLimitSet) -> Vec<RlimitEntry> {
    let bytes = limits.byte_ceiling;
    vec![
        RlimitEntry::new(
            "RLIMIT_CORE",
            Resource::RLIMIT_CORE,
            limits.core_soft_bytes.min(bytes),
            bytes,
        ),
        // soft = limit -> SIGXCPU, hard = limit+1 -> SIGKILL.
        RlimitEntry::new(
            "RLIMIT_CPU",
            Resource::RLIMIT_CPU,
            limits.cpu_seconds,
            limits.cpu_seconds + 1,
        ),
        RlimitEntry::new(
            "RLIMIT_NOFILE",
            Resource::RLIMIT_NOFILE,
            limits.open_files,
            limits.open_files,
        ),
        RlimitEntry::new(
            "RLIMIT_NPROC",
            Resource::RLIMIT_NPROC,
            limits.processes,
            limits.processes,
        ),
        RlimitEntry::new("RLIMIT_AS", Resource::RLIMIT_AS, bytes, bytes),
        RlimitEntry::new("RLIMIT_DATA", Resource::RLIMIT_DATA, bytes, bytes),
        RlimitEntry::new("RLIMIT_STACK", Resource::RLIMIT_STACK, bytes, bytes),
        RlimitEntry::new("RLIMIT_RSS", Resource::RLIMIT_RSS, bytes, bytes),
        RlimitEntry::new("RLIMIT_FSIZE", Resource::RLIMIT_FSIZE, bytes, bytes),
    ]
}

/// Apply every entry to the calling process.
///
/// Async-signal-safe; intended for `pre_exec`. Stops at the first failure.
pub fn apply_rlimits(entries: &[RlimitEntry]) -> io::Result<()> {
    for entry in entries {
        setrlimit(
            entry.resource,
            entry.soft as libc::rlim_t,
            entry.hard as libc::rlim_t,
        )
        .map_err(io::Error::from)?;
    }
    Ok(())
}

/// Drop any entry whose hard limit is above what this process may set.
///
/// An unprivileged parent cannot raise a hard limit, so in unconfined mode the
/// requested ceiling is clamped to the current hard limit instead of failing
/// the launch.
pub fn clamp_to_current(entries: &[RlimitEntry]) -> Vec<RlimitEntry> {
    entries
        .iter()
        .map(|entry| match getrlimit(entry.resource) {
            Ok((_, current_hard)) if (entry.hard as libc::rlim_t) > current_hard => {
                log::debug!(
                    "Clamping {} hard limit {} to current {}",
                    entry.name,
                    entry.hard,
                    current_hard
                );
                let hard = current_hard as u64;
                RlimitEntry {
                    soft: entry.soft.min(hard),
                    hard,
                    ..*entry
                }
            }
            _ => *entry,
        })
        .collect()
}
