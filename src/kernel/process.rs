//! Host process table access: procfs listing and SIGKILL delivery.

use crate::config::types::{Result, SandboxError};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// One row of the host process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    /// argv joined with spaces
    pub command_line: String,
}

/// Result of a kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Signalled,
    /// ESRCH: nothing left to kill
    AlreadyGone,
}

/// Seam between the reaper and the host process table.
pub trait ProcessTable: Send + Sync {
    fn backend_name(&self) -> &str;

    fn list(&self) -> Result<Vec<ProcessEntry>>;

    /// SIGKILL every member of a process group
    fn kill_group(&self, pgid: i32) -> Result<KillOutcome>;

    /// SIGKILL a single process
    fn kill(&self, pid: i32) -> Result<KillOutcome>;
}

/// [`ProcessTable`] backed by `/proc` and kill(2)
#[derive(Debug, Clone)]
pub struct ProcFsTable {
    root: PathBuf,
}

impl ProcFsTable {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn read_command_line(&self, pid: i32) -> Option<String> {
        let raw = fs::read(self.root.join(pid.to_string()).join("cmdline")).ok()?;
        // Kernel threads have an empty cmdline.
        if raw.is_empty() {
            return None;
        }
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        Some(args.join(" "))
    }
}

impl Default for ProcFsTable {
    fn default() -> Self {
        Self::new("/proc")
    }
}

fn to_outcome(result: nix::Result<()>, what: &str, id: i32) -> Result<KillOutcome> {
    match result {
        Ok(()) => Ok(KillOutcome::Signalled),
        Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyGone),
        Err(e) => Err(SandboxError::Process(format!("{}({}) failed: {}", what, id, e))),
    }
}

impl ProcessTable for ProcFsTable {
    fn backend_name(&self) -> &str {
        "procfs"
    }

    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            SandboxError::Filesystem(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };
            // The process may exit between readdir and read; skip it then.
            if let Some(command_line) = self.read_command_line(pid) {
                processes.push(ProcessEntry { pid, command_line });
            }
        }
        Ok(processes)
    }

    fn kill_group(&self, pgid: i32) -> Result<KillOutcome> {
        if pgid <= 1 {
            return Err(SandboxError::Process(format!(
                "refusing to signal process group {}",
                pgid
            )));
        }
        to_outcome(killpg(Pid::from_raw(pgid), Signal::SIGKILL), "killpg", pgid)
    }

    fn kill(&self, pid: i32) -> Result<KillOutcome> {
        if pid <= 1 {
            return Err(SandboxError::Process(format!("refusing to signal pid {}", pid)));
        }
        to_outcome(kill(Pid::from_raw(pid), Signal::SIGKILL), "kill", pid)
    }
}
