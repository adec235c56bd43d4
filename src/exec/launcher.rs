//! Isolation launcher
//!
//! Builds the confined command line for a staged script and spawns it with a
//! fixed environment, root working directory and resource ceilings. Everything
//! the child needs is computed before fork; the `pre_exec` hook only issues
//! syscalls.

use crate::config::types::{
    Confinement, ResourceLimitSet, Result, RuntimeVersion, SandboxConfig, SandboxError,
};
use crate::kernel::jail::NativeJail;
use crate::kernel::rlimits::{apply_rlimits, clamp_to_current, rlimit_entries, RlimitEntry};
use chrono::{DateTime, Utc};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// fork/clone refused by the host (EAGAIN, ENOMEM)
    #[error("host refused to create a process: {0}")]
    HostExhausted(io::Error),

    #[error("spawn failed: {0}")]
    Spawn(io::Error),

    #[error("invalid launch argument: {0}")]
    InvalidArgument(String),
}

impl LaunchError {
    pub fn from_spawn(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::ENOMEM) => LaunchError::HostExhausted(err),
            _ => LaunchError::Spawn(err),
        }
    }
}

/// A running sandboxed interpreter
#[derive(Debug)]
pub struct SandboxProcess {
    pub child: Child,
    pub pid: u32,
    /// The child calls setsid, so its process group id equals its pid
    pub process_group: i32,
    /// Script path as the interpreter sees it
    pub script_path: PathBuf,
    pub jail_root: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub limits: ResourceLimitSet,
    pub spawned_at: Instant,
    pub spawned_at_utc: DateTime<Utc>,
}

pub struct IsolationLauncher {
    config: SandboxConfig,
    rlimits: Vec<RlimitEntry>,
    jail: Option<NativeJail>,
}

impl IsolationLauncher {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let entries = rlimit_entries(&config.limits);
        let rlimits = match config.confinement {
            Confinement::Unconfined => clamp_to_current(&entries),
            _ => entries,
        };

        let jail = match config.confinement {
            Confinement::Native => Some(NativeJail::new(&config.jail_root, config.uid, config.gid)?),
            _ => None,
        };

        if let Confinement::Helper { command } = &config.confinement {
            if command.is_empty() {
                return Err(SandboxError::Config(
                    "Helper confinement needs a command".to_string(),
                ));
            }
        }

        Ok(Self {
            config: config.clone(),
            rlimits,
            jail,
        })
    }

    pub fn script_path(&self, basename: &str) -> PathBuf {
        self.config.script_dir().join(basename)
    }

    /// Full argv for a script
    pub fn command_line(&self, basename: &str, version: RuntimeVersion) -> Vec<String> {
        let interpreter = self.config.interpreter_for(version).to_string_lossy().into_owned();
        let script = self.script_path(basename).to_string_lossy().into_owned();

        let mut argv = Vec::new();
        if let Confinement::Helper { command } = &self.config.confinement {
            argv.extend(command.iter().cloned());
            argv.extend([
                "-u".to_string(),
                self.config.uid.to_string(),
                "-g".to_string(),
                self.config.gid.to_string(),
                "--".to_string(),
                self.config.jail_root.to_string_lossy().into_owned(),
            ]);
        }
        argv.extend([interpreter, version.as_str().to_string(), script]);
        argv
    }

    /// Spawn the interpreter for a staged script.
    ///
    /// Only the script's basename crosses into the command line; it must be a
    /// single path component.
    pub fn launch(
        &self,
        basename: &str,
        version: RuntimeVersion,
        stdout: Stdio,
        stderr: Stdio,
    ) -> std::result::Result<SandboxProcess, LaunchError> {
        if basename.is_empty()
            || basename.contains('/')
            || basename.contains('\0')
            || basename == "."
            || basename == ".."
        {
            return Err(LaunchError::InvalidArgument(format!(
                "script name {:?} is not a plain file name",
                basename
            )));
        }

        let argv = self.command_line(basename, version);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| LaunchError::InvalidArgument("empty command line".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .env("PATH", &self.config.sandbox_path)
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let rlimits = self.rlimits.clone();
        let jail = self.jail.clone();
        // SAFETY: the hook runs between fork and exec. It only calls setsid,
        // setrlimit, chroot, chdir and the credential syscalls, all of which
        // are async-signal-safe, and touches only data prepared before fork.
        unsafe {
            command.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                apply_rlimits(&rlimits)?;
                if let Some(jail) = &jail {
                    jail.enter()?;
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(LaunchError::from_spawn)?;
        let pid = child.id();
        let process = SandboxProcess {
            pid,
            process_group: pid as i32,
            script_path: self.script_path(basename),
            jail_root: self.config.jail_root.clone(),
            uid: self.config.uid,
            gid: self.config.gid,
            limits: self.config.limits.clone(),
            spawned_at: Instant::now(),
            spawned_at_utc: Utc::now(),
            child,
        };

        log::info!(
            "Spawned pid {} ({}, {}:{} in {}) for {}",
            process.pid,
            self.confinement_name(),
            process.uid,
            process.gid,
            process.jail_root.display(),
            process.script_path.display()
        );
        log::debug!("Command line: {:?}", argv);
        Ok(process)
    }

    fn confinement_name(&self) -> &'static str {
        match self.config.confinement {
            Confinement::Helper { .. } => "helper",
            Confinement::Native => "native",
            Confinement::Unconfined => "unconfined",
        }
    }
}
