/// Core types and structures for the jailrun system
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Interpreter runtimes the jail provides. The set is closed: a request can only
/// name one of these, so an unknown version never reaches the launcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuntimeVersion {
    #[serde(rename = "1.8.6")]
    V1_8_6,
    #[serde(rename = "1.8.7")]
    V1_8_7,
    #[serde(rename = "1.9.1")]
    V1_9_1,
    #[serde(rename = "1.9.2")]
    V1_9_2,
    #[serde(rename = "1.9.3")]
    V1_9_3,
}

impl RuntimeVersion {
    pub const ALL: [RuntimeVersion; 5] = [
        RuntimeVersion::V1_8_6,
        RuntimeVersion::V1_8_7,
        RuntimeVersion::V1_9_1,
        RuntimeVersion::V1_9_2,
        RuntimeVersion::V1_9_3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeVersion::V1_8_6 => "1.8.6",
            RuntimeVersion::V1_8_7 => "1.8.7",
            RuntimeVersion::V1_9_1 => "1.9.1",
            RuntimeVersion::V1_9_2 => "1.9.2",
            RuntimeVersion::V1_9_3 => "1.9.3",
        }
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a version string is not one of [`RuntimeVersion::ALL`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ruby {0} is not available")]
pub struct UnsupportedVersion(pub String);

impl FromStr for RuntimeVersion {
    type Err = UnsupportedVersion;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RuntimeVersion::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnsupportedVersion(s.to_string()))
    }
}

/// Per-process ceilings applied to the sandbox before the interpreter starts.
///
/// Every byte-valued ceiling (address space, data, stack, RSS, file size and
/// the core-dump hard limit) shares `byte_ceiling`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimitSet {
    /// RLIMIT_CPU in seconds; must not exceed the wall-clock timeout
    pub cpu_seconds: u64,
    /// RLIMIT_NOFILE
    pub open_files: u64,
    /// RLIMIT_NPROC (processes and threads of the sandbox uid)
    pub processes: u64,
    /// Shared byte ceiling for AS, DATA, STACK, RSS, FSIZE and the CORE hard limit
    pub byte_ceiling: u64,
    /// Soft core-dump size (0 disables core files)
    pub core_soft_bytes: u64,
}

impl Default for ResourceLimitSet {
    fn default() -> Self {
        Self {
            cpu_seconds: 5,
            open_files: 100,
            processes: 100,
            byte_ceiling: 50 * MIB,
            core_soft_bytes: 0,
        }
    }
}

/// How the launcher confines the interpreter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Confinement {
    /// Delegate chroot + uid/gid drop to an external helper, invoked as
    /// `command.. -u UID -g GID -- JAIL_ROOT INTERPRETER VERSION SCRIPT`
    Helper { command: Vec<String> },
    /// chroot and setresgid/setresuid performed in the spawn hook (requires root)
    Native,
    /// No chroot and no identity change. Development and tests only.
    Unconfined,
}

impl Default for Confinement {
    fn default() -> Self {
        Confinement::Helper {
            command: vec!["sudo".to_string(), "/usr/sbin/cage".to_string()],
        }
    }
}

impl Confinement {
    pub fn is_confined(&self) -> bool {
        !matches!(self, Confinement::Unconfined)
    }
}

/// Immutable sandbox configuration handed to the executor at construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root of the jail the interpreter is confined to
    pub jail_root: PathBuf,
    /// Host path of the jail's writable temp directory
    pub jail_temp: PathBuf,
    /// The same directory as seen from inside the jail
    pub sandbox_temp: PathBuf,
    /// Identity the interpreter runs as
    pub uid: u32,
    pub gid: u32,
    /// Default interpreter (inside the jail); receives `VERSION SCRIPT` as arguments
    pub interpreter: PathBuf,
    /// Per-version interpreter overrides keyed by version string
    pub interpreters: BTreeMap<String, PathBuf>,
    pub confinement: Confinement,
    /// Wall-clock budget for spawn, execution and drain
    pub timeout_ms: u64,
    /// Combined stdout+stderr ceiling in bytes
    pub max_output: usize,
    pub limits: ResourceLimitSet,
    /// The only variable in the sandbox environment
    pub sandbox_path: String,
    /// Name substituted for the script path when the request gives none
    pub default_display_name: String,
    /// Output fragments that mean the host refused to create a process
    pub exhaustion_markers: Vec<String>,
    /// Mode bits of the staged script
    pub script_mode: u32,
    /// Procfs mount used by the reaper's fallback sweep
    pub proc_root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let jail_root = PathBuf::from("/jail/readonly");
        Self {
            jail_temp: jail_root.join("tmp"),
            jail_root,
            sandbox_temp: PathBuf::from("/tmp"),
            uid: 500,
            gid: 500,
            interpreter: PathBuf::from("/bin/ruby"),
            interpreters: BTreeMap::new(),
            confinement: Confinement::default(),
            timeout_ms: 5_000,
            max_output: 10 * 1024,
            limits: ResourceLimitSet::default(),
            sandbox_path: "/usr/bin:/bin".to_string(),
            default_display_name: "line".to_string(),
            exhaustion_markers: vec!["Resource temporarily unavailable - fork(2)".to_string()],
            script_mode: 0o644,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interpreter_for(&self, version: RuntimeVersion) -> &Path {
        self.interpreters
            .get(version.as_str())
            .map(PathBuf::as_path)
            .unwrap_or(&self.interpreter)
    }

    /// Directory holding staged scripts as the interpreter sees it
    pub fn script_dir(&self) -> &Path {
        if self.confinement.is_confined() {
            &self.sandbox_temp
        } else {
            &self.jail_temp
        }
    }
}

/// Error types for jailrun
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Privilege error: {0}")]
    Privilege(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_version_parses_supported_set() {
        for version in RuntimeVersion::ALL {
            assert_eq!(version.as_str().parse::<RuntimeVersion>(), Ok(version));
        }
    }

    #[test]
    fn runtime_version_rejects_unknown() {
        let err = "2.0.0".parse::<RuntimeVersion>().unwrap_err();
        assert_eq!(err.to_string(), "ruby 2.0.0 is not available");
        assert!("".parse::<RuntimeVersion>().is_err());
    }

    #[test]
    fn runtime_version_requires_exact_match() {
        assert!("1.9.3 ".parse::<RuntimeVersion>().is_err());
        assert!(" 1.8.7".parse::<RuntimeVersion>().is_err());
        assert!("1.9".parse::<RuntimeVersion>().is_err());
    }

    #[test]
    fn default_config_matches_service_constants() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.max_output, 10 * 1024);
        assert_eq!(config.limits.byte_ceiling, 50 * 1024 * 1024);
        assert_eq!(config.jail_temp, PathBuf::from("/jail/readonly/tmp"));
        assert!(config.limits.cpu_seconds * 1000 <= config.timeout_ms);
        assert_eq!(config.default_display_name, "line");
    }

    #[test]
    fn interpreter_override_per_version() {
        let mut config = SandboxConfig::default();
        config
            .interpreters
            .insert("1.8.7".to_string(), PathBuf::from("/opt/ruby187/bin/ruby"));

        assert_eq!(
            config.interpreter_for(RuntimeVersion::V1_8_7),
            Path::new("/opt/ruby187/bin/ruby")
        );
        assert_eq!(config.interpreter_for(RuntimeVersion::V1_9_3), Path::new("/bin/ruby"));
    }

    #[test]
    fn script_dir_depends_on_confinement() {
        let mut config = SandboxConfig::default();
        assert_eq!(config.script_dir(), Path::new("/tmp"));

        config.confinement = Confinement::Unconfined;
        assert_eq!(config.script_dir(), Path::new("/jail/readonly/tmp"));
    }

    #[test]
    fn confinement_serializes_with_mode_tag() {
        let json = serde_json::to_value(Confinement::Native).unwrap();
        assert_eq!(json, serde_json::json!({"mode": "native"}));

        let parsed: Confinement =
            serde_json::from_str(r#"{"mode":"helper","command":["/usr/sbin/cage"]}"#).unwrap();
        assert_eq!(
            parsed,
            Confinement::Helper {
                command: vec!["/usr/sbin/cage".to_string()]
            }
        );
    }
}
