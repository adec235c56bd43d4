// Config validation
// Runs once when the executor is built; invalid configuration fails fast with
// actionable errors instead of surfacing per request.

use crate::config::types::{Confinement, Result, SandboxConfig, SandboxError};
use crate::kernel::credentials::validate_ids;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect every error and warning without failing
pub fn inspect_config(config: &SandboxConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_paths(config, &mut result);
    validate_confinement(config, &mut result);

    result
}

/// Validate config at startup; any error is fatal
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let result = inspect_config(config);

    if !result.is_valid() {
        return Err(SandboxError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_limits(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.timeout_ms == 0 {
        result.add_error("timeout_ms cannot be zero".to_string());
    }

    if config.max_output == 0 {
        result.add_error("max_output cannot be zero".to_string());
    }

    let limits = &config.limits;
    if limits.cpu_seconds == 0 {
        result.add_error("limits.cpu_seconds cannot be zero".to_string());
    }

    // CPU time can never be allowed to outlive the wall-clock budget.
    if limits.cpu_seconds.saturating_mul(1000) > config.timeout_ms {
        result.add_error(format!(
            "limits.cpu_seconds ({}s) must be <= timeout_ms ({}ms)",
            limits.cpu_seconds, config.timeout_ms
        ));
    }

    if limits.open_files == 0 {
        result.add_error("limits.open_files cannot be zero".to_string());
    }

    if limits.processes == 0 {
        result.add_error("limits.processes cannot be zero".to_string());
    }

    if limits.byte_ceiling == 0 {
        result.add_error("limits.byte_ceiling cannot be zero".to_string());
    } else if limits.byte_ceiling < 1024 * 1024 {
        result.add_warning(format!(
            "limits.byte_ceiling {} is very low (< 1MB), the interpreter may not start",
            limits.byte_ceiling
        ));
    }

    if limits.core_soft_bytes > limits.byte_ceiling {
        result.add_error(format!(
            "limits.core_soft_bytes ({}) must be <= limits.byte_ceiling ({})",
            limits.core_soft_bytes, limits.byte_ceiling
        ));
    }
}

fn validate_paths(config: &SandboxConfig, result: &mut ValidationResult) {
    for (name, path) in [
        ("jail_root", &config.jail_root),
        ("jail_temp", &config.jail_temp),
        ("sandbox_temp", &config.sandbox_temp),
        ("interpreter", &config.interpreter),
    ] {
        if !path.is_absolute() {
            result.add_error(format!("{} must be absolute path: {:?}", name, path));
        }
    }

    for (version, path) in &config.interpreters {
        if version.parse::<crate::config::types::RuntimeVersion>().is_err() {
            result.add_error(format!("interpreters: unknown runtime version {:?}", version));
        }
        if !path.is_absolute() {
            result.add_error(format!(
                "interpreters.{} must be absolute path: {:?}",
                version, path
            ));
        }
    }

    if !config.jail_temp.is_dir() {
        result.add_error(format!(
            "jail_temp directory does not exist: {:?}",
            config.jail_temp
        ));
    }

    if config.confinement.is_confined() && !config.jail_temp.starts_with(&config.jail_root) {
        result.add_warning(format!(
            "jail_temp {:?} is outside jail_root {:?}; staged scripts may be invisible in the jail",
            config.jail_temp, config.jail_root
        ));
    }

    if config.default_display_name.is_empty() {
        result.add_error("default_display_name cannot be empty".to_string());
    }

    if config.sandbox_path.is_empty() {
        result.add_warning("sandbox_path is empty; the interpreter gets no PATH".to_string());
    }
}

fn validate_confinement(config: &SandboxConfig, result: &mut ValidationResult) {
    match &config.confinement {
        Confinement::Helper { command } => {
            if command.is_empty() {
                result.add_error("confinement.command cannot be empty".to_string());
            }
            if !nix::unistd::geteuid().is_root() {
                // The helper runs as root and the interpreter as `uid`; neither
                // can be signalled from an unprivileged caller.
                result.add_warning(format!(
                    "helper mode without root: the reaper cannot kill processes of uid {}",
                    config.uid
                ));
            }
        }
        Confinement::Native => {
            if !config.jail_root.is_dir() {
                result.add_error(format!(
                    "jail_root directory does not exist: {:?}",
                    config.jail_root
                ));
            }
        }
        Confinement::Unconfined => {
            result.add_warning(
                "unconfined mode: untrusted code runs without chroot or identity change"
                    .to_string(),
            );
        }
    }

    if config.confinement.is_confined() {
        if let Err(e) = validate_ids(config.uid, config.gid) {
            result.add_error(e.to_string());
        }
    }
}
