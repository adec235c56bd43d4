/// Request orchestration: stage, launch, drain, classify, sweep, delete
use crate::config::types::{Confinement, Result, SandboxConfig, SandboxError};
use crate::config::validator::validate_config;
use crate::exec::launcher::{IsolationLauncher, LaunchError};
use crate::exec::request::ExecutionRequest;
use crate::exec::stager::{StagedScript, TempFileStager};
use crate::kernel::process::{ProcFsTable, ProcessTable};
use crate::safety::reaper::{ProcessReaper, SweepTarget};
use crate::utils::deadline::TimeoutGuard;
use crate::utils::output::{rewrite_script_path, CollectedOutput, DrainOutcome, OutputCollector};
use crate::verdict::classifier::{ErrorClassifier, ErrorKind, ObservedFailure};
use log::{debug, info, warn};
use serde::Serialize;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Program output, or the `<Kind> message` text on failure
    pub output: Vec<u8>,
    /// Output was cut at the ceiling
    pub truncated: bool,
    pub error: Option<ErrorKind>,
}

impl ExecutionResult {
    /// Answer for a request that carried no code
    pub fn empty() -> Self {
        Self {
            output: Vec::new(),
            truncated: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs untrusted code, one isolated subprocess per request.
///
/// Holds nothing per request, so one executor may serve concurrent callers.
pub struct RequestExecutor {
    config: SandboxConfig,
    stager: TempFileStager,
    launcher: IsolationLauncher,
    collector: OutputCollector,
    classifier: ErrorClassifier,
    reaper: ProcessReaper,
}

impl RequestExecutor {
    /// Create an executor backed by the host procfs
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let table = ProcFsTable::new(&config.proc_root);
        Self::with_process_table(config, Box::new(table))
    }

    pub fn with_process_table(config: SandboxConfig, table: Box<dyn ProcessTable>) -> Result<Self> {
        // Invalid configuration fails here, never per request.
        let validation = validate_config(&config)?;
        for warning in validation.warnings {
            warn!("Configuration warning: {}", warning);
        }

        match config.confinement {
            Confinement::Native if !nix::unistd::geteuid().is_root() => {
                return Err(SandboxError::Privilege(
                    "Native confinement requires root privileges".to_string(),
                ));
            }
            Confinement::Unconfined => {
                warn!("Unconfined mode: no chroot and no identity change, do not run untrusted code");
            }
            _ => {}
        }

        let launcher = IsolationLauncher::new(&config)?;
        let reaper = ProcessReaper::new(table, sandbox_signatures(&config));
        info!(
            "Executor ready: jail {}, timeout {}ms, max output {} bytes, reaper backend {}",
            config.jail_root.display(),
            config.timeout_ms,
            config.max_output,
            reaper.backend_name()
        );

        Ok(Self {
            stager: TempFileStager::new(&config.jail_temp, config.script_mode),
            collector: OutputCollector::new(config.max_output),
            classifier: ErrorClassifier::new(config.max_output, config.exhaustion_markers.clone()),
            launcher,
            reaper,
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one request to completion. Never fails: every stage failure is
    /// classified, and the sweep and temp-file deletion run on every path.
    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "[{}] Executing {} bytes with ruby {}",
            request_id,
            request.code.len(),
            request.runtime_version
        );

        let mut cleanup = RequestCleanup {
            reaper: &self.reaper,
            request_id,
            target: SweepTarget::default(),
            staged: None,
        };
        let attempt = self.attempt(request, &mut cleanup);
        drop(cleanup);

        let result = match attempt {
            Ok((collected, script_path)) => self.settle(request, collected, &script_path),
            Err(failure) => self.failure_result(&failure, b"", false),
        };

        info!(
            "[{}] Finished in {:?}: {}",
            request_id,
            started.elapsed(),
            match result.error {
                Some(kind) => kind.to_string(),
                None => "ok".to_string(),
            }
        );
        result
    }

    fn attempt(
        &self,
        request: &ExecutionRequest,
        cleanup: &mut RequestCleanup<'_>,
    ) -> std::result::Result<(CollectedOutput, PathBuf), ObservedFailure> {
        let staged = self
            .stager
            .stage(&request.code)
            .map_err(|e| ObservedFailure::Internal(format!("staging: {}", e)))?;
        let basename = staged.basename().to_string();
        cleanup.target.keyword = Some(basename.clone());
        cleanup.staged = Some(staged);

        let process = self
            .launcher
            .launch(
                &basename,
                request.runtime_version,
                Stdio::piped(),
                Stdio::piped(),
            )
            .map_err(launch_failure)?;
        cleanup.target.process_group = Some(process.process_group);
        debug!(
            "[{}] pid {} spawned at {}",
            cleanup.request_id,
            process.pid,
            process.spawned_at_utc.to_rfc3339()
        );

        let script_path = process.script_path.clone();
        let guard = TimeoutGuard::starting_at(process.spawned_at, self.config.timeout());
        let collected = self
            .collector
            .collect(process, &guard)
            .map_err(|e| ObservedFailure::Internal(format!("collect: {}", e)))?;
        Ok((collected, script_path))
    }

    fn settle(
        &self,
        request: &ExecutionRequest,
        collected: CollectedOutput,
        script_path: &std::path::Path,
    ) -> ExecutionResult {
        let combined = collected.combined();
        match collected.outcome {
            DrainOutcome::TimedOut => {
                self.failure_result(&ObservedFailure::DeadlineElapsed, &combined, false)
            }
            DrainOutcome::Overflowed => {
                self.failure_result(&ObservedFailure::OutputCeiling, &combined, true)
            }
            DrainOutcome::Completed(status) => {
                if !status.success() {
                    info!("Program ended with {}", status);
                }
                if let Some(failure) = self.classifier.detect(&combined) {
                    let truncated = failure == ObservedFailure::OutputCeiling;
                    return self.failure_result(&failure, &combined, truncated);
                }

                let name = request
                    .display_name
                    .as_deref()
                    .unwrap_or(&self.config.default_display_name);
                let rewritten = rewrite_script_path(
                    &combined,
                    script_path.as_os_str().as_bytes(),
                    name.as_bytes(),
                );
                let (output, truncated) = bound(rewritten, self.config.max_output);
                ExecutionResult {
                    output,
                    truncated,
                    error: None,
                }
            }
        }
    }

    fn failure_result(
        &self,
        failure: &ObservedFailure,
        output: &[u8],
        truncated: bool,
    ) -> ExecutionResult {
        let classification = self.classifier.classification(failure, output);
        let (output, _) = bound(classification.message.into_bytes(), self.config.max_output);
        ExecutionResult {
            output,
            truncated,
            error: Some(classification.kind),
        }
    }
}

/// Sweeps, then deletes the staged script. Runs exactly once, on drop, so
/// early returns and unwinding take the same path.
struct RequestCleanup<'a> {
    reaper: &'a ProcessReaper,
    request_id: Uuid,
    target: SweepTarget,
    staged: Option<StagedScript>,
}

impl Drop for RequestCleanup<'_> {
    fn drop(&mut self) {
        let report = self.reaper.sweep(&self.target);
        if !report.errors.is_empty() {
            warn!(
                "[{}] Sweep finished with {} error(s)",
                self.request_id,
                report.errors.len()
            );
        }

        if let Some(mut staged) = self.staged.take() {
            if let Err(e) = staged.close() {
                warn!("[{}] {}", self.request_id, e);
            }
        }
    }
}

fn launch_failure(err: LaunchError) -> ObservedFailure {
    match err {
        LaunchError::HostExhausted(err) => ObservedFailure::HostExhausted(err.to_string()),
        other => ObservedFailure::Internal(other.to_string()),
    }
}

/// Command-line fragments identifying sandbox processes on the host
fn sandbox_signatures(config: &SandboxConfig) -> Vec<String> {
    let mut signatures = Vec::new();
    if let Confinement::Helper { command } = &config.confinement {
        // The last word is the helper itself; earlier ones are wrappers like sudo.
        if let Some(helper) = command.last() {
            signatures.push(helper.clone());
        }
    }
    signatures.push(config.interpreter.to_string_lossy().into_owned());
    for path in config.interpreters.values() {
        signatures.push(path.to_string_lossy().into_owned());
    }
    signatures.sort();
    signatures.dedup();
    signatures
}

fn bound(mut output: Vec<u8>, max: usize) -> (Vec<u8>, bool) {
    if output.len() > max {
        output.truncate(max);
        (output, true)
    } else {
        (output, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RuntimeVersion;
    use crate::kernel::process::{KillOutcome, ProcessEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockProcessTable {
        sweeps: Arc<AtomicUsize>,
    }

    impl ProcessTable for MockProcessTable {
        fn backend_name(&self) -> &str {
            "mock"
        }

        fn list(&self) -> Result<Vec<ProcessEntry>> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn kill_group(&self, _pgid: i32) -> Result<KillOutcome> {
            Ok(KillOutcome::AlreadyGone)
        }

        fn kill(&self, _pid: i32) -> Result<KillOutcome> {
            Ok(KillOutcome::AlreadyGone)
        }
    }

    fn unconfined(dir: &std::path::Path) -> SandboxConfig {
        SandboxConfig {
            jail_root: dir.to_path_buf(),
            jail_temp: dir.to_path_buf(),
            confinement: Confinement::Unconfined,
            interpreter: PathBuf::from("/nonexistent/ruby"),
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn signatures_include_helper_and_interpreters() {
        let mut config = SandboxConfig::default();
        config
            .interpreters
            .insert("1.8.6".to_string(), PathBuf::from("/opt/186/ruby"));
        assert_eq!(
            sandbox_signatures(&config),
            vec!["/bin/ruby", "/opt/186/ruby", "/usr/sbin/cage"]
        );
    }

    #[test]
    fn bound_cuts_at_ceiling() {
        assert_eq!(bound(b"abcdef".to_vec(), 4), (b"abcd".to_vec(), true));
        assert_eq!(bound(b"abcd".to_vec(), 4), (b"abcd".to_vec(), false));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            timeout_ms: 0,
            ..unconfined(dir.path())
        };
        assert!(matches!(
            RequestExecutor::new(config),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn spawn_failure_is_unknown_and_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let sweeps = Arc::new(AtomicUsize::new(0));
        let executor = RequestExecutor::with_process_table(
            unconfined(dir.path()),
            Box::new(MockProcessTable {
                sweeps: sweeps.clone(),
            }),
        )
        .unwrap();

        let result = executor.execute(&ExecutionRequest::new("puts 1", RuntimeVersion::V1_9_3));
        assert_eq!(result.error, Some(ErrorKind::Unknown));
        assert_eq!(result.output_lossy(), "<Unknown> fatal error occurred.");
        assert!(!result.truncated);
        assert_eq!(sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn refused_spawn_is_resource_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RequestExecutor::with_process_table(
            unconfined(dir.path()),
            Box::new(MockProcessTable {
                sweeps: Arc::new(AtomicUsize::new(0)),
            }),
        )
        .unwrap();

        let refused = LaunchError::from_spawn(std::io::Error::from_raw_os_error(libc::EAGAIN));
        let failure = launch_failure(refused);
        assert!(matches!(failure, ObservedFailure::HostExhausted(_)));

        let result = executor.failure_result(&failure, b"", false);
        assert_eq!(result.error, Some(ErrorKind::ResourceExhausted));
        assert_eq!(result.output_lossy(), "<ResourceExhausted> resource is unavailable.");
        assert!(!result.truncated);

        let missing = LaunchError::from_spawn(std::io::Error::from_raw_os_error(libc::ENOENT));
        assert!(matches!(launch_failure(missing), ObservedFailure::Internal(_)));
    }

    #[test]
    fn staging_failure_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let sweeps = Arc::new(AtomicUsize::new(0));
        let executor = RequestExecutor::with_process_table(
            unconfined(dir.path()),
            Box::new(MockProcessTable {
                sweeps: sweeps.clone(),
            }),
        )
        .unwrap();
        // Jail temp disappears after construction.
        drop(dir);

        let result = executor.execute(&ExecutionRequest::new("x", RuntimeVersion::V1_8_7));
        assert_eq!(result.error, Some(ErrorKind::Unknown));
        // Nothing was staged, so there was nothing to scan for.
        assert_eq!(sweeps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn executor_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RequestExecutor>();
    }
}
