/// Output collection under a shared byte ceiling and a single deadline
///
/// stdout and stderr are drained by two reader threads while a third waits
/// for the process to exit. The readers share one running byte total and stop
/// as soon as it reaches the ceiling. All three report through one channel
/// whose receive is bounded by the deadline.
use crate::config::types::{Result, SandboxError};
use crate::exec::launcher::SandboxProcess;
use crate::utils::deadline::TimeoutGuard;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::io::{self, Read};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum DrainEvent {
    Chunk(Stream, Vec<u8>),
    Eof(Stream),
    CeilingReached,
    Exited(io::Result<ExitStatus>),
}

/// How draining ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Process exited and both streams hit EOF within the deadline
    Completed(ExitStatus),
    TimedOut,
    /// Combined output reached the ceiling
    Overflowed,
}

#[derive(Debug, Clone)]
pub struct CollectedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: DrainOutcome,
    pub elapsed: Duration,
}

impl CollectedOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }
}

/// Output collector with one combined ceiling
pub struct OutputCollector {
    max_output: usize,
}

impl OutputCollector {
    pub fn new(max_output: usize) -> Self {
        Self { max_output }
    }

    /// Drain a spawned process until completion, overflow or the deadline.
    ///
    /// The process is never signalled here. On `TimedOut` and `Overflowed`
    /// the helper threads are left behind and finish once the process group
    /// is killed and the pipes close.
    pub fn collect(&self, process: SandboxProcess, guard: &TimeoutGuard) -> Result<CollectedOutput> {
        let SandboxProcess { mut child, pid, .. } = process;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = unbounded();
        let total = Arc::new(AtomicUsize::new(0));

        let mut stdout_done = stdout.is_none();
        let mut stderr_done = stderr.is_none();
        if let Some(stream) = stdout {
            spawn_reader(Stream::Stdout, stream, self.max_output, &total, tx.clone())?;
        }
        if let Some(stream) = stderr {
            spawn_reader(Stream::Stderr, stream, self.max_output, &total, tx.clone())?;
        }

        let waiter_tx = tx;
        thread::Builder::new()
            .name(format!("jailrun-wait-{}", pid))
            .spawn(move || {
                let _ = waiter_tx.send(DrainEvent::Exited(child.wait()));
            })
            .map_err(|e| SandboxError::Process(format!("Failed to spawn waiter thread: {}", e)))?;

        let mut collected_stdout = Vec::new();
        let mut collected_stderr = Vec::new();
        let mut status = None;

        let outcome = loop {
            if let (true, true, Some(exit)) = (stdout_done, stderr_done, status) {
                break DrainOutcome::Completed(exit);
            }

            match rx.recv_deadline(guard.deadline()) {
                Ok(DrainEvent::Chunk(Stream::Stdout, bytes)) => {
                    collected_stdout.extend_from_slice(&bytes)
                }
                Ok(DrainEvent::Chunk(Stream::Stderr, bytes)) => {
                    collected_stderr.extend_from_slice(&bytes)
                }
                Ok(DrainEvent::Eof(Stream::Stdout)) => stdout_done = true,
                Ok(DrainEvent::Eof(Stream::Stderr)) => stderr_done = true,
                Ok(DrainEvent::CeilingReached) => {
                    // Chunks sent before the signal are already queued.
                    while let Ok(event) = rx.try_recv() {
                        match event {
                            DrainEvent::Chunk(Stream::Stdout, bytes) => {
                                collected_stdout.extend_from_slice(&bytes)
                            }
                            DrainEvent::Chunk(Stream::Stderr, bytes) => {
                                collected_stderr.extend_from_slice(&bytes)
                            }
                            _ => {}
                        }
                    }
                    break DrainOutcome::Overflowed;
                }
                Ok(DrainEvent::Exited(Ok(exit))) => status = Some(exit),
                Ok(DrainEvent::Exited(Err(e))) => {
                    return Err(SandboxError::Process(format!(
                        "Failed to wait for pid {}: {}",
                        pid, e
                    )))
                }
                Err(RecvTimeoutError::Timeout) => break DrainOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SandboxError::Process(format!(
                        "Drain threads for pid {} vanished",
                        pid
                    )))
                }
            }
        };

        log::debug!(
            "Drained pid {}: {:?}, {} stdout + {} stderr bytes",
            pid,
            outcome,
            collected_stdout.len(),
            collected_stderr.len()
        );

        Ok(CollectedOutput {
            stdout: collected_stdout,
            stderr: collected_stderr,
            outcome,
            elapsed: guard.elapsed(),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    mut reader: R,
    ceiling: usize,
    total: &Arc<AtomicUsize>,
    tx: Sender<DrainEvent>,
) -> Result<()> {
    let total = Arc::clone(total);
    let name = match stream {
        Stream::Stdout => "jailrun-stdout",
        Stream::Stderr => "jailrun-stderr",
    };

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut chunk = [0u8; CHUNK_SIZE];
            loop {
                if total.load(Ordering::SeqCst) >= ceiling {
                    let _ = tx.send(DrainEvent::CeilingReached);
                    return;
                }
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        let _ = tx.send(DrainEvent::Eof(stream));
                        return;
                    }
                    Ok(n) => {
                        let before = total.fetch_add(n, Ordering::SeqCst);
                        let allowed = n.min(ceiling.saturating_sub(before));
                        if allowed > 0 {
                            let _ = tx.send(DrainEvent::Chunk(stream, chunk[..allowed].to_vec()));
                        }
                        if before + n >= ceiling {
                            let _ = tx.send(DrainEvent::CeilingReached);
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("{} read failed: {}", name, e);
                        let _ = tx.send(DrainEvent::Eof(stream));
                        return;
                    }
                }
            }
        })
        .map_err(|e| SandboxError::Process(format!("Failed to spawn {} thread: {}", name, e)))?;
    Ok(())
}

/// Replace every occurrence of `from` with `to`
pub fn rewrite_script_path(output: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return output.to_vec();
    }

    let mut rewritten = Vec::with_capacity(output.len());
    let mut rest = output;
    while let Some(pos) = rest.windows(from.len()).position(|window| window == from) {
        rewritten.extend_from_slice(&rest[..pos]);
        rewritten.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
    }
    rewritten.extend_from_slice(rest);
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Confinement, ResourceLimitSet, RuntimeVersion, SandboxConfig};
    use crate::exec::launcher::IsolationLauncher;
    use std::os::unix::fs::PermissionsExt;
    use std::process::Stdio;
    use std::time::Instant;

    struct Fixture {
        dir: tempfile::TempDir,
        launcher: IsolationLauncher,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = dir.path().join("interp");
        std::fs::write(&wrapper, "#!/bin/sh\nshift\nexec /bin/sh \"$@\"\n").unwrap();
        std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = SandboxConfig {
            jail_root: dir.path().to_path_buf(),
            jail_temp: dir.path().to_path_buf(),
            interpreter: wrapper,
            confinement: Confinement::Unconfined,
            limits: ResourceLimitSet {
                processes: 100_000,
                ..Default::default()
            },
            ..SandboxConfig::default()
        };
        let launcher = IsolationLauncher::new(&config).unwrap();
        Fixture { dir, launcher }
    }

    fn run(fixture: &Fixture, script: &str, max_output: usize, budget: Duration) -> CollectedOutput {
        std::fs::write(fixture.dir.path().join("script"), script).unwrap();
        let process = fixture
            .launcher
            .launch("script", RuntimeVersion::V1_9_3, Stdio::piped(), Stdio::piped())
            .unwrap();
        let pgid = process.process_group;
        let guard = TimeoutGuard::starting_at(process.spawned_at, budget);
        let collected = OutputCollector::new(max_output)
            .collect(process, &guard)
            .unwrap();
        let _ = nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pgid),
            nix::sys::signal::Signal::SIGKILL,
        );
        collected
    }

    #[test]
    fn completed_keeps_streams_separate() {
        let f = fixture();
        let out = run(&f, "echo out\necho err >&2\necho out2\n", 1024, Duration::from_secs(5));
        assert!(matches!(out.outcome, DrainOutcome::Completed(_)));
        assert_eq!(out.stdout, b"out\nout2\n");
        assert_eq!(out.stderr, b"err\n");
        assert_eq!(out.combined(), b"out\nout2\nerr\n");
    }

    #[test]
    fn non_zero_exit_still_completes() {
        let f = fixture();
        let out = run(&f, "echo bye\nexit 3\n", 1024, Duration::from_secs(5));
        match out.outcome {
            DrainOutcome::Completed(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn deadline_bounds_a_sleeping_process() {
        let f = fixture();
        let started = Instant::now();
        let out = run(&f, "sleep 30\n", 1024, Duration::from_millis(300));
        assert_eq!(out.outcome, DrainOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn flood_stops_at_ceiling() {
        let f = fixture();
        let out = run(&f, "yes\n", 1000, Duration::from_secs(5));
        assert_eq!(out.outcome, DrainOutcome::Overflowed);
        assert!(out.combined().len() <= 1000);
    }

    #[test]
    fn reaching_ceiling_exactly_overflows() {
        let f = fixture();
        // printf writes exactly ten bytes
        let out = run(&f, "printf 0123456789\nsleep 30\n", 10, Duration::from_secs(5));
        assert_eq!(out.outcome, DrainOutcome::Overflowed);
        assert_eq!(out.stdout, b"0123456789");
    }

    #[test]
    fn rewrite_replaces_every_occurrence() {
        let output = b"/tmp/jailrun-x:1: boom (/tmp/jailrun-x)\n";
        assert_eq!(
            rewrite_script_path(output, b"/tmp/jailrun-x", b"line"),
            b"line:1: boom (line)\n"
        );
        assert_eq!(rewrite_script_path(b"abc", b"", b"x"), b"abc");
        assert_eq!(rewrite_script_path(b"abc", b"zz", b"x"), b"abc");
    }
}
