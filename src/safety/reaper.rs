/// Post-request process sweep
///
/// Runs once after every request. The process group captured at spawn is
/// killed first; a keyword scan over the host process table then catches
/// anything that left the group. Failures are logged and never surfaced.
use crate::kernel::process::{KillOutcome, ProcessTable};
use log::{debug, info, warn};

/// What to sweep for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepTarget {
    /// Group id recorded at spawn; `None` when nothing was spawned
    pub process_group: Option<i32>,
    /// Unique token of the request (the staged script's basename)
    pub keyword: Option<String>,
}

impl SweepTarget {
    pub fn is_empty(&self) -> bool {
        self.process_group.is_none() && self.keyword.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub group: Option<KillOutcome>,
    /// Pids killed by the keyword scan
    pub killed: Vec<i32>,
    pub errors: Vec<String>,
}

pub struct ProcessReaper {
    table: Box<dyn ProcessTable>,
    /// Command-line fragments that mark a process as sandbox-owned
    signatures: Vec<String>,
    own_pid: i32,
}

impl ProcessReaper {
    pub fn new(table: Box<dyn ProcessTable>, signatures: Vec<String>) -> Self {
        let signatures = signatures.into_iter().filter(|s| !s.is_empty()).collect();
        Self {
            table,
            signatures,
            own_pid: std::process::id() as i32,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.table.backend_name()
    }

    pub fn sweep(&self, target: &SweepTarget) -> SweepReport {
        let mut report = SweepReport::default();
        if target.is_empty() {
            return report;
        }

        if let Some(pgid) = target.process_group {
            match self.table.kill_group(pgid) {
                Ok(outcome) => {
                    debug!("Process group {}: {:?}", pgid, outcome);
                    report.group = Some(outcome);
                }
                Err(e) => {
                    warn!("Failed to kill process group {}: {}", pgid, e);
                    report.errors.push(e.to_string());
                }
            }
        }

        if let Some(keyword) = target.keyword.as_deref().filter(|k| !k.is_empty()) {
            self.sweep_keyword(keyword, &mut report);
        }

        if !report.killed.is_empty() {
            info!(
                "Reaped {} stray process(es) via {}: {:?}",
                report.killed.len(),
                self.table.backend_name(),
                report.killed
            );
        }
        report
    }

    fn sweep_keyword(&self, keyword: &str, report: &mut SweepReport) {
        let processes = match self.table.list() {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Process listing failed: {}", e);
                report.errors.push(e.to_string());
                return;
            }
        };

        let is_sandboxed =
            |line: &str| self.signatures.iter().any(|sig| line.contains(sig.as_str()));
        if !processes.iter().any(|p| is_sandboxed(&p.command_line)) {
            return;
        }

        for process in processes {
            if process.pid == self.own_pid
                || !process.command_line.contains(keyword)
                || !is_sandboxed(&process.command_line)
            {
                continue;
            }
            match self.table.kill(process.pid) {
                Ok(KillOutcome::Signalled) => report.killed.push(process.pid),
                Ok(KillOutcome::AlreadyGone) => {}
                Err(e) => {
                    warn!("Failed to kill pid {}: {}", process.pid, e);
                    report.errors.push(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Result, SandboxError};
    use crate::kernel::process::ProcessEntry;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        groups: Vec<i32>,
        pids: Vec<i32>,
        lists: usize,
    }

    struct MockProcessTable {
        processes: Vec<ProcessEntry>,
        calls: Arc<Mutex<Calls>>,
        fail_group: bool,
    }

    impl MockProcessTable {
        fn new(processes: &[(i32, &str)], calls: Arc<Mutex<Calls>>) -> Self {
            Self {
                processes: processes
                    .iter()
                    .map(|(pid, line)| ProcessEntry {
                        pid: *pid,
                        command_line: line.to_string(),
                    })
                    .collect(),
                calls,
                fail_group: false,
            }
        }
    }

    impl ProcessTable for MockProcessTable {
        fn backend_name(&self) -> &str {
            "mock"
        }

        fn list(&self) -> Result<Vec<ProcessEntry>> {
            self.calls.lock().unwrap().lists += 1;
            Ok(self.processes.clone())
        }

        fn kill_group(&self, pgid: i32) -> Result<KillOutcome> {
            if self.fail_group {
                return Err(SandboxError::Process("EPERM".to_string()));
            }
            self.calls.lock().unwrap().groups.push(pgid);
            Ok(KillOutcome::Signalled)
        }

        fn kill(&self, pid: i32) -> Result<KillOutcome> {
            self.calls.lock().unwrap().pids.push(pid);
            Ok(KillOutcome::Signalled)
        }
    }

    fn reaper(table: MockProcessTable) -> ProcessReaper {
        ProcessReaper::new(
            Box::new(table),
            vec!["/usr/sbin/cage".to_string(), "/bin/ruby".to_string()],
        )
    }

    fn target(pgid: i32, keyword: &str) -> SweepTarget {
        SweepTarget {
            process_group: Some(pgid),
            keyword: Some(keyword.to_string()),
        }
    }

    #[test]
    fn kills_group_then_matching_strays() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let table = MockProcessTable::new(
            &[
                (4_000_010, "/bin/ruby 1.9.3 /tmp/jailrun-aaa"),
                (4_000_011, "/bin/ruby 1.9.3 /tmp/jailrun-bbb"),
                (4_000_012, "vim /tmp/jailrun-aaa"),
                (4_000_013, "sudo /usr/sbin/cage -u 500 -g 500 -- /jail/readonly /bin/ruby 1.9.3 /tmp/jailrun-aaa"),
            ],
            calls.clone(),
        );

        let report = reaper(table).sweep(&target(4_000_010, "jailrun-aaa"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.groups, vec![4_000_010]);
        assert_eq!(calls.pids, vec![4_000_010, 4_000_013]);
        assert_eq!(report.group, Some(KillOutcome::Signalled));
        assert_eq!(report.killed, vec![4_000_010, 4_000_013]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn no_signature_means_no_scan_kills() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let table = MockProcessTable::new(&[(4_000_020, "cat /tmp/jailrun-aaa")], calls.clone());

        let report = reaper(table).sweep(&target(4_000_020, "jailrun-aaa"));
        assert!(report.killed.is_empty());
        assert!(calls.lock().unwrap().pids.is_empty());
    }

    #[test]
    fn never_kills_own_pid() {
        let own = std::process::id() as i32;
        let calls = Arc::new(Mutex::new(Calls::default()));
        let line = "/bin/ruby 1.9.3 /tmp/jailrun-self";
        let table = MockProcessTable::new(&[(own, line)], calls.clone());

        let report = reaper(table).sweep(&SweepTarget {
            process_group: None,
            keyword: Some("jailrun-self".to_string()),
        });
        assert!(report.killed.is_empty());
        assert!(calls.lock().unwrap().pids.is_empty());
    }

    #[test]
    fn group_failure_is_reported_not_raised() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut table = MockProcessTable::new(&[], calls.clone());
        table.fail_group = true;

        let report = reaper(table).sweep(&target(30, "jailrun-ccc"));
        assert_eq!(report.group, None);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(calls.lock().unwrap().lists, 1);
    }

    #[test]
    fn empty_target_is_a_no_op() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let table = MockProcessTable::new(&[(1, "/bin/ruby")], calls.clone());

        let report = reaper(table).sweep(&SweepTarget::default());
        assert_eq!(report, SweepReport::default());
        assert_eq!(calls.lock().unwrap().lists, 0);
    }
}
