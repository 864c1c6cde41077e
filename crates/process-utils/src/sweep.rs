//! Sweeping the OS process table for processes carrying a marker argument.
//!
//! Long-running children are started with a marker on their command line
//! (for example `restream_owner=<tag>`). After a crash of the owning process
//! those children are no longer reachable through any handle, so the only
//! reliable way to find them again is the process table itself.

use std::ffi::OsString;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::{debug, info, warn};

const POLL_STEP: Duration = Duration::from_millis(100);

/// A process found in the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedProcess {
    pub pid: u32,
    pub name: String,
}

fn has_marker_arg(cmd: &[OsString], marker: &str) -> bool {
    cmd.iter().any(|arg| arg.to_string_lossy() == marker)
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always)
}

fn scan(system: &System, marker: &str) -> Vec<(Pid, TaggedProcess)> {
    let own_pid = sysinfo::get_current_pid().ok();

    system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != own_pid)
        .filter(|(_, process)| has_marker_arg(process.cmd(), marker))
        .map(|(pid, process)| {
            (
                *pid,
                TaggedProcess {
                    pid: pid.as_u32(),
                    name: process.name().to_string_lossy().into_owned(),
                },
            )
        })
        .collect()
}

/// List every process (other than the current one) whose command line
/// has `marker` as one of its arguments.
pub fn find_tagged_processes(marker: &str) -> Vec<TaggedProcess> {
    if marker.is_empty() {
        return Vec::new();
    }

    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());

    scan(&system, marker)
        .into_iter()
        .map(|(_, process)| process)
        .collect()
}

/// Terminate every process that has `marker` as one of its arguments.
///
/// Each match is asked to terminate (SIGTERM where supported), and anything
/// still alive after `grace` is killed. This call blocks; run it on a
/// blocking thread from async code.
///
/// Returns the processes that were found.
pub fn terminate_tagged_processes(marker: &str, grace: Duration) -> Vec<TaggedProcess> {
    if marker.is_empty() {
        return Vec::new();
    }

    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());

    let found = scan(&system, marker);
    if found.is_empty() {
        return Vec::new();
    }

    for (pid, tagged) in &found {
        if let Some(process) = system.process(*pid) {
            match process.kill_with(Signal::Term) {
                Some(true) => debug!(pid = tagged.pid, name = %tagged.name, "Sent terminate signal"),
                // Signal unsupported or refused; the forced kill below takes over.
                _ => debug!(pid = tagged.pid, "Terminate signal not delivered"),
            }
        }
    }

    let pids: Vec<Pid> = found.iter().map(|(pid, _)| *pid).collect();
    let deadline = Instant::now() + grace;

    loop {
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), true, refresh_kind());
        let alive: Vec<Pid> = pids
            .iter()
            .copied()
            .filter(|pid| system.process(*pid).is_some())
            .collect();

        if alive.is_empty() {
            break;
        }

        if Instant::now() >= deadline {
            for pid in alive {
                if let Some(process) = system.process(pid) {
                    warn!(pid = pid.as_u32(), "Process ignored terminate signal, killing");
                    process.kill();
                }
            }
            break;
        }

        std::thread::sleep(POLL_STEP);
    }

    info!(count = found.len(), marker = %marker, "Terminated tagged processes");
    found.into_iter().map(|(_, process)| process).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_marker_arg() {
        let cmd = vec![
            OsString::from("ffmpeg"),
            OsString::from("-metadata"),
            OsString::from("restream_owner=main"),
        ];
        assert!(has_marker_arg(&cmd, "restream_owner=main"));
        assert!(!has_marker_arg(&cmd, "restream_owner=other"));
        assert!(!has_marker_arg(&cmd, "restream_owner=mai"));
    }

    #[test]
    fn test_empty_marker_matches_nothing() {
        assert!(find_tagged_processes("").is_empty());
        assert!(terminate_tagged_processes("", Duration::ZERO).is_empty());
    }

    #[test]
    fn test_unknown_marker_finds_nothing() {
        let marker = "restream_owner=__definitely_not_running__";
        assert!(find_tagged_processes(marker).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_kills_process_ignoring_term() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::{Command, Stdio};

        let marker = format!("restream_owner=sweep-{}", std::process::id());
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 0.1; done", "sh", &marker])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();

        // The command line only carries the marker once the shell is exec'd.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !find_tagged_processes(&marker).iter().any(|p| p.pid == pid) {
            assert!(Instant::now() < deadline, "tagged process never showed up");
            std::thread::sleep(Duration::from_millis(20));
        }

        let found = terminate_tagged_processes(&marker, Duration::from_millis(300));
        assert_eq!(found.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![pid]);

        // SIGTERM was ignored, so it took the forced kill.
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(9));
        assert!(find_tagged_processes(&marker).is_empty());
    }
}
