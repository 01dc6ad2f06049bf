//! Process groups for test commands.
//!
//! Every test command leads its own process group, so whatever it forks can
//! be killed together with it. On non-Unix targets these are plain kills.

use std::process::Command;

use tracing::{debug, warn};

/// Make the spawned process the leader of a new group.
pub fn isolate(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = command;
}

/// SIGKILL every member of the group led by `leader`. A group that is
/// already gone is not an error.
#[cfg(unix)]
pub fn kill_group(leader: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};

    let Some(group) = pid(leader) else {
        return;
    };
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => debug!(group = leader, "Killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(group = leader, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
pub fn kill_group(_leader: u32) {}

/// Kill `pids` and any group they lead, leaving our own group alone.
/// Used on the descendants of a worker being torn down.
#[cfg(unix)]
pub fn kill_all(pids: &[u32]) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::{getpgid, getpgrp};

    let own = getpgrp();
    for &raw in pids {
        let Some(target) = pid(raw) else {
            continue;
        };
        match getpgid(Some(target)) {
            Ok(group) if group == target && group != own => kill_group(raw),
            _ => {
                let _ = kill(target, Signal::SIGKILL);
            }
        }
    }
}

#[cfg(not(unix))]
pub fn kill_all(_pids: &[u32]) {}

#[cfg(unix)]
fn pid(raw: u32) -> Option<nix::unistd::Pid> {
    // 0 and negative values address groups in kill(2); never pass them on.
    i32::try_from(raw)
        .ok()
        .filter(|&p| p > 0)
        .map(nix::unistd::Pid::from_raw)
}

/// Whether `pid` names a live, non-zombie process. Linux only.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesized command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Poll until `pid` is gone, for at most two seconds.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn wait_gone(pid: u32) -> bool {
    for _ in 0..200 {
        if !is_running(pid) {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    false
}

/// Poll for a pid written by a shell fixture.
#[cfg(all(test, unix))]
pub(crate) fn read_pid(path: &std::path::Path) -> u32 {
    for _ in 0..500 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("no pid written to {}", path.display());
}
