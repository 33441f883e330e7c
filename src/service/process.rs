//! OS process helpers: liveness checks and process-tree termination.

use std::collections::{HashMap, HashSet};
use sysinfo::{Pid, PidExt, ProcessExt, ProcessStatus, System, SystemExt};
use tracing::{debug, warn};

/// Whether `pid` names a live (non-zombie) process.
pub fn is_process_running(pid: u32) -> bool {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return false;
    }
    sys.process(pid)
        .map(|p| p.status() != ProcessStatus::Zombie)
        .unwrap_or(false)
}

/// All descendants of `root`, children before their parents.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    collect_post_order(&children, root, &mut visited, &mut order);
    // The walk ends with the root itself
    order.pop();
    order
}

fn collect_post_order(
    children: &HashMap<u32, Vec<u32>>,
    pid: u32,
    visited: &mut HashSet<u32>,
    order: &mut Vec<u32>,
) {
    if !visited.insert(pid) {
        return;
    }
    if let Some(kids) = children.get(&pid) {
        for &kid in kids {
            collect_post_order(children, kid, visited, order);
        }
    }
    order.push(pid);
}

/// SIGKILL the tree rooted at `pid`, bottom-up, then its process group.
///
/// Best-effort: processes that are already gone are skipped. Returns the
/// number of processes signalled.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> usize {
    let mut killed = 0;
    for child in descendants(pid) {
        if kill_force(child) {
            killed += 1;
        }
    }
    if kill_force(pid) {
        killed += 1;
    }

    // The supervisor starts every script as a process-group leader, so this
    // also reaches members that were re-parented away from the tree.
    let group = -(pid as i32);
    if unsafe { libc::kill(group, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "Failed to signal process group");
        }
    }

    debug!(pid, killed, "Killed process tree");
    killed
}

#[cfg(not(unix))]
pub fn kill_tree(pid: u32) -> usize {
    warn!(pid, "Process killing is only supported on Unix systems");
    0
}

/// Send SIGKILL; false if the process does not exist.
#[cfg(unix)]
fn kill_force(pid: u32) -> bool {
    let pid_i32 = pid as i32;
    if pid_i32 <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid_i32, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "Failed to send SIGKILL");
        }
        return false;
    }
    true
}
