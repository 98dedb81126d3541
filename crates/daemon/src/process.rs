// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal delivery and liveness probes for worker processes.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

fn pid_of(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

/// Ask a worker to wind down (SIGTERM).
pub fn terminate(pid: u32) -> std::io::Result<()> {
    kill(pid_of(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

/// Forcibly kill a worker (SIGKILL).
pub fn force_kill(pid: u32) -> std::io::Result<()> {
    kill(pid_of(pid), Signal::SIGKILL).map_err(std::io::Error::from)
}

/// Whether a process with this pid currently exists.
///
/// Signal 0 probes existence without delivering anything. EPERM means
/// the pid exists but belongs to another user; that still counts as
/// alive for reconciliation purposes.
pub fn alive(pid: u32) -> bool {
    match kill(pid_of(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether the process appears to be the expected worker executable.
///
/// Reads `/proc/<pid>/cmdline` where available and matches the program
/// basename. On platforms without procfs a live pid is trusted.
pub fn belongs_to(pid: u32, program: &str) -> bool {
    let cmdline_path = format!("/proc/{pid}/cmdline");
    let Ok(raw) = std::fs::read(&cmdline_path) else {
        return true;
    };
    let argv0 = raw.split(|b| *b == 0).next().unwrap_or_default();
    let argv0 = String::from_utf8_lossy(argv0);
    let wanted = program.rsplit('/').next().unwrap_or(program);
    argv0.rsplit('/').next().unwrap_or(&argv0) == wanted
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
