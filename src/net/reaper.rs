//! Forceful termination of port occupants.
//!
//! # Responsibilities
//! - Send SIGKILL to every PID in an occupancy report
//! - Treat "no such process" as success (the goal state already holds)
//! - Never signal PID 0, negative PIDs or the current process
//!
//! # Design Decisions
//! - Failures are logged and summarised, never propagated: the bind attempt
//!   that follows is the real test of whether the port is free
//! - Waiting for the kernel to release the socket is the caller's job

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;

/// Result of signalling a single PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Signal delivered.
    Signalled,
    /// The process was already gone.
    AlreadyExited,
}

/// Capability: forcefully terminate a process.
pub trait ProcessKiller: Send + Sync {
    fn kill(&self, pid: u32) -> std::io::Result<KillOutcome>;
}

/// Kills with `SIGKILL` via `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalKiller;

impl ProcessKiller for SignalKiller {
    fn kill(&self, pid: u32) -> std::io::Result<KillOutcome> {
        let raw = i32::try_from(pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
        })?;

        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Signalled),
            Err(Errno::ESRCH) => Ok(KillOutcome::AlreadyExited),
            Err(errno) => Err(errno.into()),
        }
    }
}

/// What a `terminate` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub signalled: Vec<u32>,
    pub already_exited: Vec<u32>,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
}

impl ReapSummary {
    /// Whether any signal was actually attempted.
    pub fn attempted_any(&self) -> bool {
        !(self.signalled.is_empty() && self.already_exited.is_empty() && self.failed.is_empty())
    }
}

/// Terminates sets of PIDs through a `ProcessKiller`.
#[derive(Debug, Clone)]
pub struct ProcessReaper<K> {
    killer: K,
    own_pid: u32,
}

impl<K: ProcessKiller> ProcessReaper<K> {
    pub fn new(killer: K) -> Self {
        Self {
            killer,
            own_pid: std::process::id(),
        }
    }

    /// Kill every PID in `pids`. Errors are logged, never returned.
    pub fn terminate(&self, pids: &BTreeSet<u32>) -> ReapSummary {
        let mut summary = ReapSummary::default();

        for &pid in pids {
            if pid == 0 || pid == self.own_pid || i32::try_from(pid).is_err() {
                tracing::warn!(pid, "Refusing to terminate pid");
                summary.skipped.push(pid);
                continue;
            }

            match self.killer.kill(pid) {
                Ok(KillOutcome::Signalled) => {
                    tracing::info!(pid, "Sent SIGKILL to port occupant");
                    summary.signalled.push(pid);
                }
                Ok(KillOutcome::AlreadyExited) => {
                    tracing::debug!(pid, "Port occupant already exited");
                    summary.already_exited.push(pid);
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to terminate port occupant");
                    summary.failed.push(pid);
                }
            }
        }

        summary
    }
}
