//! Signals sent to other processes.

use std::time::Duration;

/// Outcome of a SIGTERM / grace / SIGKILL sequence.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Exited after SIGTERM within the grace period.
    Terminated,
    /// Still alive after the grace period and sent SIGKILL.
    Killed,
    /// The signal could not be delivered (gone already, or not permitted).
    Failed,
}

/// Process control behind a trait so the monitor can be tested without
/// signalling anything real.
pub trait ProcessControl {
    fn is_alive(&self, pid: u32) -> bool;
    fn signal_term(&self, pid: u32) -> bool;
    fn signal_kill(&self, pid: u32) -> bool;

    /// SIGTERM, wait `grace`, re-check once, SIGKILL if still alive.
    fn terminate(&self, pid: u32, grace: Duration) -> Termination {
        if !self.signal_term(pid) {
            return Termination::Failed;
        }
        std::thread::sleep(grace);
        if !self.is_alive(pid) {
            return Termination::Terminated;
        }
        if self.signal_kill(pid) {
            Termination::Killed
        } else {
            Termination::Failed
        }
    }
}

/// Real signals via `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Signals;

/// `kill(2)` on a single process. The error is the raw errno.
fn send(pid: u32, sig: libc::c_int) -> Result<(), i32> {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Err(libc::ESRCH);
    };
    // pid 0 and negatives address process groups.
    if pid <= 0 {
        return Err(libc::ESRCH);
    }
    // SAFETY: kill(2) takes plain integers and touches no memory of ours;
    // pid is positive so exactly one process is addressed.
    if unsafe { libc::kill(pid, sig) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::ESRCH))
    }
}

impl ProcessControl for Signals {
    fn is_alive(&self, pid: u32) -> bool {
        is_alive(pid)
    }

    fn signal_term(&self, pid: u32) -> bool {
        send(pid, libc::SIGTERM).is_ok()
    }

    fn signal_kill(&self, pid: u32) -> bool {
        send(pid, libc::SIGKILL).is_ok()
    }
}

/// Probe with `kill(pid, 0)`. `EPERM` means the process exists but belongs
/// to another user, so it counts as alive.
pub fn is_alive(pid: u32) -> bool {
    match send(pid, 0) {
        Ok(()) => true,
        Err(errno) => errno == libc::EPERM,
    }
}
