//! Handle to a spawned engine process.

use std::io;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::SUPERVISOR_TARGET;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The one engine process owned by an instance.
#[derive(Debug)]
pub(super) struct ServerProcess {
    child: Child,
    pid: u32,
}

impl ServerProcess {
    pub(super) fn new(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }

    pub(super) const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process is still running. Reaps it if it has exited.
    pub(super) fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: SUPERVISOR_TARGET, pid = self.pid, %status, "engine process exited");
                false
            }
            Ok(None) => true,
            Err(_) => pid_is_alive(self.pid),
        }
    }

    /// Sends the OS-level kill. An already exited process is not an error.
    pub(super) fn kill(&mut self) {
        match self.child.kill() {
            Ok(()) => debug!(target: SUPERVISOR_TARGET, pid = self.pid, "engine process killed"),
            Err(error) if error.kind() == io::ErrorKind::InvalidInput => {}
            Err(error) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    pid = self.pid,
                    error = %error,
                    "failed to kill engine process"
                );
            }
        }
    }

    /// Polls until the process exits or `timeout` elapses. Returns whether it
    /// exited.
    pub(super) fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Kills the process and waits for it, giving up after `timeout`.
    pub(super) fn terminate(&mut self, timeout: Duration) -> bool {
        if !self.is_alive() {
            return true;
        }
        self.kill();
        self.wait_for_exit(timeout)
    }
}

/// Whether `pid` names a live process.
///
/// Permission errors mean the process exists but belongs to someone else.
#[cfg(unix)]
#[must_use]
pub fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether `pid` names a live process.
#[cfg(not(unix))]
#[must_use]
pub fn pid_is_alive(_pid: u32) -> bool {
    false
}
