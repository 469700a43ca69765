//! Handles to launched programs and the graceful-then-forced stop sequence.
use std::{
    fmt, io,
    process::{Child, ExitStatus},
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, warn};

use crate::{config::SlotId, error::ToggleError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a reaped program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signaled(i32),
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessExit::Code(code),
            None => ProcessExit::Signaled(status.signal().unwrap_or_default()),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "return code {code}"),
            ProcessExit::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Control surface over a single launched program.
///
/// All methods take `&self` so the supervisor and the exit watcher can share one handle.
/// `wait` and `try_wait` reap the program; once reaped, signalling is a no-op.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process id.
    fn id(&self) -> u32;

    /// Requests a graceful stop (SIGTERM).
    fn signal_graceful(&self) -> io::Result<()>;

    /// Forcefully terminates the program (SIGKILL).
    fn kill(&self) -> io::Result<()>;

    /// Blocks until the program exits.
    fn wait(&self) -> io::Result<ProcessExit>;

    /// Waits up to `timeout`, returning `Ok(None)` if the program is still running.
    fn try_wait(&self, timeout: Duration) -> io::Result<Option<ProcessExit>>;
}

/// [`ProcessHandle`] over a `std::process::Child` placed in its own process group.
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess").field("pid", &self.pid).finish()
    }
}

fn nix_error_to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> io::Error {
    io::Error::other(err.to_string())
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    /// Polls once without blocking.
    fn poll(&self) -> io::Result<Option<ProcessExit>> {
        let mut child = self.child.lock().map_err(poisoned)?;
        Ok(child.try_wait()?.map(ProcessExit::from_status))
    }

    /// Signals the program's process group, falling back to the process itself.
    ///
    /// The child lock is held across the liveness check and the signal so the pid cannot
    /// be reaped (and recycled) in between.
    fn send(&self, sig: Signal) -> io::Result<()> {
        let mut child = self.child.lock().map_err(poisoned)?;
        if child.try_wait()?.is_some() {
            debug!("PID {} already exited; not sending {sig}", self.pid);
            return Ok(());
        }

        let pid = Pid::from_raw(self.pid as i32);
        match signal::killpg(pid, sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) | Err(Errno::EPERM) => {
                debug!("Process group {pid} unavailable; signalling PID directly");
                match signal::kill(pid, sig) {
                    Ok(()) | Err(Errno::ESRCH) => Ok(()),
                    Err(err) => Err(nix_error_to_io(err)),
                }
            }
            Err(err) => Err(nix_error_to_io(err)),
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn signal_graceful(&self) -> io::Result<()> {
        self.send(Signal::SIGTERM)
    }

    fn kill(&self) -> io::Result<()> {
        self.send(Signal::SIGKILL)
    }

    fn wait(&self) -> io::Result<ProcessExit> {
        loop {
            if let Some(exit) = self.poll()? {
                return Ok(exit);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn try_wait(&self, timeout: Duration) -> io::Result<Option<ProcessExit>> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll()? {
                Some(exit) => return Ok(Some(exit)),
                None => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

/// Result of a completed stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// How the program ended.
    pub exit: ProcessExit,
    /// Whether the grace period ran out and SIGKILL was needed.
    pub forced: bool,
}

/// Graceful stop, bounded wait, then forced kill and an unconditional wait.
///
/// Only a failing kill or final wait is an error; a timed out grace period is logged as
/// [`ToggleError::StopTimeout`] and escalates.
pub fn terminate(
    slot: SlotId,
    handle: &dyn ProcessHandle,
    grace: Duration,
) -> Result<Termination, ToggleError> {
    match handle.signal_graceful() {
        Ok(()) => match handle.try_wait(grace) {
            Ok(Some(exit)) => {
                return Ok(Termination {
                    exit,
                    forced: false,
                });
            }
            Ok(None) => warn!("{}", ToggleError::StopTimeout { slot, grace }),
            Err(err) => warn!("Waiting for slot {slot} to exit failed: {err}; escalating"),
        },
        Err(err) => {
            warn!("Graceful stop for slot {slot} (PID {}) failed: {err}; escalating", handle.id());
        }
    }

    handle
        .kill()
        .map_err(|source| ToggleError::StopFailure { slot, source })?;
    let exit = handle
        .wait()
        .map_err(|source| ToggleError::StopFailure { slot, source })?;

    Ok(Termination { exit, forced: true })
}
