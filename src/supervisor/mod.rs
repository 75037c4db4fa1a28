//! Child process supervision.
//!
//! Spawns the child program with its stdin and stdout wired to a pair of
//! pipes, and later reaps it, escalating from SIGTERM to SIGKILL when it
//! does not exit on its own. Platform specifics live behind
//! [`ProcessSupervisor`].

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::UnixSupervisor;

use std::fs::File;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Child could not set up its stdio or signal state.
pub const EXIT_SETUP_FAILURE: i32 = 128;
/// `execvp` failed in the child.
pub const EXIT_EXEC_FAILURE: i32 = 129;
/// The supervisor had to terminate the child.
pub const EXIT_TIMEOUT: i32 = 130;
/// Waiting for the child failed or returned something unexpected.
pub const EXIT_WAIT_FAILURE: i32 = 131;

/// Timing of the reap phase, measured from the start of
/// [`ProcessSupervisor::terminate_and_reap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Delay between non-blocking waits.
    pub poll_interval: Duration,
    /// When SIGTERM is sent.
    pub term_after: Duration,
    /// When SIGKILL is sent, followed by a blocking wait.
    pub kill_after: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            term_after: Duration::from_millis(100),
            kill_after: Duration::from_millis(2100),
        }
    }
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Empty argument vector")]
    EmptyArgv,

    #[error("Argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("Failed to create pipe: {0}")]
    Pipe(std::io::Error),

    #[error("Fork failed: {0}")]
    Fork(std::io::Error),

    #[error("Failed to make pipe non-blocking: {0}")]
    NonBlocking(std::io::Error),

    #[error("Process spawning is not supported on this platform")]
    Unsupported,
}

/// A running child and the host's ends of its pipes.
///
/// `input` is the write end feeding the child's stdin, `output` the read
/// end draining its stdout. Both are non-blocking and close-on-exec.
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: i32,
    pub input: File,
    pub output: File,
}

/// How the reap phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapStatus {
    /// Exited by itself; exit code is its own.
    Exited,
    /// Killed by a signal the supervisor did not send; exit code is `-signo`.
    Signaled,
    /// Did not exit in time and was terminated (SIGTERM or SIGKILL).
    Terminated,
    /// Shutdown was requested; the child was killed and reaped.
    Cancelled,
    /// `waitpid` failed or reported another process.
    Anomaly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapOutcome {
    pub exit_code: i32,
    pub status: ReapStatus,
}

impl ReapOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: code,
            status: ReapStatus::Exited,
        }
    }

    pub fn signaled(signo: i32) -> Self {
        Self {
            exit_code: -signo,
            status: ReapStatus::Signaled,
        }
    }

    pub fn terminated() -> Self {
        Self {
            exit_code: EXIT_TIMEOUT,
            status: ReapStatus::Terminated,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            exit_code: EXIT_TIMEOUT,
            status: ReapStatus::Cancelled,
        }
    }

    pub fn anomaly() -> Self {
        Self {
            exit_code: EXIT_WAIT_FAILURE,
            status: ReapStatus::Anomaly,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        self.status == ReapStatus::Anomaly
    }
}

/// Process creation and reaping.
pub trait ProcessSupervisor: Send + Sync {
    /// Start `argv[0]` (looked up on `PATH`) with `argv` as its arguments.
    fn spawn(&self, argv: &[String]) -> Result<SpawnedChild, SpawnError>;

    /// Wait for `pid` to exit, terminating it per `policy`. Must be called
    /// exactly once per successful spawn; never leaves a zombie behind.
    fn terminate_and_reap(
        &self,
        pid: i32,
        policy: &TerminationPolicy,
        shutdown: &CancellationToken,
    ) -> ReapOutcome;
}

/// Supervisor for platforms without fork/exec.
#[derive(Debug, Default)]
pub struct UnsupportedSupervisor;

impl ProcessSupervisor for UnsupportedSupervisor {
    fn spawn(&self, _argv: &[String]) -> Result<SpawnedChild, SpawnError> {
        Err(SpawnError::Unsupported)
    }

    fn terminate_and_reap(
        &self,
        _pid: i32,
        _policy: &TerminationPolicy,
        _shutdown: &CancellationToken,
    ) -> ReapOutcome {
        ReapOutcome::anomaly()
    }
}

/// Create the supervisor for the current platform.
pub fn create_supervisor() -> Box<dyn ProcessSupervisor> {
    #[cfg(unix)]
    {
        Box::new(UnixSupervisor::new())
    }
    #[cfg(not(unix))]
    {
        Box::new(UnsupportedSupervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_timings() {
        let policy = TerminationPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_millis(50));
        assert_eq!(policy.term_after, Duration::from_millis(100));
        assert_eq!(policy.kill_after, Duration::from_millis(2100));
    }

    #[test]
    fn signal_deaths_are_negative() {
        assert_eq!(ReapOutcome::signaled(9).exit_code, -9);
        assert_eq!(ReapOutcome::terminated().exit_code, 130);
        assert!(ReapOutcome::anomaly().is_anomaly());
    }

    #[test]
    fn unsupported_supervisor_refuses() {
        let err = UnsupportedSupervisor.spawn(&["true".into()]).unwrap_err();
        assert!(matches!(err, SpawnError::Unsupported));
    }
}
