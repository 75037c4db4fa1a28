//! fork/exec based supervisor.
//!
//! Everything the child needs (C strings, the argv pointer table) is built
//! before `fork`. Between `fork` and `execvp` the child only makes
//! async-signal-safe calls.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::time::Instant;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, signal, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    ProcessSupervisor, ReapOutcome, SpawnError, SpawnedChild, TerminationPolicy,
    EXIT_EXEC_FAILURE, EXIT_SETUP_FAILURE,
};

/// Unix process supervisor.
#[derive(Debug, Default)]
pub struct UnixSupervisor;

impl UnixSupervisor {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
fn make_pipe() -> Result<(OwnedFd, OwnedFd), SpawnError> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| SpawnError::Pipe(e.into()))
}

#[cfg(not(target_os = "linux"))]
fn make_pipe() -> Result<(OwnedFd, OwnedFd), SpawnError> {
    use nix::fcntl::FdFlag;

    let (read, write) = nix::unistd::pipe().map_err(|e| SpawnError::Pipe(e.into()))?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| SpawnError::Pipe(e.into()))?;
    }
    Ok((read, write))
}

fn set_nonblocking(file: &File) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Write a fixed message to stderr and leave without running destructors.
unsafe fn child_fail(code: i32, msg: &[u8]) -> ! {
    libc::write(2, msg.as_ptr().cast(), msg.len());
    libc::_exit(code)
}

/// Close every descriptor from `lowest` upward.
unsafe fn close_from(lowest: RawFd) {
    #[cfg(target_os = "linux")]
    {
        if libc::syscall(libc::SYS_close_range, lowest as libc::c_uint, libc::c_uint::MAX, 0) == 0 {
            return;
        }
    }
    let max = match libc::sysconf(libc::_SC_OPEN_MAX) {
        n if n > 0 => n.min(65_536) as RawFd,
        _ => 1024,
    };
    for fd in lowest..max {
        libc::close(fd);
    }
}

/// Put `fd` on `target` with close-on-exec cleared. `dup2` onto itself keeps
/// the flag, so an end already in place only gets its flag reset.
unsafe fn install_stdio(fd: RawFd, target: RawFd) -> bool {
    if fd == target {
        libc::fcntl(fd, libc::F_SETFD, 0) == 0
    } else {
        libc::dup2(fd, target) >= 0
    }
}

/// Child side of the fork. Never returns.
unsafe fn exec_child(stdin_fd: RawFd, stdout_fd: RawFd, program: &CStr, argv: &[*const c_char]) -> ! {
    if sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None).is_err() {
        child_fail(EXIT_SETUP_FAILURE, b"asub-exec: cannot reset signal mask\n");
    }
    // The host ignores SIGPIPE; the child should not inherit that.
    if signal(Signal::SIGPIPE, SigHandler::SigDfl).is_err() {
        child_fail(EXIT_SETUP_FAILURE, b"asub-exec: cannot reset SIGPIPE\n");
    }
    // A host running with fd 0 or 1 closed gets pipe ends on those numbers.
    // Move a stdout end sitting on 0 out of the way before stdin lands there.
    let stdout_fd = if stdout_fd == 0 {
        libc::fcntl(stdout_fd, libc::F_DUPFD, 3)
    } else {
        stdout_fd
    };
    if stdout_fd < 0 || !install_stdio(stdin_fd, 0) || !install_stdio(stdout_fd, 1) {
        child_fail(EXIT_SETUP_FAILURE, b"asub-exec: cannot redirect stdio\n");
    }
    close_from(3);
    libc::execvp(program.as_ptr(), argv.as_ptr());
    child_fail(EXIT_EXEC_FAILURE, b"asub-exec: exec failed\n")
}

/// Blocking wait after SIGKILL.
fn wait_blocking(pid: Pid) -> Result<WaitStatus, Errno> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn kill_and_reap(pid: Pid) -> bool {
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        warn!(pid = pid.as_raw(), error = %e, "SIGKILL failed");
    }
    match wait_blocking(pid) {
        Ok(_) => true,
        Err(e) => {
            error!(pid = pid.as_raw(), error = %e, "final wait failed");
            false
        }
    }
}

impl ProcessSupervisor for UnixSupervisor {
    fn spawn(&self, argv: &[String]) -> Result<SpawnedChild, SpawnError> {
        let program = argv.first().ok_or(SpawnError::EmptyArgv)?;
        let c_args = argv
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|_| SpawnError::InvalidArgument(a.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let mut c_argv: Vec<*const c_char> = c_args.iter().map(|a| a.as_ptr()).collect();
        c_argv.push(std::ptr::null());

        // child stdin <- to_child, from_child <- child stdout
        let (child_stdin, to_child) = make_pipe()?;
        let (from_child, child_stdout) = make_pipe()?;

        // SAFETY: the child branch only performs async-signal-safe calls on
        // memory prepared above, then execs or _exits.
        match unsafe { fork() } {
            Err(e) => Err(SpawnError::Fork(e.into())),
            Ok(ForkResult::Child) => unsafe {
                exec_child(
                    child_stdin.as_raw_fd(),
                    child_stdout.as_raw_fd(),
                    &c_args[0],
                    &c_argv,
                )
            },
            Ok(ForkResult::Parent { child }) => {
                drop(child_stdin);
                drop(child_stdout);
                let input = File::from(to_child);
                let output = File::from(from_child);
                if let Err(e) = set_nonblocking(&input).and_then(|()| set_nonblocking(&output)) {
                    kill_and_reap(child);
                    return Err(SpawnError::NonBlocking(e));
                }
                debug!(pid = child.as_raw(), program = %program, "spawned child");
                Ok(SpawnedChild {
                    pid: child.as_raw(),
                    input,
                    output,
                })
            }
        }
    }

    fn terminate_and_reap(
        &self,
        pid: i32,
        policy: &TerminationPolicy,
        shutdown: &CancellationToken,
    ) -> ReapOutcome {
        let pid = Pid::from_raw(pid);
        let start = Instant::now();
        let mut term_sent = false;

        loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(p, code)) if p == pid => {
                    debug!(pid = p.as_raw(), code, "child exited");
                    return if term_sent {
                        ReapOutcome::terminated()
                    } else {
                        ReapOutcome::exited(code)
                    };
                }
                Ok(WaitStatus::Signaled(p, sig, _)) if p == pid => {
                    debug!(pid = p.as_raw(), signal = %sig, "child killed by signal");
                    return if term_sent {
                        ReapOutcome::terminated()
                    } else {
                        ReapOutcome::signaled(sig as i32)
                    };
                }
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) if status.pid() != Some(pid) => {
                    error!(pid = pid.as_raw(), ?status, "wait reported an unexpected process");
                    return ReapOutcome::anomaly();
                }
                // stopped/continued: keep waiting for a real exit
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(pid = pid.as_raw(), error = %e, "wait failed");
                    return ReapOutcome::anomaly();
                }
            }

            if shutdown.is_cancelled() {
                warn!(pid = pid.as_raw(), "shutdown requested, killing child");
                return if kill_and_reap(pid) {
                    ReapOutcome::cancelled()
                } else {
                    ReapOutcome::anomaly()
                };
            }

            let elapsed = start.elapsed();
            if elapsed >= policy.kill_after {
                warn!(pid = pid.as_raw(), "child ignored SIGTERM, sending SIGKILL");
                return if kill_and_reap(pid) {
                    ReapOutcome::terminated()
                } else {
                    ReapOutcome::anomaly()
                };
            }
            if !term_sent && elapsed >= policy.term_after {
                warn!(pid = pid.as_raw(), "child still running, sending SIGTERM");
                if let Err(e) = kill(pid, Signal::SIGTERM) {
                    warn!(pid = pid.as_raw(), error = %e, "SIGTERM failed");
                }
                term_sent = true;
            }

            std::thread::sleep(policy.poll_interval);
        }
    }
}
