//! Child process with a combined stdout/stderr pipe.
//!
//! # Invariants
//! - The child is reaped exactly once; `pid` is -1 afterwards.
//! - The read end of the pipe is exclusively owned here; nobody else may
//!   signal or wait on the child.
//! - The read side is closed before the child is reaped, on every path.
//! - Drop never blocks indefinitely: SIGTERM, short grace, SIGKILL, reap.

use std::ffi::CString;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PIPE_MAX_OUTPUT_BYTES;
use crate::os::fd::OwnedFd;
use crate::os::interrupt::{stop_requested, CancelToken};

const OUTPUT_TRUNCATED_SENTINEL: &str = "\n[Output truncated (too large)]";
/// Grace between SIGTERM and SIGKILL on cancellation/timeout paths.
const KILL_GRACE: Duration = Duration::from_millis(100);
/// Shorter grace used from Drop, which must stay prompt.
const DROP_GRACE: Duration = Duration::from_millis(30);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A forked child whose stdout and stderr feed one pipe.
pub struct ChildPipe {
    pid: libc::pid_t,
    read_fd: OwnedFd,
}

enum ReadStop {
    Eof,
    Truncated,
    TimedOut,
    Cancelled,
    Failed(String),
}

impl ChildPipe {
    /// Forks and execs `argv[0]` with the given arguments. In the child, the
    /// pipe's write end is duplicated onto stdout and stderr before `execvp`;
    /// exec failure exits with status 127.
    pub fn spawn(argv: &[String]) -> Result<Self, String> {
        if argv.is_empty() {
            return Err("ChildPipe: empty argument list".to_string());
        }
        let c_args: Vec<CString> = argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| "ChildPipe: argument contains NUL byte".to_string())?;
        let mut arg_ptrs: Vec<*const libc::c_char> =
            c_args.iter().map(|arg| arg.as_ptr()).collect();
        arg_ptrs.push(std::ptr::null());

        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(format!(
                "Failed to create pipe: {}",
                io::Error::last_os_error()
            ));
        }

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(format!("Failed to fork process: {err}"));
        }

        if pid == 0 {
            // Child. Only async-signal-safe calls until exec.
            unsafe {
                if libc::dup2(fds[1], libc::STDOUT_FILENO) == -1 {
                    libc::_exit(127);
                }
                if libc::dup2(fds[1], libc::STDERR_FILENO) == -1 {
                    libc::_exit(127);
                }
                libc::close(fds[0]);
                libc::close(fds[1]);

                libc::execvp(arg_ptrs[0], arg_ptrs.as_ptr());

                let msg = b"Failed to execute binary\n";
                libc::write(libc::STDOUT_FILENO, msg.as_ptr().cast(), msg.len());
                libc::_exit(127);
            }
        }

        unsafe { libc::close(fds[1]) };
        let read_fd = match OwnedFd::wrap(fds[0]) {
            Ok(fd) => fd,
            Err(err) => return Err(format!("Failed to adopt pipe descriptor: {err}")),
        };
        Ok(Self { pid, read_fd })
    }

    /// Kernel pid of the child; -1 once reaped.
    #[inline]
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Reads the combined output until EOF, the timeout, cancellation, or the
    /// output cap. The cap truncates with a sentinel suffix and returns
    /// normally; the other early exits terminate the child and fail.
    ///
    /// A non-zero exit status fails when the output is empty or
    /// `raise_on_nonzero_exit` is set. A signaled child always fails, naming
    /// the signal.
    pub fn read_all(
        &mut self,
        timeout: Duration,
        cancel: Option<&CancelToken>,
        raise_on_nonzero_exit: bool,
    ) -> Result<String, String> {
        debug_assert!(self.pid > 0, "read_all on a reaped child");

        let deadline = Instant::now() + timeout;
        let mut out: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];

        let stop = loop {
            if self.stop_now(cancel) {
                break ReadStop::Cancelled;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break ReadStop::TimedOut;
            }

            // Poll slices are capped so cancellation is observed within
            // ~100 ms even while the child is silent.
            let wait_ms = remaining.as_millis().min(100) as libc::c_int;
            let mut pfd = libc::pollfd {
                fd: self.read_fd.raw(),
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pfd, 1, wait_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break ReadStop::Failed(format!("Failed to poll pipe: {err}"));
            }
            if rc == 0 {
                continue;
            }
            if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
                continue;
            }

            let n = unsafe {
                libc::read(
                    self.read_fd.raw(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if n > 0 {
                let n = n as usize;
                if out.len() + n > PIPE_MAX_OUTPUT_BYTES {
                    let take = PIPE_MAX_OUTPUT_BYTES - out.len();
                    out.extend_from_slice(&buf[..take]);
                    out.extend_from_slice(OUTPUT_TRUNCATED_SENTINEL.as_bytes());
                    break ReadStop::Truncated;
                }
                out.extend_from_slice(&buf[..n]);
                continue;
            }
            if n == 0 {
                break ReadStop::Eof;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break ReadStop::Failed(format!("Failed to read from pipe: {err}"));
        };

        // Read side goes down before the child is reaped.
        self.read_fd.reset(-1);

        let text = String::from_utf8_lossy(&out).into_owned();
        match stop {
            ReadStop::Cancelled => {
                self.terminate_and_reap(KILL_GRACE);
                Err("Operation interrupted by user".to_string())
            }
            ReadStop::TimedOut => {
                self.terminate_and_reap(KILL_GRACE);
                Err(format!(
                    "Child process timed out after {:.1} s",
                    timeout.as_secs_f64()
                ))
            }
            ReadStop::Failed(err) => {
                self.terminate_and_reap(KILL_GRACE);
                Err(err)
            }
            ReadStop::Truncated => {
                // The writer may now be blocked on a full pipe with nobody
                // reading; stop it rather than waiting for a natural exit.
                self.terminate_and_reap(KILL_GRACE);
                Ok(text)
            }
            ReadStop::Eof => {
                let status = self.reap_blocking()?;
                if libc::WIFSIGNALED(status) {
                    let sig = libc::WTERMSIG(status);
                    return Err(format!(
                        "Child terminated by signal {} ({sig})",
                        signal_name(sig)
                    ));
                }
                let code = if libc::WIFEXITED(status) {
                    libc::WEXITSTATUS(status)
                } else {
                    0
                };
                if code != 0 && (text.trim().is_empty() || raise_on_nonzero_exit) {
                    let mut msg = format!("Child exited with code {code}");
                    if !text.trim().is_empty() {
                        msg.push_str(": ");
                        msg.push_str(text.trim());
                    }
                    return Err(msg);
                }
                Ok(text)
            }
        }
    }

    fn stop_now(&self, cancel: Option<&CancelToken>) -> bool {
        match cancel {
            Some(token) => stop_requested(token),
            None => crate::os::interrupt::is_interrupted(),
        }
    }

    /// SIGTERM, bounded grace, SIGKILL, reap. Idempotent.
    fn terminate_and_reap(&mut self, grace: Duration) {
        if self.pid <= 0 {
            return;
        }
        unsafe { libc::kill(self.pid, libc::SIGTERM) };
        if !self.wait_exit_within(grace) {
            unsafe { libc::kill(self.pid, libc::SIGKILL) };
            let _ = self.reap_blocking();
        }
    }

    /// Non-blocking reap loop bounded by `grace`. True when the child was
    /// collected (or is already gone).
    fn wait_exit_within(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let mut status = 0 as libc::c_int;
            let rc = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
            if rc == self.pid {
                self.pid = -1;
                return true;
            }
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // ECHILD: somebody else cannot have reaped it, so the child
                // is simply gone.
                self.pid = -1;
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    fn reap_blocking(&mut self) -> Result<libc::c_int, String> {
        loop {
            let mut status = 0 as libc::c_int;
            let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if rc == self.pid {
                self.pid = -1;
                return Ok(status);
            }
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.pid = -1;
                return Err(format!("Failed to reap child: {err}"));
            }
        }
    }
}

impl Drop for ChildPipe {
    fn drop(&mut self) {
        self.read_fd.reset(-1);
        if self.pid > 0 {
            self.terminate_and_reap(DROP_GRACE);
        }
    }
}

fn signal_name(sig: libc::c_int) -> &'static str {
    match sig {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGKILL => "SIGKILL",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGHUP => "SIGHUP",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGABRT => "SIGABRT",
        libc::SIGSEGV => "SIGSEGV",
        _ => "unknown signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn child_is_reaped(pid: libc::pid_t) -> bool {
        let mut status = 0;
        let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        rc == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::ECHILD)
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let mut pipe =
            ChildPipe::spawn(&args(&["/bin/sh", "-c", "echo out; echo err 1>&2"])).unwrap();
        let out = pipe
            .read_all(Duration::from_secs(5), None, false)
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(ChildPipe::spawn(&[]).is_err());
    }

    #[test]
    fn nonzero_exit_with_empty_output_fails() {
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "exit 3"])).unwrap();
        let err = pipe
            .read_all(Duration::from_secs(5), None, false)
            .unwrap_err();
        assert!(err.contains("exited with code 3"), "{err}");
    }

    #[test]
    fn nonzero_exit_with_output_passes_unless_raised() {
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "echo partial; exit 2"])).unwrap();
        let out = pipe
            .read_all(Duration::from_secs(5), None, false)
            .unwrap();
        assert!(out.contains("partial"));

        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "echo partial; exit 2"])).unwrap();
        let err = pipe
            .read_all(Duration::from_secs(5), None, true)
            .unwrap_err();
        assert!(err.contains("exited with code 2"), "{err}");
        assert!(err.contains("partial"), "{err}");
    }

    #[test]
    fn exec_failure_exits_127() {
        let mut pipe = ChildPipe::spawn(&args(&["/definitely/not/a/binary"])).unwrap();
        let err = pipe
            .read_all(Duration::from_secs(5), None, true)
            .unwrap_err();
        assert!(err.contains("exited with code 127"), "{err}");
    }

    #[test]
    fn timeout_kills_and_reports() {
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "sleep 30"])).unwrap();
        let pid = pipe.pid();
        let started = Instant::now();
        let err = pipe
            .read_all(Duration::from_millis(200), None, false)
            .unwrap_err();
        assert!(err.contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child_is_reaped(pid));
        assert_eq!(pipe.pid(), -1);
    }

    #[test]
    fn cancellation_terminates_child() {
        let token = CancelToken::new();
        token.cancel();
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "sleep 30"])).unwrap();
        let pid = pipe.pid();
        let err = pipe
            .read_all(Duration::from_secs(10), Some(&token), false)
            .unwrap_err();
        assert_eq!(err, "Operation interrupted by user");
        assert!(child_is_reaped(pid));
    }

    #[test]
    fn signaled_child_names_the_signal() {
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "kill -SEGV $$"])).unwrap();
        let pid = pipe.pid();
        let err = pipe
            .read_all(Duration::from_secs(5), None, false)
            .unwrap_err();
        assert!(err.contains("SIGSEGV"), "{err}");
        assert!(child_is_reaped(pid));
    }

    #[test]
    fn oversized_output_is_truncated_cleanly() {
        // Just over the cap; head exits once it has written everything.
        let cmd = format!(
            "head -c {} /dev/zero | tr '\\0' 'a'",
            PIPE_MAX_OUTPUT_BYTES + 4096
        );
        let mut pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", &cmd])).unwrap();
        let pid = pipe.pid();
        let out = pipe
            .read_all(Duration::from_secs(30), None, false)
            .unwrap();
        assert!(out.ends_with(OUTPUT_TRUNCATED_SENTINEL));
        assert_eq!(
            out.len(),
            PIPE_MAX_OUTPUT_BYTES + OUTPUT_TRUNCATED_SENTINEL.len()
        );
        assert!(child_is_reaped(pid));
    }

    #[test]
    fn drop_reaps_running_child() {
        let pid;
        {
            let pipe = ChildPipe::spawn(&args(&["/bin/sh", "-c", "sleep 30"])).unwrap();
            pid = pipe.pid();
        }
        assert!(child_is_reaped(pid));
    }
}
