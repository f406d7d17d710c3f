//! Bounded subprocess execution for the external tool adapters.
//!
//! Every external collaborator (numbering engine, HMM scorer, MSA tools) is
//! invoked through [`run_with_timeout`], which enforces a per-call deadline
//! and honors the request's [`CancelToken`].  On timeout or cancellation the
//! child is killed and reaped; no partial output is returned.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use crate::process::error::Error;

mod error {
    use std::time::Duration;

    /// Error type for subprocess invocation.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("cannot find the external command: {0}")]
        BinaryNotFound(String),
        #[error("{0} exited with {1}: {2}")]
        CommandFailed(String, String, String),
        #[error("{0} timed out after {1:?}")]
        TimedOut(String, Duration),
        #[error("request cancelled")]
        Cancelled,
        #[error("i/o error")]
        Io(#[from] std::io::Error),
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation flag carried by a request.
///
/// Cloning shares the flag.  The pipeline checks it at stage boundaries and
/// inside every subprocess poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Error::Cancelled)` if the token has fired.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Captured output of a successful subprocess run.
#[derive(Debug)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Locate an external binary on `$PATH`.
pub fn find_binary(name: &str) -> Result<PathBuf, Error> {
    which::which(name).map_err(|_| Error::BinaryNotFound(name.to_string()))
}

/// Run `cmd` to completion, killing it when `timeout` elapses or `cancel`
/// fires.  Stdout and stderr are drained on separate threads so a chatty
/// child cannot dead-lock against a full pipe.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Output, Error> {
    let program = cmd.get_program().to_string_lossy().to_string();

    cancel.check()?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout_handle = {
        let mut stream = child.stdout.take().expect("stdout was piped");
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stream.read_to_string(&mut buf);
            buf
        })
    };
    let stderr_handle = {
        let mut stream = child.stderr.take().expect("stderr was piped");
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stream.read_to_string(&mut buf);
            buf
        })
    };

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        if started.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::TimedOut(program, timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    if status.success() {
        Ok(Output { stdout, stderr })
    } else {
        let code = status
            .code()
            .map(|c| format!("status {}", c))
            .unwrap_or_else(|| "signal".to_string());
        Err(Error::CommandFailed(program, code, stderr.trim().to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::process::Command;
    use std::time::Duration;

    use super::{run_with_timeout, CancelToken, Error};

    #[test]
    fn captures_stdout() -> Result<(), anyhow::Error> {
        let out = run_with_timeout(
            Command::new("echo").arg("hello"),
            Duration::from_secs(5),
            &CancelToken::new(),
        )?;
        assert_eq!(out.stdout.trim(), "hello");
        Ok(())
    }

    #[test]
    fn reports_failure_with_stderr() {
        let res = run_with_timeout(
            Command::new("sh").args(["-c", "echo oops >&2; exit 3"]),
            Duration::from_secs(5),
            &CancelToken::new(),
        );
        match res {
            Err(Error::CommandFailed(_, code, stderr)) => {
                assert_eq!(code, "status 3");
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn kills_on_timeout() {
        let res = run_with_timeout(
            Command::new("sleep").arg("30"),
            Duration::from_millis(200),
            &CancelToken::new(),
        );
        assert!(matches!(res, Err(Error::TimedOut(_, _))));
    }

    #[test]
    fn honors_cancellation_before_spawn() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = run_with_timeout(
            Command::new("echo").arg("hello"),
            Duration::from_secs(5),
            &cancel,
        );
        assert!(matches!(res, Err(Error::Cancelled)));
    }
}
