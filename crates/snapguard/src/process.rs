//! Forced termination of the target process.

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// Kill `pid` and wait until it is gone. One signal, never retried.
    async fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// SIGKILL followed by a bounded wait for the process to disappear.
#[derive(Debug, Clone)]
pub struct SignalTerminator {
    grace: Duration,
    poll_interval: Duration,
}

impl SignalTerminator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[async_trait]
impl ProcessTerminator for SignalTerminator {
    async fn terminate(&self, pid: u32) -> io::Result<()> {
        let raw = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {}", pid)))?;
        if raw <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {}", pid),
            ));
        }

        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!(pid, "target already gone");
                return Ok(());
            }
            return Err(err);
        }

        let deadline = Instant::now() + self.grace;
        loop {
            if !is_alive(raw) {
                debug!(pid, "target terminated");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("pid {} still alive after {:?}", pid, self.grace),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// A zombie counts as gone: it holds no resources the replay needs.
fn is_alive(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc != 0 {
        return io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH);
    }

    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => process_state(&stat) != Some('Z'),
        Err(_) => false,
    }
}

/// State field of `/proc/<pid>/stat`; the comm field may contain spaces and parens.
fn process_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}
