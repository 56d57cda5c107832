//! External snapshot tool driver.
//!
//! The guard never inspects process memory itself. It shells out to CRIU
//! and treats exit status 0 as success.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use snapconf::ToolConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GuardError, Result};

/// Name of the pidfile the tool writes inside the restore workspace.
pub const RESTORE_PIDFILE: &str = "restored.pid";

#[async_trait]
pub trait SnapshotTool: Send + Sync {
    /// Dump `pid` into `images_dir`, leaving the process running.
    async fn dump(&self, pid: u32, images_dir: &Path) -> Result<()>;

    /// Replay the images in `images_dir` and return the new pid.
    async fn restore(&self, images_dir: &Path) -> Result<u32>;
}

/// Drives the `criu` binary.
#[derive(Debug, Clone)]
pub struct CriuTool {
    config: ToolConfig,
}

impl CriuTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn verbosity(&self) -> String {
        format!("-v{}", self.config.verbosity)
    }

    pub fn dump_args(&self, pid: u32, images_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "dump".to_string(),
            self.verbosity(),
            "--leave-running".to_string(),
            "-D".to_string(),
            images_dir.display().to_string(),
            "-t".to_string(),
            pid.to_string(),
        ];
        if self.config.shell_job {
            args.push("--shell-job".to_string());
        }
        args
    }

    pub fn restore_args(&self, images_dir: &Path, pidfile: &Path) -> Vec<String> {
        let mut args = vec![
            "restore".to_string(),
            self.verbosity(),
            "-d".to_string(),
            "-D".to_string(),
            images_dir.display().to_string(),
            "--pidfile".to_string(),
            pidfile.display().to_string(),
        ];
        if self.config.shell_job {
            args.push("--shell-job".to_string());
        }
        args
    }

    /// Run the tool once per attempt until it exits 0.
    async fn run(&self, args: &[String]) -> Result<()> {
        let attempts = self.config.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.run_once(args).await {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    warn!(
                        tool = %self.config.criu_path.display(),
                        attempt,
                        attempts,
                        "snapshot tool attempt failed: {}",
                        reason
                    );
                    last_error = reason;
                }
            }
        }

        Err(GuardError::SnapshotToolFailure(last_error))
    }

    async fn run_once(&self, args: &[String]) -> std::result::Result<(), String> {
        debug!(tool = %self.config.criu_path.display(), ?args, "running snapshot tool");

        let child = Command::new(&self.config.criu_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(format!(
                    "failed to spawn {}: {}",
                    self.config.criu_path.display(),
                    e
                ))
            }
            Err(_) => return Err(format!("timed out after {}s", self.config.timeout_secs)),
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim();
        Err(match output.status.code() {
            Some(code) => format!("exited with status {}: {}", code, tail),
            None => format!("terminated by signal: {}", tail),
        })
    }
}

#[async_trait]
impl SnapshotTool for CriuTool {
    async fn dump(&self, pid: u32, images_dir: &Path) -> Result<()> {
        self.run(&self.dump_args(pid, images_dir)).await
    }

    async fn restore(&self, images_dir: &Path) -> Result<u32> {
        let pidfile = pidfile_path(images_dir);
        self.run(&self.restore_args(images_dir, &pidfile)).await?;
        read_pidfile(&pidfile).await
    }
}

pub fn pidfile_path(images_dir: &Path) -> PathBuf {
    images_dir.join(RESTORE_PIDFILE)
}

/// Parse the pid written by the tool after a restore.
pub async fn read_pidfile(path: &Path) -> Result<u32> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        GuardError::SnapshotToolFailure(format!("cannot read pidfile {}: {}", path.display(), e))
    })?;

    contents.trim().parse().map_err(|_| {
        GuardError::SnapshotToolFailure(format!(
            "pidfile {} does not contain a pid: {:?}",
            path.display(),
            contents.trim()
        ))
    })
}
