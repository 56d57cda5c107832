//! Shipping committed archives to peer guards.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use snapconf::PublishConfig;
use snapstore::{NodeId, SnapshotArchive};
use tokio::process::Command;
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::registry::Endpoint;

#[async_trait]
pub trait ArchivePublisher: Send + Sync {
    async fn publish(&self, archive: &SnapshotArchive, peer: NodeId, endpoint: &Endpoint)
        -> Result<()>;
}

/// Used when publishing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl ArchivePublisher for NoopPublisher {
    async fn publish(&self, _: &SnapshotArchive, _: NodeId, _: &Endpoint) -> Result<()> {
        Ok(())
    }
}

/// Copies archives with `scp <archive> [user@]host:<remote_dir>/`.
#[derive(Debug, Clone)]
pub struct ScpPublisher {
    scp_path: PathBuf,
    user: Option<String>,
    remote_dir: PathBuf,
    timeout: Duration,
}

impl ScpPublisher {
    pub fn new(config: &PublishConfig, timeout: Duration) -> Self {
        Self {
            scp_path: config.scp_path.clone(),
            user: config.user.clone(),
            remote_dir: config.remote_dir.clone(),
            timeout,
        }
    }

    pub fn destination(&self, endpoint: &Endpoint) -> String {
        let host = match &self.user {
            Some(user) => format!("{}@{}", user, endpoint.host),
            None => endpoint.host.clone(),
        };
        format!("{}:{}/", host, self.remote_dir.display())
    }
}

#[async_trait]
impl ArchivePublisher for ScpPublisher {
    async fn publish(
        &self,
        archive: &SnapshotArchive,
        peer: NodeId,
        endpoint: &Endpoint,
    ) -> Result<()> {
        let destination = self.destination(endpoint);
        debug!(peer, path = %archive.path.display(), %destination, "publishing archive");

        let output = Command::new(&self.scp_path)
            .arg("-q")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&archive.path)
            .arg(&destination)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let failed = |reason: String| GuardError::ForwardFailed {
            node_id: peer,
            reason,
        };

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(failed(format!(
                "scp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(failed(format!("failed to spawn scp: {}", e))),
            Err(_) => Err(failed(format!("scp timed out after {:?}", self.timeout))),
        }
    }
}
