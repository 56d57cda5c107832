//! Settings for checkpoint/restore execution: the snapshot tool, the store,
//! the per-node executor and archive publication.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External snapshot tool (CRIU) invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Default: /sbin/criu
    pub criu_path: PathBuf,

    /// Passed as `-v<N>`.
    /// Default: 4
    pub verbosity: u8,

    /// Upper bound for a single tool invocation. A timeout counts as failure.
    /// Default: 300
    pub timeout_secs: u64,

    /// Extra attempts after a failed invocation. Never applies to termination.
    /// Default: 0
    pub retries: u32,

    /// Pass `--shell-job` (target attached to a terminal session).
    /// Default: false
    pub shell_job: bool,

    /// How long to wait for a killed target to disappear before replay.
    /// Default: 2000
    pub termination_grace_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            criu_path: PathBuf::from("/sbin/criu"),
            verbosity: 4,
            timeout_secs: 300,
            retries: 0,
            shell_job: false,
            termination_grace_ms: 2000,
        }
    }
}

/// Snapshot store behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Wipe every archive when the guard starts.
    /// Default: true
    pub reset_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reset_on_start: true,
        }
    }
}

/// Per-node operation executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Operations that may wait behind the running one.
    /// Default: 16
    pub queue_capacity: usize,

    /// Completed operation outcomes kept for status queries.
    /// Default: 32
    pub history_len: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            history_len: 32,
        }
    }
}

/// Copying committed archives to peer guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Default: false
    pub enabled: bool,

    /// Node ids that receive a copy of every local archive.
    pub peers: Vec<u32>,

    /// Destination directory on the peer.
    /// Default: /tmp/checkpoint_store/incoming
    pub remote_dir: PathBuf,

    /// Default: scp
    pub scp_path: PathBuf,

    /// Remote login; unset uses the scp default.
    pub user: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            peers: Vec::new(),
            remote_dir: PathBuf::from("/tmp/checkpoint_store/incoming"),
            scp_path: PathBuf::from("scp"),
            user: None,
        }
    }
}
