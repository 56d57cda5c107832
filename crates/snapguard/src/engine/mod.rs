//! Checkpoint and restore engines.
//!
//! Engines own the multi-step sequences (tool, archive, store, process
//! handle). They run one at a time under the node executor, which is the
//! only caller.

mod checkpoint;
mod restore;

pub use checkpoint::CheckpointEngine;
pub use restore::RestoreEngine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use snapstore::{NodeId, Round, SnapshotStore, SnapshotVersion};
use tempfile::TempDir;

use crate::error::{GuardError, Result};
use crate::executor::{Operation, OperationRunner};
use crate::identity::{GuardIdentity, TargetProcess};
use crate::process::ProcessTerminator;
use crate::publish::ArchivePublisher;
use crate::registry::NodeRegistry;
use crate::tool::SnapshotTool;

/// Everything the engines act on, wired once at startup.
#[derive(Clone)]
pub struct EngineContext {
    pub identity: GuardIdentity,
    pub store: Arc<dyn SnapshotStore>,
    pub tool: Arc<dyn SnapshotTool>,
    pub terminator: Arc<dyn ProcessTerminator>,
    pub publisher: Arc<dyn ArchivePublisher>,
    pub registry: Arc<NodeRegistry>,
    pub target: Arc<TargetProcess>,
    /// Parent of per-operation temporary workspaces.
    pub work_dir: PathBuf,
    /// Peers that receive a copy of every committed archive.
    pub publish_peers: Vec<NodeId>,
}

impl EngineContext {
    pub fn node_id(&self) -> NodeId {
        self.identity.node_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointOutcome {
    pub version: SnapshotVersion,
    pub round: Round,
    pub size_bytes: u64,
    pub path: PathBuf,
    /// Peers the archive reached.
    pub published_to: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub version: SnapshotVersion,
    /// Round the restored archive was taken at.
    pub round: Round,
    pub requested_round: Round,
    pub previous_pid: Option<u32>,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutcome {
    Checkpoint(CheckpointOutcome),
    Restore(RestoreOutcome),
}

/// Both engines behind the executor's runner seam.
pub struct Engines {
    checkpoint: CheckpointEngine,
    restore: RestoreEngine,
}

impl Engines {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            checkpoint: CheckpointEngine::new(Arc::clone(&ctx)),
            restore: RestoreEngine::new(ctx),
        }
    }
}

#[async_trait]
impl OperationRunner for Engines {
    async fn run(&self, operation: Operation) -> Result<OperationOutcome> {
        match operation {
            Operation::Checkpoint { round } => self
                .checkpoint
                .checkpoint(round)
                .await
                .map(OperationOutcome::Checkpoint),
            Operation::Restore { round } => self
                .restore
                .restore(round)
                .await
                .map(OperationOutcome::Restore),
        }
    }
}

/// Fresh temporary directory under `work_dir`, removed on drop.
pub(crate) fn workspace(work_dir: &Path, prefix: &str) -> Result<TempDir> {
    std::fs::create_dir_all(work_dir).map_err(|e| {
        GuardError::Workspace(format!("cannot create {}: {}", work_dir.display(), e))
    })?;
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(work_dir)
        .map_err(|e| {
            GuardError::Workspace(format!(
                "cannot create workspace in {}: {}",
                work_dir.display(),
                e
            ))
        })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by engine, executor and router tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use snapstore::{FileStore, SnapshotArchive};

    use crate::publish::NoopPublisher;
    use crate::registry::Endpoint;

    /// Records every call in order, shared with [`FakeTerminator`].
    pub type CallLog = Arc<Mutex<Vec<String>>>;

    pub struct FakeTool {
        pub calls: CallLog,
        pub fail_dump: AtomicBool,
        pub fail_restore: AtomicBool,
        pub next_pid: AtomicU32,
    }

    impl FakeTool {
        pub fn new(calls: CallLog) -> Self {
            Self {
                calls,
                fail_dump: AtomicBool::new(false),
                fail_restore: AtomicBool::new(false),
                next_pid: AtomicU32::new(5000),
            }
        }

        pub fn dumps(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with("dump"))
                .count()
        }
    }

    #[async_trait]
    impl SnapshotTool for FakeTool {
        async fn dump(&self, pid: u32, images_dir: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(format!("dump {}", pid));
            if self.fail_dump.load(Ordering::SeqCst) {
                return Err(GuardError::SnapshotToolFailure("dump refused".to_string()));
            }
            std::fs::write(images_dir.join("core-1.img"), format!("pid {}", pid)).unwrap();
            Ok(())
        }

        async fn restore(&self, images_dir: &Path) -> Result<u32> {
            let image = std::fs::read_to_string(images_dir.join("core-1.img"))
                .unwrap_or_else(|_| "missing".to_string());
            self.calls
                .lock()
                .unwrap()
                .push(format!("restore {}", image));
            if self.fail_restore.load(Ordering::SeqCst) {
                return Err(GuardError::SnapshotToolFailure("restore refused".to_string()));
            }
            Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
        }
    }

    pub struct FakeTerminator {
        pub calls: CallLog,
        pub fail: AtomicBool,
    }

    impl FakeTerminator {
        pub fn new(calls: CallLog) -> Self {
            Self {
                calls,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProcessTerminator for FakeTerminator {
        async fn terminate(&self, pid: u32) -> std::io::Result<()> {
            self.calls.lock().unwrap().push(format!("terminate {}", pid));
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "operation not permitted",
                ));
            }
            Ok(())
        }
    }

    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(NodeId, Endpoint, SnapshotVersion)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ArchivePublisher for RecordingPublisher {
        async fn publish(
            &self,
            archive: &SnapshotArchive,
            peer: NodeId,
            endpoint: &Endpoint,
        ) -> Result<()> {
            if self.fail {
                return Err(GuardError::ForwardFailed {
                    node_id: peer,
                    reason: "unreachable".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((peer, endpoint.clone(), archive.version));
            Ok(())
        }
    }

    pub struct Harness {
        pub dir: TempDir,
        pub calls: CallLog,
        pub tool: Arc<FakeTool>,
        pub terminator: Arc<FakeTerminator>,
        pub store: Arc<FileStore>,
        pub ctx: Arc<EngineContext>,
    }

    /// Node 1 running pid 100 with an empty store in a temp dir.
    pub fn harness() -> Harness {
        harness_with(Arc::new(NoopPublisher), Vec::new())
    }

    pub fn harness_with(publisher: Arc<dyn ArchivePublisher>, peers: Vec<NodeId>) -> Harness {
        let dir = TempDir::new().unwrap();
        let calls: CallLog = Arc::default();
        let tool = Arc::new(FakeTool::new(Arc::clone(&calls)));
        let terminator = Arc::new(FakeTerminator::new(Arc::clone(&calls)));
        let store = Arc::new(FileStore::at_path(dir.path().join("store")).unwrap());

        let ctx = Arc::new(EngineContext {
            identity: GuardIdentity::new(1),
            store: store.clone(),
            tool: tool.clone(),
            terminator: terminator.clone(),
            publisher,
            registry: Arc::new(NodeRegistry::from_table([
                (2, Endpoint::new("peer-two", 7002)),
                (3, Endpoint::new("peer-three", 7003)),
            ])),
            target: Arc::new(TargetProcess::new(100)),
            work_dir: dir.path().join("work"),
            publish_peers: peers,
        });

        Harness {
            dir,
            calls,
            tool,
            terminator,
            store,
            ctx,
        }
    }
}
