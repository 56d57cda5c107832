use std::sync::Arc;

use snapstore::{Round, StoreError};
use tempfile::TempDir;
use tracing::{error, info, instrument, warn};

use super::{workspace, EngineContext, RestoreOutcome};
use crate::archive;
use crate::error::{GuardError, Result};

/// Resolve, terminate, replay. Each step only runs if the previous one
/// succeeded.
pub struct RestoreEngine {
    ctx: Arc<EngineContext>,
}

impl RestoreEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, round: Round) -> Result<RestoreOutcome> {
        let ctx = &self.ctx;
        let node_id = ctx.node_id();

        let version = ctx
            .store
            .resolve_nearest(node_id, round)
            .map_err(|e| match e {
                StoreError::NotFound { .. } => GuardError::NoSnapshotAvailable { node_id, round },
                other => GuardError::Store(other),
            })?;
        let archive = ctx
            .store
            .get(node_id, version)?
            .ok_or(GuardError::NoSnapshotAvailable { node_id, round })?;

        let archive_round = archive.round;
        info!(node.id = node_id, round, version = %version, archive_round, "restoring");

        // Everything that can fail without side effects happens before the kill
        let store = Arc::clone(&ctx.store);
        let work_dir = ctx.work_dir.clone();
        let images = tokio::task::spawn_blocking(move || -> Result<TempDir> {
            store.verify(&archive)?;
            let images = workspace(&work_dir, "snapguard-restore-")?;
            archive::unpack(&archive.path, images.path()).map_err(|e| {
                GuardError::Workspace(format!(
                    "failed to extract {}: {}",
                    archive.path.display(),
                    e
                ))
            })?;
            Ok(images)
        })
        .await
        .map_err(|e| GuardError::Workspace(format!("extraction task failed: {}", e)))?
        .map_err(|e| GuardError::RestoreFailed {
            reason: e.to_string(),
            process_lost: false,
        })?;

        let previous_pid = ctx.target.pid();
        match previous_pid {
            Some(pid) => {
                ctx.terminator.terminate(pid).await.map_err(|e| {
                    warn!(pid, "termination failed, replay skipped: {}", e);
                    GuardError::RestoreFailed {
                        reason: format!("failed to terminate pid {}: {}", pid, e),
                        process_lost: false,
                    }
                })?;
            }
            None => warn!("no target process to terminate"),
        }

        match ctx.tool.restore(images.path()).await {
            Ok(pid) => {
                ctx.target.replace(pid);
                info!(node.id = node_id, pid, ?previous_pid, version = %version, "restore complete");
                Ok(RestoreOutcome {
                    version,
                    round: archive_round,
                    requested_round: round,
                    previous_pid,
                    pid,
                })
            }
            Err(e) => {
                ctx.target.clear();
                error!(node.id = node_id, version = %version, "replay failed after termination: {}", e);
                Err(GuardError::RestoreFailed {
                    reason: e.to_string(),
                    process_lost: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::harness;
    use crate::engine::CheckpointEngine;
    use snapstore::SnapshotVersion;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_restore_picks_nearest_and_terminates_first() {
        let h = harness();
        let checkpoint = CheckpointEngine::new(h.ctx.clone());
        checkpoint.checkpoint(5).await.unwrap();
        h.ctx.target.replace(101);
        checkpoint.checkpoint(7).await.unwrap();
        h.calls.lock().unwrap().clear();

        let outcome = RestoreEngine::new(h.ctx.clone()).restore(6).await.unwrap();

        assert_eq!(outcome.version, SnapshotVersion::new(1));
        assert_eq!(outcome.round, 5);
        assert_eq!(outcome.requested_round, 6);
        assert_eq!(outcome.previous_pid, Some(101));
        assert_eq!(h.ctx.target.pid(), Some(outcome.pid));

        // v1 holds the images dumped from pid 100
        assert_eq!(
            h.calls.lock().unwrap().as_slice(),
            ["terminate 101", "restore pid 100"]
        );
    }

    #[tokio::test]
    async fn test_empty_store_does_nothing() {
        let h = harness();

        let err = RestoreEngine::new(h.ctx.clone()).restore(3).await.unwrap_err();

        assert!(matches!(
            err,
            GuardError::NoSnapshotAvailable {
                node_id: 1,
                round: 3
            }
        ));
        assert!(h.calls.lock().unwrap().is_empty());
        assert_eq!(h.ctx.target.pid(), Some(100));
    }

    #[tokio::test]
    async fn test_round_before_first_snapshot() {
        let h = harness();
        CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap();

        let err = RestoreEngine::new(h.ctx.clone()).restore(4).await.unwrap_err();
        assert!(matches!(err, GuardError::NoSnapshotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_failed_termination_never_replays() {
        let h = harness();
        CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap();
        h.calls.lock().unwrap().clear();
        h.terminator.fail.store(true, Ordering::SeqCst);

        let err = RestoreEngine::new(h.ctx.clone()).restore(5).await.unwrap_err();

        assert!(matches!(
            err,
            GuardError::RestoreFailed {
                process_lost: false,
                ..
            }
        ));
        assert_eq!(h.calls.lock().unwrap().as_slice(), ["terminate 100"]);
        assert_eq!(h.ctx.target.pid(), Some(100));
    }

    #[tokio::test]
    async fn test_failed_replay_clears_target() {
        let h = harness();
        CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap();
        h.tool.fail_restore.store(true, Ordering::SeqCst);

        let err = RestoreEngine::new(h.ctx.clone()).restore(5).await.unwrap_err();

        assert!(err.is_terminal());
        assert_eq!(h.ctx.target.pid(), None);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_rejected_before_kill() {
        let h = harness();
        let outcome = CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap();
        std::fs::write(&outcome.path, b"bit rot").unwrap();
        h.calls.lock().unwrap().clear();

        let err = RestoreEngine::new(h.ctx.clone()).restore(5).await.unwrap_err();

        assert!(matches!(
            err,
            GuardError::RestoreFailed {
                process_lost: false,
                ..
            }
        ));
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_target_recovers() {
        let h = harness();
        CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap();
        h.ctx.target.clear();
        h.calls.lock().unwrap().clear();

        let outcome = RestoreEngine::new(h.ctx.clone()).restore(9).await.unwrap();

        assert_eq!(outcome.previous_pid, None);
        assert_eq!(h.ctx.target.pid(), Some(outcome.pid));
        assert_eq!(h.calls.lock().unwrap().as_slice(), ["restore pid 100"]);
    }
}
