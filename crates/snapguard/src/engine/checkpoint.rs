use std::sync::Arc;

use snapstore::{Round, SnapshotArchive};
use tracing::{info, instrument, warn};

use super::{workspace, CheckpointOutcome, EngineContext};
use crate::archive;
use crate::error::{GuardError, Result};

/// Dump, pack, version, commit, publish.
pub struct CheckpointEngine {
    ctx: Arc<EngineContext>,
}

impl CheckpointEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Snapshot the target process as a new version recorded at `round`.
    ///
    /// Nothing becomes visible in the store unless every step succeeds.
    #[instrument(skip(self))]
    pub async fn checkpoint(&self, round: Round) -> Result<CheckpointOutcome> {
        let ctx = &self.ctx;
        let node_id = ctx.node_id();
        let pid = ctx.target.pid().ok_or(GuardError::NoTargetProcess)?;

        let images = workspace(&ctx.work_dir, "snapguard-dump-")?;
        ctx.tool.dump(pid, images.path()).await?;

        let store = Arc::clone(&ctx.store);
        let archive = tokio::task::spawn_blocking(move || -> Result<SnapshotArchive> {
            let mut staging = store.create_staging()?;
            let pack_failed =
                |e: std::io::Error| GuardError::Workspace(format!("failed to pack images: {}", e));
            archive::pack_dir(images.path(), &mut staging).map_err(pack_failed)?;
            staging.finish().map_err(pack_failed)?;

            let version = store.allocate_next_version(node_id)?;
            Ok(store.commit(node_id, version, round, staging)?)
        })
        .await
        .map_err(|e| GuardError::Workspace(format!("packing task failed: {}", e)))??;

        info!(
            node.id = node_id,
            pid,
            round,
            version = %archive.version,
            size_bytes = archive.size_bytes,
            "checkpoint committed"
        );

        let published_to = self.publish(&archive).await;

        Ok(CheckpointOutcome {
            version: archive.version,
            round,
            size_bytes: archive.size_bytes,
            path: archive.path,
            published_to,
        })
    }

    /// Best effort: failures are logged and never fail the checkpoint.
    async fn publish(&self, archive: &SnapshotArchive) -> Vec<u32> {
        let mut reached = Vec::new();
        for &peer in &self.ctx.publish_peers {
            if self.ctx.identity.is_self(peer) {
                continue;
            }
            let endpoint = match self.ctx.registry.resolve(peer) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(peer, "skipping publish: {}", e);
                    continue;
                }
            };
            match self.ctx.publisher.publish(archive, peer, &endpoint).await {
                Ok(()) => reached.push(peer),
                Err(e) => warn!(peer, %endpoint, version = %archive.version, "publish failed: {}", e),
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{harness, harness_with, RecordingPublisher};
    use snapstore::{SnapshotStore, SnapshotVersion};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_checkpoint_commits_versions_in_order() {
        let h = harness();
        let engine = CheckpointEngine::new(h.ctx.clone());

        let first = engine.checkpoint(5).await.unwrap();
        let second = engine.checkpoint(7).await.unwrap();

        assert_eq!(first.version, SnapshotVersion::new(1));
        assert_eq!(second.version, SnapshotVersion::new(2));
        assert_eq!(first.round, 5);
        assert!(first.path.ends_with("checkpoint_1.tar.gz"));
        assert!(first.size_bytes > 0);

        let listed = h.store.list(1).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].round, 7);
        assert_eq!(h.calls.lock().unwrap().as_slice(), ["dump 100", "dump 100"]);
    }

    #[tokio::test]
    async fn test_workspace_is_removed() {
        let h = harness();
        CheckpointEngine::new(h.ctx.clone())
            .checkpoint(1)
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(&h.ctx.work_dir).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_leaves_no_archive() {
        let h = harness();
        h.tool.fail_dump.store(true, Ordering::SeqCst);

        let err = CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::SnapshotToolFailure(_)));
        assert!(h.store.list(1).unwrap().is_empty());
        assert!(std::fs::read_dir(h.store.config().staging_dir())
            .map(|entries| entries.count() == 0)
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn test_missing_target_process() {
        let h = harness();
        h.ctx.target.clear();

        let err = CheckpointEngine::new(h.ctx.clone())
            .checkpoint(5)
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::NoTargetProcess));
        assert_eq!(h.tool.dumps(), 0);
    }

    #[tokio::test]
    async fn test_publishes_to_peers_except_self() {
        let publisher = Arc::new(RecordingPublisher {
            published: Mutex::new(Vec::new()),
            fail: false,
        });
        let h = harness_with(publisher.clone(), vec![1, 2, 3, 9]);

        let outcome = CheckpointEngine::new(h.ctx.clone())
            .checkpoint(4)
            .await
            .unwrap();

        // Node 9 has no table entry and the test registry has no rule
        assert_eq!(outcome.published_to, vec![2, 3]);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published[0].1.host, "peer-two");
        assert_eq!(published[1].2, SnapshotVersion::new(1));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_checkpoint() {
        let publisher = Arc::new(RecordingPublisher {
            published: Mutex::new(Vec::new()),
            fail: true,
        });
        let h = harness_with(publisher, vec![2]);

        let outcome = CheckpointEngine::new(h.ctx.clone())
            .checkpoint(4)
            .await
            .unwrap();

        assert!(outcome.published_to.is_empty());
        assert_eq!(h.store.list(1).unwrap().len(), 1);
    }
}
