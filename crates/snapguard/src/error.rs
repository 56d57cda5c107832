//! Guard error taxonomy.

use snapstore::{NodeId, Round, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("snapshot tool failed: {0}")]
    SnapshotToolFailure(String),

    #[error("no snapshot available for node {node_id} at or before round {round}")]
    NoSnapshotAvailable { node_id: NodeId, round: Round },

    /// `process_lost` is true when the target was already killed; the node
    /// then has no running target until an operator intervenes.
    #[error("restore failed: {reason}")]
    RestoreFailed { reason: String, process_lost: bool },

    #[error("failed to forward to node {node_id}: {reason}")]
    ForwardFailed { node_id: NodeId, reason: String },

    #[error("operation queue is full")]
    Busy,

    #[error("node is in failed state: {0}")]
    NodeFailed(String),

    #[error("no target process is running")]
    NoTargetProcess,

    #[error("unauthorized")]
    Unauthorized,

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = GuardError> = std::result::Result<T, E>;

impl GuardError {
    /// Whether this failure leaves the node without a target process.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GuardError::RestoreFailed {
                process_lost: true,
                ..
            }
        )
    }
}
