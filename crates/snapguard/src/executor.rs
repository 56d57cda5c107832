//! Per-node operation executor.
//!
//! Local checkpoint and restore requests are queued on a bounded channel
//! and drained by a single worker task, so at most one operation touches
//! the target process at a time. Callers get a [`Ticket`] back immediately
//! and may await the outcome or drop it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snapconf::ExecutorConfig;
use snapstore::{NodeId, Round};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::Command;
use crate::engine::OperationOutcome;
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Operation {
    Checkpoint { round: Round },
    Restore { round: Round },
}

impl Operation {
    pub fn new(command: Command, round: Round) -> Self {
        match command {
            Command::Checkpoint => Operation::Checkpoint { round },
            Command::Restore => Operation::Restore { round },
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Operation::Checkpoint { .. } => Command::Checkpoint,
            Operation::Restore { .. } => Command::Restore,
        }
    }

    pub fn round(&self) -> Round {
        match *self {
            Operation::Checkpoint { round } | Operation::Restore { round } => round,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ round {}", self.command(), self.round())
    }
}

/// Runs one operation to completion. Implemented by the engines.
#[async_trait]
pub trait OperationRunner: Send + Sync {
    async fn run(&self, operation: Operation) -> Result<OperationOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    CheckpointInProgress { round: Round },
    RestoreInProgress { round: Round },
    /// A restore killed the target and could not replay it.
    Failed { reason: String },
}

impl NodeState {
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Idle => "idle",
            NodeState::CheckpointInProgress { .. } => "checkpoint_in_progress",
            NodeState::RestoreInProgress { .. } => "restore_in_progress",
            NodeState::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeState::Failed { .. })
    }

    fn running(operation: Operation) -> Self {
        match operation {
            Operation::Checkpoint { round } => NodeState::CheckpointInProgress { round },
            Operation::Restore { round } => NodeState::RestoreInProgress { round },
        }
    }
}

/// A finished operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub state: NodeState,
    pub completed: u64,
    pub last_outcome: Option<OperationRecord>,
}

/// Handle to a submitted operation.
#[derive(Debug)]
pub struct Ticket {
    pub id: OperationId,
    pub operation: Operation,
    reply: oneshot::Receiver<Result<OperationOutcome>>,
}

impl Ticket {
    /// Wait for the worker to finish this operation.
    pub async fn wait(self) -> Result<OperationOutcome> {
        self.reply
            .await
            .map_err(|_| GuardError::NodeFailed("executor stopped before completion".to_string()))?
    }
}

struct Job {
    id: OperationId,
    operation: Operation,
    reply: oneshot::Sender<Result<OperationOutcome>>,
}

pub struct NodeExecutor {
    node_id: NodeId,
    queue: mpsc::Sender<Job>,
    status: watch::Receiver<NodeStatus>,
    history: Arc<Mutex<VecDeque<OperationRecord>>>,
    next_id: AtomicU64,
}

impl NodeExecutor {
    /// Start the worker. It stops when `cancel` fires, after finishing the
    /// operation in flight.
    pub fn spawn(
        node_id: NodeId,
        runner: Arc<dyn OperationRunner>,
        config: &ExecutorConfig,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, jobs) = mpsc::channel(config.queue_capacity.max(1));
        let (status_tx, status) = watch::channel(NodeStatus {
            node_id,
            state: NodeState::Idle,
            completed: 0,
            last_outcome: None,
        });
        let history = Arc::new(Mutex::new(VecDeque::with_capacity(config.history_len)));

        let worker = Worker {
            node_id,
            runner,
            status: status_tx,
            history: Arc::clone(&history),
            history_len: config.history_len,
        };
        let handle = tokio::spawn(worker.run(jobs, cancel));

        let executor = Arc::new(Self {
            node_id,
            queue,
            status,
            history,
            next_id: AtomicU64::new(1),
        });
        (executor, handle)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Queue an operation. Fails with `Busy` when the queue is full and
    /// with `NodeFailed` for checkpoints while the node has no process.
    pub fn submit(&self, operation: Operation) -> Result<Ticket> {
        if let NodeState::Failed { reason } = &self.status.borrow().state {
            if matches!(operation, Operation::Checkpoint { .. }) {
                return Err(GuardError::NodeFailed(reason.clone()));
            }
        }

        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        let job = Job {
            id,
            operation,
            reply,
        };

        match self.queue.try_send(job) {
            Ok(()) => {
                info!(node.id = self.node_id, op.id = %id, %operation, "operation queued");
                Ok(Ticket {
                    id,
                    operation,
                    reply: rx,
                })
            }
            Err(TrySendError::Full(_)) => {
                warn!(node.id = self.node_id, %operation, "operation queue full");
                Err(GuardError::Busy)
            }
            Err(TrySendError::Closed(_)) => {
                Err(GuardError::NodeFailed("executor is shut down".to_string()))
            }
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    /// Receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    /// Most recent outcomes, oldest first.
    pub fn history(&self) -> Vec<OperationRecord> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

struct Worker {
    node_id: NodeId,
    runner: Arc<dyn OperationRunner>,
    status: watch::Sender<NodeStatus>,
    history: Arc<Mutex<VecDeque<OperationRecord>>>,
    history_len: usize,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::Receiver<Job>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(node.id = self.node_id, "executor shutting down");
                    break;
                }
                job = jobs.recv() => match job {
                    Some(job) => self.execute(job).await,
                    None => break,
                }
            }
        }
    }

    async fn execute(&self, job: Job) {
        let Job {
            id,
            operation,
            reply,
        } = job;

        // The node may have failed while this job was queued
        let previous = self.status.borrow().state.clone();
        if let NodeState::Failed { reason } = &previous {
            if matches!(operation, Operation::Checkpoint { .. }) {
                let _ = reply.send(Err(GuardError::NodeFailed(reason.clone())));
                return;
            }
        }

        self.status
            .send_modify(|s| s.state = NodeState::running(operation));
        let started_at = Utc::now();
        info!(node.id = self.node_id, op.id = %id, %operation, "operation started");

        let result = self.runner.run(operation).await;

        let next_state = match &result {
            Ok(_) => NodeState::Idle,
            Err(e) if e.is_terminal() => NodeState::Failed {
                reason: e.to_string(),
            },
            Err(_) if previous.is_failed() => previous,
            Err(_) => NodeState::Idle,
        };

        let record = OperationRecord {
            id,
            operation,
            started_at,
            finished_at: Utc::now(),
            outcome: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        let duration_ms = (record.finished_at - record.started_at).num_milliseconds();

        match &record.error {
            None => info!(
                node.id = self.node_id,
                op.id = %id,
                %operation,
                op.duration_ms = duration_ms,
                "operation completed"
            ),
            Some(error) => error!(
                node.id = self.node_id,
                op.id = %id,
                %operation,
                op.duration_ms = duration_ms,
                op.error = %error,
                "operation failed"
            ),
        }

        if let Ok(mut history) = self.history.lock() {
            if self.history_len > 0 {
                while history.len() >= self.history_len {
                    history.pop_front();
                }
                history.push_back(record.clone());
            }
        }

        self.status.send_modify(|s| {
            s.state = next_state;
            s.completed += 1;
            s.last_outcome = Some(record);
        });

        // Caller may have stopped waiting
        let _ = reply.send(result);
    }
}
