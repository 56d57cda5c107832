//! Local-versus-remote command routing.

use std::sync::Arc;

use snapstore::{NodeId, Round};
use tracing::{info, instrument, warn};

use crate::command::{Command, CommandRequest};
use crate::error::Result;
use crate::executor::{NodeExecutor, Operation, Ticket};
use crate::forward::RemoteForwarder;
use crate::identity::GuardIdentity;
use crate::registry::NodeRegistry;

/// How a dispatched command was handled.
#[derive(Debug)]
pub enum Ack {
    /// Queued on this node's executor.
    Served(Ticket),
    /// Delivered to the owning peer.
    Routed,
}

impl Ack {
    pub fn reply(&self) -> &'static str {
        match self {
            Ack::Served(_) => "served",
            Ack::Routed => "routed",
        }
    }
}

pub struct CommandRouter {
    identity: GuardIdentity,
    registry: Arc<NodeRegistry>,
    executor: Arc<NodeExecutor>,
    forwarder: Arc<dyn RemoteForwarder>,
}

impl CommandRouter {
    pub fn new(
        identity: GuardIdentity,
        registry: Arc<NodeRegistry>,
        executor: Arc<NodeExecutor>,
        forwarder: Arc<dyn RemoteForwarder>,
    ) -> Self {
        Self {
            identity,
            registry,
            executor,
            forwarder,
        }
    }

    pub fn identity(&self) -> GuardIdentity {
        self.identity
    }

    pub fn executor(&self) -> &Arc<NodeExecutor> {
        &self.executor
    }

    /// Run the command here when `node_id` is this guard, otherwise hand
    /// it to the owning peer. Local commands return as soon as they are
    /// queued.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, command: Command, node_id: NodeId, round: Round) -> Result<Ack> {
        if self.identity.is_self(node_id) {
            let ticket = self.executor.submit(Operation::new(command, round))?;
            return Ok(Ack::Served(ticket));
        }

        let endpoint = self.registry.resolve(node_id)?;
        let request = CommandRequest {
            command,
            node_id,
            round,
        };

        match self.forwarder.forward(&endpoint, &request).await {
            Ok(()) => {
                info!(%endpoint, %command, node.id = node_id, round, "command routed");
                Ok(Ack::Routed)
            }
            Err(e) => {
                warn!(%endpoint, %command, node.id = node_id, round, "forwarding failed: {}", e);
                Err(e)
            }
        }
    }

    /// Only accepts commands addressed to this node; anything else is
    /// logged and dropped, never re-routed.
    pub fn accept_network(&self, request: &CommandRequest) -> Result<Option<Ticket>> {
        if !self.identity.is_self(request.node_id) {
            warn!(
                node.local = self.identity.node_id,
                node.id = request.node_id,
                command = %request.command,
                round = request.round,
                "dropping network command addressed to another node"
            );
            return Ok(None);
        }

        self.executor
            .submit(Operation::new(request.command, request.round))
            .map(Some)
    }
}
