//! Commands and the local-channel request format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snapstore::{NodeId, Round};

use crate::error::GuardError;

/// Longest request accepted on the local channel.
pub const MAX_REQUEST_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Checkpoint,
    Restore,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Checkpoint => "checkpoint",
            Command::Restore => "restore",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint" => Ok(Command::Checkpoint),
            "restore" => Ok(Command::Restore),
            other => Err(GuardError::UnknownCommand(other.to_string())),
        }
    }
}

/// A fully parsed command addressed to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Command,
    pub node_id: NodeId,
    pub round: Round,
}

impl CommandRequest {
    /// Parse `<command> <node_id> <round>`.
    ///
    /// Token count and integer fields are checked before the command name,
    /// so `frobnicate 1 2` is an unknown command but `checkpoint x 2` is
    /// malformed.
    pub fn parse_line(line: &str) -> Result<Self, GuardError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [command, node_id, round] = parts.as_slice() else {
            return Err(GuardError::MalformedRequest(format!(
                "expected 3 tokens, got {}",
                parts.len()
            )));
        };

        let node_id: NodeId = node_id
            .parse()
            .map_err(|_| GuardError::MalformedRequest(format!("invalid node id: {}", node_id)))?;
        let round: Round = round
            .parse()
            .map_err(|_| GuardError::MalformedRequest(format!("invalid round: {}", round)))?;
        let command: Command = command.parse()?;

        Ok(Self {
            command,
            node_id,
            round,
        })
    }

    /// The wire form accepted by [`CommandRequest::parse_line`].
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.command, self.node_id, self.round)
    }
}
