//! snapguard: per-node checkpoint/restore guard.
//!
//! One guard runs per machine next to one target process. It accepts
//! `checkpoint <node> <round>` and `restore <node> <round>` commands on a
//! trusted Unix socket and on an HTTP endpoint, runs commands addressed to
//! its own node through CRIU, and forwards everything else to the peer
//! guard that owns the node.
//!
//! Snapshots are stored as versioned archives by [`snapstore`]; a restore
//! picks the newest archive taken at or before the requested round.

pub mod archive;
pub mod client;
pub mod command;
pub mod engine;
pub mod error;
pub mod executor;
pub mod forward;
pub mod identity;
pub mod local;
pub mod process;
pub mod publish;
pub mod registry;
pub mod router;
pub mod serve;
pub mod telemetry;
pub mod tool;
pub mod web;

pub use command::{Command, CommandRequest};
pub use engine::{CheckpointOutcome, OperationOutcome, RestoreOutcome};
pub use error::{GuardError, Result};
pub use executor::{NodeExecutor, NodeState, NodeStatus, Operation, OperationId, Ticket};
pub use identity::{GuardIdentity, TargetProcess};
pub use registry::{Endpoint, NodeRegistry};
pub use router::{Ack, CommandRouter};
pub use serve::{Components, Guard};
