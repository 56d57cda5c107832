//! Archive metadata.
//!
//! Each archive has a JSON sidecar next to it recording the round it was
//! taken at, its size and checksum. The sidecar is what makes round-based
//! resolution possible; versions alone say nothing about rounds.

use crate::checksum::Checksum;
use crate::version::{NodeId, Round, SnapshotVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sidecar contents, stored as `checkpoint_<version>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveMetadata {
    pub node_id: NodeId,
    pub version: SnapshotVersion,
    pub round: Round,
    pub size_bytes: u64,
    pub checksum: Checksum,
    pub created_at: DateTime<Utc>,
}

/// A committed, immutable snapshot archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotArchive {
    pub node_id: NodeId,
    pub version: SnapshotVersion,

    /// Round index used for nearest-round resolution. Archives without a
    /// sidecar fall back to their version number.
    pub round: Round,

    pub size_bytes: u64,

    /// Local filesystem path of the archive payload.
    pub path: PathBuf,

    /// `None` when the sidecar is missing.
    pub checksum: Option<Checksum>,

    pub created_at: Option<DateTime<Utc>>,
}

impl SnapshotArchive {
    pub(crate) fn from_metadata(meta: ArchiveMetadata, path: PathBuf) -> Self {
        Self {
            node_id: meta.node_id,
            version: meta.version,
            round: meta.round,
            size_bytes: meta.size_bytes,
            path,
            checksum: Some(meta.checksum),
            created_at: Some(meta.created_at),
        }
    }

    /// An archive found on disk without a readable sidecar.
    pub(crate) fn bare(node_id: NodeId, version: SnapshotVersion, size_bytes: u64, path: PathBuf) -> Self {
        Self {
            node_id,
            version,
            round: version.get(),
            size_bytes,
            path,
            checksum: None,
            created_at: None,
        }
    }
}
