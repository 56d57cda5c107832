//! Node ids, rounds, snapshot versions and the on-disk archive naming scheme.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one guard in the cluster.
pub type NodeId = u32;

/// Caller-supplied synchronization index (e.g. a training step).
pub type Round = u64;

const ARCHIVE_PREFIX: &str = "checkpoint_";
const ARCHIVE_SUFFIX: &str = ".tar.gz";
const SIDECAR_SUFFIX: &str = ".json";

/// Store-assigned, strictly increasing per-node archive number. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotVersion(u64);

impl SnapshotVersion {
    pub const FIRST: SnapshotVersion = SnapshotVersion(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// File name of the archive for this version.
    pub fn archive_name(self) -> String {
        format!("{}{}{}", ARCHIVE_PREFIX, self.0, ARCHIVE_SUFFIX)
    }

    /// File name of the metadata sidecar for this version.
    pub fn sidecar_name(self) -> String {
        format!("{}{}{}", ARCHIVE_PREFIX, self.0, SIDECAR_SUFFIX)
    }

    /// Parse `checkpoint_<n>.tar.gz`. Anything else (sidecars, `.partial`
    /// leftovers, stray files) yields `None`.
    pub fn from_archive_name(name: &str) -> Option<Self> {
        let digits = name
            .strip_prefix(ARCHIVE_PREFIX)?
            .strip_suffix(ARCHIVE_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().filter(|v| *v > 0).map(Self)
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for SnapshotVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
