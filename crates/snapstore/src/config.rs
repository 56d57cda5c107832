//! Store configuration and directory layout.
//!
//! Default path: `/tmp/checkpoint_store`. The guard passes the base path
//! from `[paths] store_dir`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::version::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapStoreConfig {
    /// Archives live in `{base_path}/nodes/<id>/`, staging files in
    /// `{base_path}/staging/`. Staging and archives share a filesystem so
    /// commit is a rename.
    pub base_path: PathBuf,

    /// Read-only mode - prevents any writes (inspection tools).
    #[serde(default)]
    pub read_only: bool,
}

impl Default for SnapStoreConfig {
    fn default() -> Self {
        Self::with_base_path(default_store_path())
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/tmp/checkpoint_store")
}

impl SnapStoreConfig {
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            read_only: false,
        }
    }

    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            read_only: true,
        }
    }

    pub fn nodes_dir(&self) -> PathBuf {
        self.base_path.join("nodes")
    }

    pub fn node_dir(&self, node_id: NodeId) -> PathBuf {
        self.nodes_dir().join(node_id.to_string())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.base_path.join("staging")
    }
}
