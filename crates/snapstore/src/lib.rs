//! Versioned snapshot archive store for snapguard.
//!
//! Every guard keeps the archives produced by its checkpoints here, one
//! directory per node. Versions are allocated per node, strictly increasing
//! from 1; each archive records the round it was taken at so a restore can
//! pick the newest archive not past a requested round.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Write;
//! use snapstore::{FileStore, SnapshotStore};
//!
//! let store = FileStore::at_path("/tmp/checkpoint_store").unwrap();
//!
//! // Stage the payload, then publish it atomically
//! let mut staging = store.create_staging().unwrap();
//! staging.write_all(b"packed dump").unwrap();
//! let version = store.allocate_next_version(1).unwrap();
//! let archive = store.commit(1, version, 5, staging).unwrap();
//! println!("committed {} at {}", archive.version, archive.path.display());
//!
//! // Newest archive taken at or before round 6
//! let nearest = store.resolve_nearest(1, 6).unwrap();
//! assert_eq!(nearest, archive.version);
//! ```
//!
//! # Concurrency
//!
//! - Version allocation and commit are serialized per node
//! - Readers need no locking: archives appear by rename, never partially
//! - Staging and archives must share a filesystem for O(1) commits; a
//!   cross-device commit falls back to copy + rename

pub mod checksum;
pub mod config;
pub mod metadata;
pub mod staging;
pub mod store;
pub mod version;

pub use checksum::{Checksum, ChecksumError};
pub use config::SnapStoreConfig;
pub use metadata::{ArchiveMetadata, SnapshotArchive};
pub use staging::{StagingChunk, StagingId};
pub use store::{FileStore, SnapshotStore, StoreError};
pub use version::{NodeId, Round, SnapshotVersion};
