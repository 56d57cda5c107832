//! Staging: in-progress archive payloads that become visible only on commit.
//!
//! A checkpoint packs its dump directory into a staging file with a random
//! name. Commit renames it into the node's archive directory. A staging
//! chunk that is dropped without being committed deletes its file, so an
//! aborted checkpoint leaves nothing behind.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── nodes/
//! │   └── 1/
//! │       ├── checkpoint_1.tar.gz   # committed payload
//! │       └── checkpoint_1.json     # sidecar
//! └── staging/
//!     └── 3f9a...c1.partial         # in-progress payload
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Random staging identifier, 32 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagingId(String);

impl StagingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.partial", self.0)
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to a staging file.
#[derive(Debug)]
pub struct StagingChunk {
    id: StagingId,
    path: PathBuf,
    file: Option<File>,
    bytes_written: u64,
    /// Set once commit has moved the file into the archive set.
    pub(crate) persisted: bool,
}

impl StagingChunk {
    pub(crate) fn create(id: StagingId, path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;

        Ok(Self {
            id,
            path,
            file: Some(file),
            bytes_written: 0,
            persisted: false,
        })
    }

    pub fn id(&self) -> &StagingId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush, fsync and close the file handle. Further writes fail.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Write for StagingChunk {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file {
            Some(ref mut file) => {
                let n = file.write(buf)?;
                self.bytes_written += n as u64;
                Ok(n)
            }
            None => Err(io::Error::other("staging file already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagingChunk {
    fn drop(&mut self) {
        if !self.persisted {
            self.file = None;
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging file");
                }
            }
        }
    }
}
