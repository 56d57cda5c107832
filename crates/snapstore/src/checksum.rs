//! Checksum: a BLAKE3 digest of an archive payload truncated to 128 bits
//! (32 hex chars).
//!
//! Recorded in the archive sidecar at commit time and checked before an
//! archive is replayed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

/// Errors parsing a checksum string.
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("invalid checksum length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in checksum")]
    InvalidHex,
}

impl Checksum {
    /// Hash in-memory data.
    pub fn from_data(data: &[u8]) -> Self {
        Self::from_hasher(blake3::Hasher::new().update(data))
    }

    /// Stream a file through the hasher without loading it into memory.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self::from_hasher(&hasher))
    }

    fn from_hasher(hasher: &blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        Self(hex::encode(&digest.as_bytes()[..16]))
    }

    /// Create from an existing checksum string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, ChecksumError> {
        if s.len() != 32 {
            return Err(ChecksumError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_data_produces_32_hex_chars() {
        let sum = Checksum::from_data(b"dump payload");
        assert_eq!(sum.as_str().len(), 32);
        assert!(sum.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_from_data_different_input_different_sum() {
        assert_ne!(Checksum::from_data(b"a"), Checksum::from_data(b"b"));
    }

    #[test]
    fn test_file_matches_data() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("payload");
        let data = vec![7u8; 300_000];
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&data)
            .unwrap();

        assert_eq!(Checksum::from_file(&path).unwrap(), Checksum::from_data(&data));
    }

    #[test]
    fn test_from_str_invalid() {
        assert!(matches!(
            "short".parse::<Checksum>(),
            Err(ChecksumError::InvalidLength(5))
        ));
        assert!(matches!(
            "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<Checksum>(),
            Err(ChecksumError::InvalidHex)
        ));
    }

    #[test]
    fn test_matches_blake3_prefix() {
        let sum = Checksum::from_data(b"Concurrent Data");
        assert_eq!(sum.as_str(), "5c735d76fe3537a0f35cf4a4eb14a532");
    }
}
