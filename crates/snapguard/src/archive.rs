//! Packing CRIU image directories into gzip'd tarballs and back.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Write every file under `dir` into `out` as a `.tar.gz`, paths relative to `dir`.
pub fn pack_dir<W: Write>(dir: &Path, out: W) -> io::Result<W> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()
}

/// Extract a `.tar.gz` into `dest`. Entries escaping `dest` are skipped by tar.
pub fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pack_and_unpack_tree() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("pages-1.img"), vec![7u8; 64 * 1024]).unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/core.img"), b"core").unwrap();

        let out = TempDir::new().unwrap();
        let tarball = out.path().join("checkpoint_1.tar.gz");
        pack_dir(src.path(), File::create(&tarball).unwrap()).unwrap();

        // Compressed payload is smaller than the repetitive input
        assert!(fs::metadata(&tarball).unwrap().len() < 64 * 1024);

        let dest = TempDir::new().unwrap();
        unpack(&tarball, dest.path()).unwrap();
        assert_eq!(
            fs::read(dest.path().join("pages-1.img")).unwrap(),
            vec![7u8; 64 * 1024]
        );
        assert_eq!(fs::read(dest.path().join("nested/core.img")).unwrap(), b"core");
    }

    #[test]
    fn test_pack_empty_dir() {
        let src = TempDir::new().unwrap();
        let bytes = pack_dir(src.path(), Vec::new()).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.tar.gz");
        fs::write(&bogus, b"definitely not gzip").unwrap();

        assert!(unpack(&bogus, dir.path()).is_err());
    }
}
