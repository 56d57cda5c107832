//! Integration tests for the snapshot store through its public API.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use snapstore::{FileStore, SnapshotStore, SnapshotVersion, StoreError};
use tempfile::TempDir;

fn commit(store: &FileStore, node: u32, round: u64, data: &[u8]) -> SnapshotVersion {
    let mut staging = store.create_staging().unwrap();
    staging.write_all(data).unwrap();
    let version = store.allocate_next_version(node).unwrap();
    store.commit(node, version, round, staging).unwrap().version
}

#[test]
fn test_concurrent_checkpoints_commit_every_version() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::at_path(temp_dir.path()).unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|round| {
            let store = Arc::clone(&store);
            thread::spawn(move || commit(&store, 1, round, format!("dump {}", round).as_bytes()))
        })
        .collect();

    let mut versions: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().get())
        .collect();
    versions.sort();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());

    let listed: Vec<u64> = store
        .list(1)
        .unwrap()
        .iter()
        .map(|a| a.version.get())
        .collect();
    assert_eq!(listed, versions);
}

#[test]
fn test_round_resolution_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::at_path(temp_dir.path()).unwrap();

    assert_eq!(commit(&store, 1, 5, b"at five"), SnapshotVersion::new(1));
    assert_eq!(commit(&store, 1, 7, b"at seven"), SnapshotVersion::new(2));

    let nearest = store.resolve_nearest(1, 6).unwrap();
    assert_eq!(nearest, SnapshotVersion::new(1));

    let archive = store.get(1, nearest).unwrap().expect("archive exists");
    store.verify(&archive).unwrap();
    assert_eq!(std::fs::read(&archive.path).unwrap(), b"at five");

    // Another node's store is separate
    assert!(matches!(
        store.resolve_nearest(2, 6),
        Err(StoreError::NotFound { node_id: 2, .. })
    ));
}
