// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use dummyflt::{CallCounters, DEFAULT_PRIORITY, NAME};
use redirfs_core::vfs::{vfs_close, vfs_create, vfs_lookup, vfs_mkdir, vfs_open, vfs_read, vfs_readdir, vfs_write};
use redirfs_core::{MemFs, ObjKind, OpName, PathFlags, Redirfs, RedirfsConfig};
use redirfs_test_utils::{logged_assert_eq, logged_test};
use std::sync::Arc;
use std::time::Duration;

#[logged_test]
fn registers_with_its_fixed_identity() {
    let rfs = Redirfs::new(RedirfsConfig::default()).unwrap();
    let filter = dummyflt::register(&rfs, DEFAULT_PRIORITY, Arc::default()).unwrap();
    assert_eq!(filter.name(), NAME);
    assert_eq!(filter.priority(), 500_000_000);
    assert!(filter.is_active());

    let mask = filter.ops().mask();
    assert!(mask.contains(ObjKind::CharDevice.op(OpName::Open)));
    assert!(mask.contains(ObjKind::Directory.op(OpName::Iterate)));
    assert!(mask.contains(ObjKind::Regular.op(OpName::Read)));
    assert!(!mask.contains(ObjKind::Regular.op(OpName::Write)));
    assert_eq!(mask.len(), 9);
    logger.log("dummyflt registered with 9 hooked operations").unwrap();
}

#[logged_test]
fn observes_calls_in_both_phases() {
    let fs = MemFs::new();
    let dir = vfs_mkdir(fs.root(), "srv", 0o755).unwrap();
    let file = vfs_create(&dir, "a.txt", 0o644).unwrap();

    let rfs = Redirfs::new(RedirfsConfig::default()).unwrap();
    let counters = Arc::new(CallCounters::default());
    let filter = dummyflt::register(&rfs, DEFAULT_PRIORITY, counters.clone()).unwrap();
    rfs.add_path(&filter, &dir, PathFlags::Include).unwrap();

    // open, read and release are hooked; write is not
    let handle = vfs_open(&file, libc::O_RDWR).unwrap();
    vfs_write(&handle, b"abc").unwrap();
    vfs_read(&handle, &mut [0u8; 8]).unwrap();
    vfs_close(&handle).unwrap();
    logged_assert_eq!(logger, counters.precalls(), 3);
    logged_assert_eq!(logger, counters.postcalls(), 3);

    // directory open, iterate, release, then a lookup of a new name
    let listing = vfs_open(&dir, libc::O_RDONLY).unwrap();
    let names: Vec<String> = vfs_readdir(&listing).unwrap().into_iter().map(|e| e.name).collect();
    vfs_close(&listing).unwrap();
    assert_eq!(names, vec!["a.txt".to_string()]);
    assert!(vfs_lookup(&dir, "missing").is_err());
    logged_assert_eq!(logger, counters.precalls(), 7);

    dummyflt::unregister_with_retry(&rfs, &filter, 5, Duration::from_millis(1)).unwrap();
    assert!(rfs.find_filter(NAME).is_none());
}
