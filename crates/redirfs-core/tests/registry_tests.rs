// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use common::{framework, recording_filter, recording_ops, seeded_tree, traced_file};
use redirfs_core::vfs::{vfs_close, vfs_create, vfs_open, vfs_read};
use redirfs_core::{
    Filter, FilterId, FilterInfo, FilterOps, ObjKind, OpName, PathFlags, PathScope, Redirfs, RedirfsConfig,
    RfsError, Verdict,
};
use redirfs_test_utils::{logged_assert, logged_assert_eq, logged_test, TraceRecorder};
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

fn read_op() -> redirfs_core::OpId {
    ObjKind::Regular.op(OpName::Read)
}

#[logged_test]
fn registration_errors_have_no_side_effects() {
    let rfs = Redirfs::new(RedirfsConfig {
        unique_priorities: true,
        ..RedirfsConfig::default()
    })
    .unwrap();
    rfs.register_filter(FilterInfo::new("audit", 10), FilterOps::new()).unwrap();

    let dup = rfs.register_filter(FilterInfo::new("audit", 20), FilterOps::new());
    assert!(matches!(dup, Err(RfsError::DuplicateName(name)) if name == "audit"));
    let clash = rfs.register_filter(FilterInfo::new("other", 10), FilterOps::new());
    assert!(matches!(clash, Err(RfsError::PriorityConflict(10))));
    let empty = rfs.register_filter(FilterInfo::new("", 30), FilterOps::new());
    assert!(matches!(empty, Err(RfsError::Config(_))));
    // lookup is not an operation of regular files
    let bogus = rfs.register_filter(
        FilterInfo::new("bogus", 40),
        FilterOps::new().pre(ObjKind::Regular.op(OpName::Lookup), |_ctx, _args| Verdict::Continue),
    );
    assert!(matches!(bogus, Err(RfsError::Config(_))));

    logged_assert_eq!(logger, rfs.filters().len(), 1);
    assert_eq!(rfs.stats().filters, 1);
}

#[logged_test]
fn unknown_filters_are_rejected() {
    let tree = seeded_tree();
    let rfs = framework();
    let other = framework();
    let stranger = other.register_filter(FilterInfo::new("stranger", 1), FilterOps::new()).unwrap();

    assert!(matches!(rfs.unregister_filter(&stranger), Err(RfsError::InvalidFilter)));
    assert!(matches!(
        rfs.add_path(&stranger, &tree.srv, PathFlags::Include),
        Err(RfsError::InvalidFilter)
    ));
    assert!(matches!(rfs.activate_filter(&stranger), Err(RfsError::InvalidFilter)));
    assert!(!rfs.is_shadowed(&tree.srv));
}

#[logged_test]
fn path_rules_are_tracked_per_filter() {
    let tree = seeded_tree();
    let rfs = framework();
    let trace = TraceRecorder::new();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[read_op()]);
    rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();
    rfs.add_path(&filter, &tree.sub, PathFlags::Exclude).unwrap();
    assert!(matches!(
        rfs.add_path(&filter, &tree.srv, PathFlags::Exclude),
        Err(RfsError::PathExists(_))
    ));

    let paths = rfs.paths(&filter).unwrap();
    assert_eq!(
        paths,
        vec![
            (Path::new("/srv").to_path_buf(), PathFlags::Include),
            (Path::new("/srv/sub").to_path_buf(), PathFlags::Exclude),
        ]
    );
    assert_eq!(rfs.remove_path(&filter, &tree.sub).unwrap(), PathFlags::Exclude);
    assert!(matches!(rfs.remove_path(&filter, &tree.sub), Err(RfsError::PathNotFound(_))));
    let b = tree.sub.child("b.txt").unwrap();
    logged_assert!(logger, rfs.is_shadowed(&b));
}

#[logged_test]
fn deactivated_filters_leave_the_chain() {
    let trace = TraceRecorder::new();
    let target = traced_file(&trace);
    let rfs = framework();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[read_op()]);
    rfs.add_path(&filter, &target.dentry, PathFlags::Include).unwrap();
    let file = vfs_open(&target.dentry, libc::O_RDONLY).unwrap();

    rfs.deactivate_filter(&filter).unwrap();
    assert!(!filter.is_active());
    assert!(rfs.file_chain(&file).unwrap().is_empty());
    trace.clear();
    vfs_read(&file, &mut [0u8; 1]).unwrap();
    logged_assert_eq!(logger, trace.take(), vec!["original-read"]);

    rfs.activate_filter(&filter).unwrap();
    vfs_read(&file, &mut [0u8; 1]).unwrap();
    logged_assert_eq!(logger, trace.take(), vec!["obs.pre:read", "original-read", "obs.post:read"]);
    vfs_close(&file).unwrap();
}

#[logged_test]
fn replacing_operations_takes_effect_on_open_files() {
    let trace = TraceRecorder::new();
    let target = traced_file(&trace);
    let rfs = framework();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[ObjKind::Regular.op(OpName::Write)]);
    rfs.add_path(&filter, &target.dentry, PathFlags::Include).unwrap();
    let file = vfs_open(&target.dentry, libc::O_RDONLY).unwrap();
    let before = rfs.file_chain(&file).unwrap();
    assert!(!before.has_op(read_op()));

    rfs.set_operations(&filter, recording_ops(&trace, "obs", &[read_op()])).unwrap();
    let after = rfs.file_chain(&file).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.has_op(read_op()));
    assert_eq!(filter.ops_generation(), 1);

    trace.clear();
    vfs_read(&file, &mut [0u8; 1]).unwrap();
    logged_assert_eq!(logger, trace.take(), vec!["obs.pre:read", "original-read", "obs.post:read"]);
    vfs_close(&file).unwrap();
}

#[logged_test]
fn unregister_waits_for_in_flight_calls() {
    let trace = TraceRecorder::new();
    let target = traced_file(&trace);
    let rfs = Arc::new(framework());
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let resume_rx = Mutex::new(resume_rx);
    let filter = rfs
        .register_filter(
            FilterInfo::new("slow", 10),
            FilterOps::new().pre(read_op(), move |_ctx, _args| {
                entered_tx.lock().unwrap().send(()).unwrap();
                resume_rx.lock().unwrap().recv().unwrap();
                Verdict::Continue
            }),
        )
        .unwrap();
    rfs.add_path(&filter, &target.dentry, PathFlags::Include).unwrap();
    let file = vfs_open(&target.dentry, libc::O_RDONLY).unwrap();

    let reader = {
        let file = file.clone();
        thread::spawn(move || vfs_read(&file, &mut [0u8; 2]))
    };
    entered_rx.recv().unwrap();

    let busy = rfs.unregister_filter(&filter);
    logged_assert!(logger, matches!(busy, Err(RfsError::StillReferenced(_))));
    assert!(filter.is_unregistering());
    // no new call picks the filter up
    assert!(rfs.file_chain(&file).unwrap().is_empty());

    resume_tx.send(()).unwrap();
    assert_eq!(reader.join().unwrap(), Ok(2));
    rfs.unregister_filter(&filter).unwrap();
    logged_assert!(logger, rfs.find_filter("slow").is_none());
    assert_eq!(filter.chain_refs(), 0);
    vfs_close(&file).unwrap();
}

/// Scope that applies one fixed set of filters to every path below a root.
struct SubtreeScope {
    root: &'static str,
    filters: Mutex<Vec<Arc<Filter>>>,
}

impl PathScope for SubtreeScope {
    fn filters_for(&self, path: &Path) -> Vec<Arc<Filter>> {
        if path.starts_with(self.root) {
            self.filters.lock().unwrap().clone()
        } else {
            Vec::new()
        }
    }

    fn forget(&self, filter: FilterId) {
        self.filters.lock().unwrap().retain(|f| f.id() != filter);
    }
}

#[logged_test]
fn external_scope_drives_the_chains() {
    let tree = seeded_tree();
    let scope = Arc::new(SubtreeScope {
        root: "/srv",
        filters: Mutex::new(Vec::new()),
    });
    let rfs = Redirfs::with_scope(RedirfsConfig::default(), scope.clone()).unwrap();
    let trace = TraceRecorder::new();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[read_op()]);
    assert!(matches!(
        rfs.add_path(&filter, &tree.srv, PathFlags::Include),
        Err(RfsError::Config(_))
    ));

    scope.filters.lock().unwrap().push(filter.clone());
    rfs.scope_changed(&tree.srv);
    let a = tree.srv.child("a.txt").unwrap();
    logged_assert!(logger, rfs.is_shadowed(&a));
    assert!(!rfs.is_shadowed(&tree.other));

    rfs.unregister_filter(&filter).unwrap();
    assert!(scope.filters.lock().unwrap().is_empty());
    assert!(!rfs.is_shadowed(&a));
}

/// Holds the first decision for `gated` until the test lets it go. The
/// filter list is read before blocking, so the held decision goes stale if
/// the scope changes meanwhile.
struct GatedScope {
    gated: &'static str,
    filters: Mutex<Vec<Arc<Filter>>>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl PathScope for GatedScope {
    fn filters_for(&self, path: &Path) -> Vec<Arc<Filter>> {
        let filters = self.filters.lock().unwrap().clone();
        if path == Path::new(self.gated) {
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                entered.send(()).unwrap();
                let release = self.release.lock().unwrap().take();
                if let Some(release) = release {
                    release.recv().unwrap();
                }
            }
        }
        filters
    }

    fn forget(&self, filter: FilterId) {
        self.filters.lock().unwrap().retain(|f| f.id() != filter);
    }
}

#[logged_test]
fn scope_change_during_creation_reaches_the_new_child() {
    let tree = seeded_tree();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let scope = Arc::new(GatedScope {
        gated: "/srv/new.txt",
        filters: Mutex::new(Vec::new()),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(Some(release_rx)),
    });
    let rfs = Redirfs::with_scope(RedirfsConfig::default(), scope.clone()).unwrap();
    let trace = TraceRecorder::new();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[read_op()]);
    scope.filters.lock().unwrap().push(filter.clone());
    rfs.scope_changed(&tree.srv);
    let a = tree.srv.child("a.txt").unwrap();
    assert!(rfs.is_shadowed(&a));

    let srv = tree.srv.clone();
    let creator = thread::spawn(move || vfs_create(&srv, "new.txt", 0o644).unwrap());
    // the creation is now deciding with the old filter list
    entered_rx.recv().unwrap();
    scope.filters.lock().unwrap().clear();
    rfs.scope_changed(&tree.srv);
    release_tx.send(()).unwrap();
    let fresh = creator.join().unwrap();

    assert!(!rfs.is_shadowed(&a));
    logged_assert!(logger, !rfs.is_shadowed(&fresh));
    assert!(rfs.chain_for(&fresh).is_none());
}

#[logged_test]
fn adopted_child_follows_later_scope_changes() {
    let tree = seeded_tree();
    let scope = Arc::new(SubtreeScope {
        root: "/srv",
        filters: Mutex::new(Vec::new()),
    });
    let rfs = Redirfs::with_scope(RedirfsConfig::default(), scope.clone()).unwrap();
    let trace = TraceRecorder::new();
    let filter = recording_filter(&rfs, &trace, "obs", 10, &[read_op()]);
    scope.filters.lock().unwrap().push(filter.clone());
    rfs.scope_changed(&tree.srv);

    let fresh = vfs_create(&tree.srv, "fresh.txt", 0o644).unwrap();
    assert_eq!(rfs.chain_for(&fresh).unwrap().filter_names(), vec!["obs"]);

    scope.filters.lock().unwrap().clear();
    rfs.scope_changed(&tree.srv);
    assert!(!rfs.is_shadowed(&fresh));
}
