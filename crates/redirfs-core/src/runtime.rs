// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared framework state reached from every redirect

use crate::chain::{ChainBuilder, RfsInfo};
use crate::config::RedirfsConfig;
use crate::context::CallContext;
use crate::dcache::PendingTable;
use crate::error::{consistency_fault, OpResult, RfsError, RfsResult};
use crate::fault::{FaultInjector, FaultOp};
use crate::filter::FilterRegistry;
use crate::ops::{ObjKind, OpName};
use crate::scope::PathScope;
use crate::shadow::{RfsDentry, RfsFile, RfsInode, ShadowArena, ShadowRef};
use crate::vfs::{Dentry, DirEntry, File, Inode};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Snapshot of framework counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RfsStats {
    pub filters: usize,
    pub chains: usize,
    pub inodes: usize,
    pub dentries: usize,
    pub files: usize,
    pub pending_entries: usize,
    pub passthrough_calls: u64,
    pub intercepted_calls: u64,
}

pub(crate) struct Core {
    config: RedirfsConfig,
    enabled: AtomicBool,
    pub(crate) registry: FilterRegistry,
    pub(crate) builder: ChainBuilder,
    pub(crate) inodes: Arc<ShadowArena<RfsInode>>,
    pub(crate) dentries: Arc<ShadowArena<RfsDentry>>,
    pub(crate) files: Arc<ShadowArena<RfsFile>>,
    pending: PendingTable,
    pub(crate) faults: Arc<FaultInjector>,
    roots: Mutex<Vec<Weak<Dentry>>>,
    /// Adopted children the dentry cache has not linked yet; rebuilds cannot
    /// reach them through their parent.
    unlinked: Mutex<Vec<Weak<Dentry>>>,
    config_lock: Mutex<()>,
    passthrough: AtomicU64,
    intercepted: AtomicU64,
    this: Weak<Core>,
}

impl Core {
    pub(crate) fn new(config: RedirfsConfig, scope: Arc<dyn PathScope>) -> Arc<Self> {
        let faults = Arc::new(FaultInjector::with_policy(config.faults.clone()));
        let limits = &config.limits;
        let inodes = ShadowArena::new(limits.buckets, limits.max_inodes, faults.clone(), FaultOp::AllocInode);
        let dentries =
            ShadowArena::new(limits.buckets, limits.max_dentries, faults.clone(), FaultOp::AllocDentry);
        let files = ShadowArena::new(limits.buckets, limits.max_files, faults.clone(), FaultOp::AllocFile);
        Arc::new_cyclic(|this| Core {
            enabled: AtomicBool::new(config.enabled),
            registry: FilterRegistry::new(config.unique_priorities),
            builder: ChainBuilder::new(scope),
            inodes,
            dentries,
            files,
            pending: PendingTable::new(config.dcache.max_pending),
            faults,
            roots: Mutex::new(Vec::new()),
            unlinked: Mutex::new(Vec::new()),
            config_lock: Mutex::new(()),
            passthrough: AtomicU64::new(0),
            intercepted: AtomicU64::new(0),
            this: this.clone(),
            config,
        })
    }

    pub(crate) fn config(&self) -> &RedirfsConfig {
        &self.config
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns the previous state.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    /// Result for an operation the original table does not provide.
    pub(crate) fn missing(&self, op: OpName) -> OpResult {
        self.config.missing_op.result(op)
    }

    pub(crate) fn count_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_intercepted(&self) {
        self.intercepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn new_context<'c>(
        &self,
        info: &'c RfsInfo,
        rfile: Option<&'c RfsFile>,
    ) -> Option<CallContext<'c>> {
        if self.faults.should_fault(FaultOp::AllocContext) {
            tracing::warn!(path = %info.path.display(), "no call context, passing through");
            return None;
        }
        Some(CallContext::new(info, rfile))
    }

    pub(crate) fn info_for(&self, path: &Path) -> RfsResult<Arc<RfsInfo>> {
        if self.faults.should_fault(FaultOp::AllocChain) {
            return Err(RfsError::ResourceExhausted("chain"));
        }
        Ok(self.builder.info_for(path))
    }

    fn parent_attached(&self, dentry: &Dentry) -> bool {
        dentry
            .parent()
            .and_then(|parent| self.dentries.lookup(parent.id()))
            .is_some_and(|rdentry| rdentry.is_attached())
    }

    /// Dentries get a shadow when filters govern them, and directories also
    /// when their parent has one so that lookups below keep being observed.
    fn wants_shadow(&self, dentry: &Dentry, info: &RfsInfo) -> bool {
        if !dentry.is_positive() {
            return false;
        }
        !info.chain.is_empty() || (dentry.is_dir() && self.parent_attached(dentry))
    }

    fn attach_inode(&self, inode: &Arc<Inode>, kind: ObjKind, info: &Arc<RfsInfo>) -> RfsResult<ShadowRef<RfsInode>> {
        self.inodes.get_or_create(inode.id(), || {
            RfsInode::create(self.this.clone(), inode, kind, info.clone())
        })
    }

    /// Give `dentry` (and its inode) a shadow governed by `info`, or swap the
    /// chain of the one it already has. Returns false for objects that are
    /// never shadowed.
    pub(crate) fn attach_dentry(&self, dentry: &Arc<Dentry>, info: Arc<RfsInfo>) -> RfsResult<bool> {
        let Some(inode) = dentry.inode() else {
            return Ok(false);
        };
        let Some(kind) = inode.kind() else {
            return Ok(false);
        };
        if let Some(existing) = self.dentries.lookup(dentry.id()) {
            existing.set_info(info);
            self.dentries.pin(&existing);
            return Ok(true);
        }
        let rinode = self.attach_inode(&inode, kind, &info)?;
        let rdentry = self.dentries.get_or_create(dentry.id(), || {
            RfsDentry::create(self.this.clone(), dentry, rinode, info.clone())
        })?;
        rdentry.set_info(info);
        if self.dentries.pin(&rdentry) {
            tracing::debug!(object = dentry.id().raw(), path = %dentry.path().display(), "dentry attached");
        }
        Ok(true)
    }

    /// Drop the dentry's own reference on its shadow. Open files keep the
    /// shadow alive until they are released.
    pub(crate) fn detach_dentry(&self, dentry: &Dentry) {
        if let Some(rdentry) = self.dentries.lookup(dentry.id()) {
            if self.dentries.unpin(rdentry.arc()) {
                tracing::debug!(object = dentry.id().raw(), "dentry detached");
            }
        }
    }

    /// Attach or detach `dentry` according to `info`. Callers hold
    /// `config_lock`.
    fn apply_info(&self, dentry: &Arc<Dentry>, info: Arc<RfsInfo>, what: &str) {
        if !self.wants_shadow(dentry, &info) {
            // files opened through the dentry outlive its shadow
            if let Some(rdentry) = self.dentries.lookup(dentry.id()) {
                rdentry.set_info(info);
            }
            self.detach_dentry(dentry);
            return;
        }
        match self.attach_dentry(dentry, info) {
            Ok(_) => {}
            Err(RfsError::ResourceExhausted(res)) => {
                tracing::warn!(path = %dentry.path().display(), what = res, "dentry left unshadowed");
            }
            Err(err) => consistency_fault(what, err),
        }
    }

    /// Called after a lookup or creation under a shadowed directory.
    ///
    /// The decision is computed without locks and applied under
    /// `config_lock` only if no configuration change happened meanwhile;
    /// otherwise it is computed again.
    pub(crate) fn adopt_child(&self, dentry: &Arc<Dentry>) {
        if !self.is_enabled() || !dentry.is_positive() {
            return;
        }
        let Some(parent) = dentry.parent() else {
            return;
        };
        if !self.parent_attached(dentry) {
            return;
        }
        loop {
            let generation = self.pending.generation();
            let info = match self.pending.take(parent.id(), dentry.name()) {
                Some(info) => info,
                None => match self.info_for(&dentry.path()) {
                    Ok(info) => info,
                    Err(err) => {
                        tracing::warn!(path = %dentry.path().display(), %err, "child left unshadowed");
                        return;
                    }
                },
            };
            let _guard = self.config_lock.lock().unwrap();
            if self.pending.generation() != generation {
                tracing::debug!(path = %dentry.path().display(), "configuration changed during adoption");
                continue;
            }
            self.apply_info(dentry, info, "child shadow");
            self.remember_unlinked(dentry);
            return;
        }
    }

    /// `dentry` while it is alive and its parent does not list it yet.
    fn awaiting_link(weak: &Weak<Dentry>) -> Option<Arc<Dentry>> {
        let dentry = weak.upgrade().filter(|dentry| dentry.is_positive())?;
        let parent = dentry.parent()?;
        match parent.child(dentry.name()) {
            Some(_) => None,
            None => Some(dentry),
        }
    }

    fn remember_unlinked(&self, dentry: &Arc<Dentry>) {
        let mut unlinked = self.unlinked.lock().unwrap();
        unlinked.retain(|weak| Self::awaiting_link(weak).is_some());
        unlinked.push(Arc::downgrade(dentry));
    }

    /// A removed child loses its shadow and is never adopted again.
    pub(crate) fn forget_child(&self, dentry: &Dentry) {
        self.unlinked
            .lock()
            .unwrap()
            .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), dentry));
        self.detach_dentry(dentry);
    }

    /// Recompute adopted children that are not linked yet, limited to those
    /// below `under` when given.
    fn rebuild_unlinked(&self, under: Option<&Path>) {
        let pending: Vec<Arc<Dentry>> = {
            let mut unlinked = self.unlinked.lock().unwrap();
            unlinked.retain(|weak| Self::awaiting_link(weak).is_some());
            unlinked.iter().filter_map(Self::awaiting_link).collect()
        };
        for dentry in pending {
            let path = dentry.path();
            if under.is_some_and(|root| !path.starts_with(root)) {
                continue;
            }
            match self.info_for(&path) {
                Ok(info) => self.apply_info(&dentry, info, "rebuild"),
                Err(err) => tracing::warn!(path = %path.display(), %err, "chain not rebuilt"),
            }
        }
    }

    pub(crate) fn attach_file(
        &self,
        rdentry: &ShadowRef<RfsDentry>,
        file: &Arc<File>,
        kind: ObjKind,
    ) -> RfsResult<()> {
        let rfile = self.files.create_new(file.id(), || {
            RfsFile::create(self.this.clone(), file, kind, rdentry.clone())
        })?;
        rdentry.add_file(rfile.arc());
        self.files.pin(&rfile);
        tracing::debug!(object = file.id().raw(), dentry = rdentry.id().raw(), "file attached");
        Ok(())
    }

    pub(crate) fn detach_file(&self, rfile: &Arc<RfsFile>) {
        if self.files.unpin(rfile) {
            tracing::debug!(object = rfile.id().raw(), "file detached");
        }
    }

    /// Precompute inclusion decisions for children a listing of `dir`
    /// reported and the dentry cache does not hold yet.
    pub(crate) fn record_listing(&self, dir: &Arc<Dentry>, entries: &[DirEntry]) {
        if !self.config.dcache.eager_population || !self.is_enabled() {
            return;
        }
        let generation = self.pending.generation();
        let base = dir.path();
        for entry in entries {
            if entry.name == "." || entry.name == ".." || dir.child(&entry.name).is_some() {
                continue;
            }
            let info = match self.info_for(&base.join(&entry.name)) {
                Ok(info) => info,
                Err(err) => {
                    tracing::warn!(path = %base.display(), %err, "listing not recorded");
                    return;
                }
            };
            if info.chain.is_empty() && entry.kind != Some(ObjKind::Directory) {
                continue;
            }
            if !self.pending.insert(dir.id(), &entry.name, info, generation) {
                tracing::trace!(path = %base.display(), name = entry.name, "pending entry dropped");
                return;
            }
        }
    }

    pub(crate) fn add_root(&self, dentry: &Arc<Dentry>) {
        let mut roots = self.roots.lock().unwrap();
        roots.retain(|root| root.strong_count() > 0);
        if !roots.iter().any(|root| std::ptr::eq(root.as_ptr(), Arc::as_ptr(dentry))) {
            roots.push(Arc::downgrade(dentry));
        }
    }

    /// Recompute the chain of every cached dentry below `root`, parents
    /// before children.
    fn rebuild_subtree(&self, root: &Arc<Dentry>) {
        let mut stack = vec![root.clone()];
        while let Some(dentry) = stack.pop() {
            match self.info_for(&dentry.path()) {
                Ok(info) => self.apply_info(&dentry, info, "rebuild"),
                Err(err) => {
                    tracing::warn!(path = %dentry.path().display(), %err, "chain not rebuilt");
                }
            }
            if dentry.is_dir() {
                let mut children = dentry.children();
                children.reverse();
                stack.extend(children);
            }
        }
    }

    /// Rebuild every recorded root; roots nested below another are covered
    /// by the outer walk.
    fn rebuild_all(&self) {
        let roots: Vec<Arc<Dentry>> = {
            let mut roots = self.roots.lock().unwrap();
            roots.retain(|root| root.strong_count() > 0);
            roots.iter().filter_map(Weak::upgrade).collect()
        };
        let paths: Vec<_> = roots.iter().map(|root| root.path()).collect();
        for (root, path) in roots.iter().zip(&paths) {
            let nested = paths.iter().any(|other| other != path && path.starts_with(other));
            if !nested {
                self.rebuild_subtree(root);
            }
        }
        self.rebuild_unlinked(None);
    }

    /// Filters, their tables or the scope changed: drop stale listing
    /// decisions and swap chains everywhere.
    pub(crate) fn config_changed(&self) {
        let _guard = self.config_lock.lock().unwrap();
        self.pending.invalidate();
        self.rebuild_all();
    }

    /// Like `config_changed`, limited to one subtree.
    pub(crate) fn subtree_changed(&self, root: &Arc<Dentry>) {
        let _guard = self.config_lock.lock().unwrap();
        self.pending.invalidate();
        self.rebuild_subtree(root);
        self.rebuild_unlinked(Some(root.path().as_path()));
    }

    /// Detach every file and dentry shadow. Shadows pinned by in-flight calls
    /// go away when those calls return.
    pub(crate) fn shutdown(&self) {
        let _guard = self.config_lock.lock().unwrap();
        for rfile in self.files.snapshot() {
            self.detach_file(&rfile);
        }
        for rdentry in self.dentries.snapshot() {
            self.dentries.unpin(&rdentry);
        }
        self.pending.invalidate();
        self.roots.lock().unwrap().clear();
        self.unlinked.lock().unwrap().clear();
    }

    pub(crate) fn stats(&self) -> RfsStats {
        RfsStats {
            filters: self.registry.len(),
            chains: self.builder.live_chains(),
            inodes: self.inodes.live(),
            dentries: self.dentries.live(),
            files: self.files.live(),
            pending_entries: self.pending.len(),
            passthrough_calls: self.passthrough.load(Ordering::Relaxed),
            intercepted_calls: self.intercepted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::{ObjKind, OpName};
    use crate::scope::PathFlags;
    use crate::testing::fixtures::{framework, recording_filter, seeded_tree};
    use crate::vfs;
    use redirfs_test_utils::TraceRecorder;

    #[test]
    fn excluded_directory_stays_shadowed_below_included_parent() {
        let tree = seeded_tree();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Regular.op(OpName::Read)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();
        rfs.add_path(&filter, &tree.sub, PathFlags::Exclude).unwrap();

        let a = tree.srv.child("a.txt").unwrap();
        let b = tree.sub.child("b.txt").unwrap();
        assert!(rfs.is_shadowed(&tree.srv));
        assert!(rfs.is_shadowed(&a));
        // empty chain, but lookups below it must still be seen
        assert!(rfs.is_shadowed(&tree.sub));
        assert!(rfs.chain_for(&tree.sub).unwrap().is_empty());
        assert!(!rfs.is_shadowed(&b));
        assert!(!rfs.is_shadowed(&tree.other));
    }

    #[test]
    fn listing_feeds_the_next_lookup() {
        let tree = seeded_tree();
        tree.sub.child("b.txt").unwrap().d_drop();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Regular.op(OpName::Read)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();

        let dir = vfs::vfs_open(&tree.sub, libc::O_RDONLY).unwrap();
        let names: Vec<_> = vfs::vfs_readdir(&dir).unwrap().into_iter().map(|e| e.name).collect();
        vfs::vfs_close(&dir).unwrap();
        assert_eq!(names, vec!["b.txt".to_string()]);
        assert_eq!(rfs.stats().pending_entries, 1);

        let b = vfs::vfs_lookup(&tree.sub, "b.txt").unwrap();
        assert_eq!(rfs.stats().pending_entries, 0);
        assert!(rfs.is_shadowed(&b));
        assert_eq!(rfs.chain_for(&b).unwrap().filter_names(), vec!["a"]);
    }

    #[test]
    fn config_change_discards_pending_entries() {
        let tree = seeded_tree();
        tree.sub.child("b.txt").unwrap().d_drop();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Regular.op(OpName::Read)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();

        let dir = vfs::vfs_open(&tree.sub, libc::O_RDONLY).unwrap();
        vfs::vfs_readdir(&dir).unwrap();
        vfs::vfs_close(&dir).unwrap();
        assert_eq!(rfs.stats().pending_entries, 1);

        rfs.add_path(&filter, &tree.sub, PathFlags::Exclude).unwrap();
        assert_eq!(rfs.stats().pending_entries, 0);
        let b = vfs::vfs_lookup(&tree.sub, "b.txt").unwrap();
        assert!(!rfs.is_shadowed(&b));
    }

    #[test]
    fn new_children_of_shadowed_directories_are_adopted() {
        let tree = seeded_tree();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Directory.op(OpName::Create)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();

        let fresh = vfs::vfs_create(&tree.srv, "fresh.txt", 0o644).unwrap();
        assert!(rfs.is_shadowed(&fresh));
        assert_eq!(trace.events(), vec!["a.pre:create", "a.post:create"]);

        let unrelated = vfs::vfs_create(&tree.other, "plain.txt", 0o644).unwrap();
        assert!(!rfs.is_shadowed(&unrelated));
        assert_eq!(trace.len(), 2);
    }

    #[test]
    fn removal_detaches_the_dentry_shadow() {
        let tree = seeded_tree();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Directory.op(OpName::Unlink)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();

        let a = tree.srv.child("a.txt").unwrap();
        assert!(rfs.is_shadowed(&a));
        vfs::vfs_unlink(&tree.srv, "a.txt").unwrap();
        assert!(!rfs.is_shadowed(&a));
        assert_eq!(trace.count("a.pre:unlink"), 1);
    }

    #[test]
    fn shutdown_restores_every_table() {
        let tree = seeded_tree();
        let rfs = framework();
        let trace = TraceRecorder::new();
        let filter = recording_filter(&rfs, &trace, "a", 10, &[ObjKind::Regular.op(OpName::Read)]);
        rfs.add_path(&filter, &tree.srv, PathFlags::Include).unwrap();
        assert!(rfs.stats().dentries > 0);

        rfs.shutdown();
        let stats = rfs.stats();
        assert_eq!((stats.inodes, stats.dentries, stats.files), (0, 0, 0));
        let a = tree.srv.child("a.txt").unwrap();
        assert!(a.inode().unwrap().i_fop.is(tree.fs.regular_fops()));
        assert!(tree.srv.inode().unwrap().i_op.is(tree.fs.directory_iops()));
        assert!(a.d_op.is(tree.fs.dentry_ops()));
        assert!(rfs.core().roots.lock().unwrap().is_empty());
    }
}
