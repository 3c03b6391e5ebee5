// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{RfsFile, RfsInode, Shadow, ShadowArena, ShadowRef};
use crate::chain::RfsInfo;
use crate::dispatch::dentry_ops;
use crate::runtime::Core;
use crate::vfs::{Dentry, DentryOperations, ObjId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

struct DentryState {
    info: Arc<RfsInfo>,
    files: Vec<Weak<RfsFile>>,
}

/// Shadow of a dentry. Owns a reference on the inode shadow and lists the
/// file shadows opened through it; it stays alive while any of them does.
pub struct RfsDentry {
    core: Weak<Core>,
    dentry: Weak<Dentry>,
    id: ObjId,
    refs: AtomicUsize,
    attached: AtomicBool,
    op_old: Arc<DentryOperations>,
    op_new: Arc<DentryOperations>,
    rinode: Mutex<Option<ShadowRef<RfsInode>>>,
    state: Mutex<DentryState>,
}

/// Every object kind can be revalidated, so the entry is always redirected.
fn redirect_dops(weak: &Weak<RfsDentry>, old: &DentryOperations) -> DentryOperations {
    let w = weak.clone();
    let orig = old.revalidate.clone();
    DentryOperations {
        revalidate: Some(Arc::new(move |dentry: &Arc<Dentry>| {
            dentry_ops::revalidate(&w, orig.as_ref(), dentry)
        })),
    }
}

impl RfsDentry {
    pub(crate) fn create(
        core: Weak<Core>,
        dentry: &Arc<Dentry>,
        rinode: ShadowRef<RfsInode>,
        info: Arc<RfsInfo>,
    ) -> Arc<Self> {
        rinode.set_info(info.clone());
        let op_old = dentry.d_op.get();
        let shadow = Arc::new_cyclic(|weak: &Weak<RfsDentry>| RfsDentry {
            op_new: Arc::new(redirect_dops(weak, &op_old)),
            core,
            dentry: Arc::downgrade(dentry),
            id: dentry.id(),
            refs: AtomicUsize::new(1),
            attached: AtomicBool::new(false),
            op_old,
            rinode: Mutex::new(Some(rinode)),
            state: Mutex::new(DentryState {
                info,
                files: Vec::new(),
            }),
        });
        dentry.d_op.swap(shadow.op_new.clone());
        shadow
    }

    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn dentry(&self) -> Option<Arc<Dentry>> {
        self.dentry.upgrade()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn info(&self) -> Arc<RfsInfo> {
        self.state.lock().unwrap().info.clone()
    }

    pub fn original_dops(&self) -> &Arc<DentryOperations> {
        &self.op_old
    }

    /// Open file shadows hanging off this dentry.
    pub fn open_files(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.files.iter().filter(|f| f.strong_count() > 0).count()
    }

    /// Swap the governing chain and hand it down to the inode and every open
    /// file, all under this dentry's lock.
    pub(crate) fn set_info(&self, info: Arc<RfsInfo>) {
        let mut state = self.state.lock().unwrap();
        if Arc::ptr_eq(&state.info.chain, &info.chain) && state.info.path == info.path {
            return;
        }
        tracing::debug!(
            object = self.id.raw(),
            path = %info.path.display(),
            old_chain = state.info.chain.id(),
            new_chain = info.chain.id(),
            "chain swapped"
        );
        state.files.retain(|f| f.strong_count() > 0);
        for file in state.files.iter().filter_map(Weak::upgrade) {
            file.set_info(info.clone());
        }
        if let Some(rinode) = self.rinode.lock().unwrap().as_ref() {
            rinode.set_info(info.clone());
        }
        state.info = info;
    }

    pub(crate) fn add_file(&self, file: &Arc<RfsFile>) {
        let mut state = self.state.lock().unwrap();
        file.set_info(state.info.clone());
        state.files.retain(|f| f.strong_count() > 0);
        state.files.push(Arc::downgrade(file));
    }

    pub(crate) fn remove_file(&self, file: &RfsFile) {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .retain(|f| f.strong_count() > 0 && !std::ptr::eq(f.as_ptr(), file));
    }
}

impl Shadow for RfsDentry {
    const KIND: &'static str = "dentry";

    fn object_id(&self) -> ObjId {
        self.id
    }

    fn refs(&self) -> &AtomicUsize {
        &self.refs
    }

    fn attached(&self) -> &AtomicBool {
        &self.attached
    }

    fn core(&self) -> &Weak<Core> {
        &self.core
    }

    fn arena(core: &Core) -> &Arc<ShadowArena<Self>> {
        &core.dentries
    }

    fn teardown(&self) {
        if let Some(dentry) = self.dentry.upgrade() {
            if !dentry.d_op.is(&self.op_new) {
                tracing::warn!(object = self.id.raw(), "dentry table replaced while shadowed");
            }
            dentry.d_op.swap(self.op_old.clone());
        }
    }

    fn retire(&self) {
        let rinode = self.rinode.lock().unwrap().take();
        self.state.lock().unwrap().files.clear();
        drop(rinode);
    }
}
