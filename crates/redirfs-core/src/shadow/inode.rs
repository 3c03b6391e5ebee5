// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{Shadow, ShadowArena};
use crate::chain::RfsInfo;
use crate::dispatch::inode_ops;
use crate::ops::{ObjKind, OpName};
use crate::runtime::Core;
use crate::vfs::{Dentry, File, FileOperations, Inode, InodeOperations, ObjId};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex, Weak};

/// Shadow of an inode. Redirects the inode table and the `open` entry of
/// the inode's default file table.
pub struct RfsInode {
    core: Weak<Core>,
    inode: Weak<Inode>,
    id: ObjId,
    kind: ObjKind,
    refs: AtomicUsize,
    attached: AtomicBool,
    op_old: Arc<InodeOperations>,
    op_new: Arc<InodeOperations>,
    fop_old: Arc<FileOperations>,
    fop_new: Arc<FileOperations>,
    info: Mutex<Arc<RfsInfo>>,
}

/// Entries the object kind supports are redirected even when the original
/// table lacks them.
fn redirect_iops(weak: &Weak<RfsInode>, old: &InodeOperations, kind: ObjKind) -> InodeOperations {
    let wants = |op: OpName, present: bool| present || kind.supports(op);
    let mut ops = InodeOperations::default();
    if wants(OpName::Lookup, old.lookup.is_some()) {
        let w = weak.clone();
        let orig = old.lookup.clone();
        ops.lookup = Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>| {
            inode_ops::lookup(&w, orig.as_ref(), dir, dentry)
        }));
    }
    if wants(OpName::Create, old.create.is_some()) {
        let w = weak.clone();
        let orig = old.create.clone();
        ops.create = Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32| {
            inode_ops::create(&w, orig.as_ref(), dir, dentry, mode)
        }));
    }
    if wants(OpName::Mkdir, old.mkdir.is_some()) {
        let w = weak.clone();
        let orig = old.mkdir.clone();
        ops.mkdir = Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32| {
            inode_ops::mkdir(&w, orig.as_ref(), dir, dentry, mode)
        }));
    }
    if wants(OpName::Unlink, old.unlink.is_some()) {
        let w = weak.clone();
        let orig = old.unlink.clone();
        ops.unlink = Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>| {
            inode_ops::unlink(&w, orig.as_ref(), dir, dentry)
        }));
    }
    if wants(OpName::Rmdir, old.rmdir.is_some()) {
        let w = weak.clone();
        let orig = old.rmdir.clone();
        ops.rmdir = Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>| {
            inode_ops::rmdir(&w, orig.as_ref(), dir, dentry)
        }));
    }
    if wants(OpName::Permission, old.permission.is_some()) {
        let w = weak.clone();
        let orig = old.permission.clone();
        ops.permission = Some(Arc::new(move |inode: &Arc<Inode>, mask: i32| {
            inode_ops::permission(&w, orig.as_ref(), inode, mask)
        }));
    }
    if wants(OpName::Readlink, old.readlink.is_some()) {
        let w = weak.clone();
        let orig = old.readlink.clone();
        ops.readlink = Some(Arc::new(move |dentry: &Arc<Dentry>, buf: &mut [u8]| {
            inode_ops::readlink(&w, orig.as_ref(), dentry, buf)
        }));
    }
    ops
}

/// Copy of the default file table with `open` always redirected, so every
/// open of the inode can produce a file shadow.
fn redirect_open(weak: &Weak<RfsInode>, old: &FileOperations) -> FileOperations {
    let w = weak.clone();
    let orig = old.open.clone();
    FileOperations {
        open: Some(Arc::new(move |inode: &Arc<Inode>, file: &Arc<File>| {
            inode_ops::open(&w, orig.as_ref(), inode, file)
        })),
        ..old.clone()
    }
}

impl RfsInode {
    /// Capture the inode's tables and install the redirecting ones.
    pub(crate) fn create(
        core: Weak<Core>,
        inode: &Arc<Inode>,
        kind: ObjKind,
        info: Arc<RfsInfo>,
    ) -> Arc<Self> {
        let op_old = inode.i_op.get();
        let fop_old = inode.i_fop.get();
        let shadow = Arc::new_cyclic(|weak: &Weak<RfsInode>| RfsInode {
            op_new: Arc::new(redirect_iops(weak, &op_old, kind)),
            fop_new: Arc::new(redirect_open(weak, &fop_old)),
            core,
            inode: Arc::downgrade(inode),
            id: inode.id(),
            kind,
            refs: AtomicUsize::new(1),
            attached: AtomicBool::new(false),
            op_old,
            fop_old,
            info: Mutex::new(info),
        });
        inode.i_op.swap(shadow.op_new.clone());
        inode.i_fop.swap(shadow.fop_new.clone());
        shadow
    }

    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn kind(&self) -> ObjKind {
        self.kind
    }

    pub fn info(&self) -> Arc<RfsInfo> {
        self.info.lock().unwrap().clone()
    }

    pub(crate) fn set_info(&self, info: Arc<RfsInfo>) {
        *self.info.lock().unwrap() = info;
    }

    pub fn original_iops(&self) -> &Arc<InodeOperations> {
        &self.op_old
    }

    pub fn original_fops(&self) -> &Arc<FileOperations> {
        &self.fop_old
    }
}

impl Shadow for RfsInode {
    const KIND: &'static str = "inode";

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
        &core.inodes
    }

    fn teardown(&self) {
        let Some(inode) = self.inode.upgrade() else {
            return;
        };
        if !inode.i_op.is(&self.op_new) || !inode.i_fop.is(&self.fop_new) {
            tracing::warn!(object = self.id.raw(), "inode table replaced while shadowed");
        }
        inode.i_op.swap(self.op_old.clone());
        inode.i_fop.swap(self.fop_old.clone());
    }

    fn retire(&self) {}
}
