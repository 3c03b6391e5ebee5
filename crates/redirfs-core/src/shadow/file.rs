// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{RfsDentry, Shadow, ShadowArena, ShadowRef};
use crate::chain::RfsInfo;
use crate::dispatch::file_ops;
use crate::filter::FilterId;
use crate::ops::{ObjKind, OpName};
use crate::runtime::Core;
use crate::vfs::{DirContext, File, FileOperations, Inode, ObjId};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex, Weak};

type FileData = Arc<dyn Any + Send + Sync>;

/// Shadow of an open file. Holds a reference on its dentry shadow until the
/// file is released.
pub struct RfsFile {
    core: Weak<Core>,
    file: Weak<File>,
    id: ObjId,
    kind: ObjKind,
    refs: AtomicUsize,
    attached: AtomicBool,
    op_old: Arc<FileOperations>,
    op_new: Arc<FileOperations>,
    rdentry: Mutex<Option<ShadowRef<RfsDentry>>>,
    info: Mutex<Arc<RfsInfo>>,
    data: Mutex<HashMap<FilterId, FileData>>,
}

/// Entries the object kind supports are redirected even when the original
/// table lacks them; such calls get the configured missing-entry result.
fn redirect_fops(weak: &Weak<RfsFile>, old: &FileOperations, kind: ObjKind) -> FileOperations {
    let wants = |op: OpName, present: bool| present || kind.supports(op);
    let mut ops = FileOperations {
        open: old.open.clone(),
        ..FileOperations::default()
    };
    if ops.open.is_none() {
        ops.open = Some(Arc::new(|_inode: &Arc<Inode>, _file: &Arc<File>| Ok(0)));
    }
    {
        let w = weak.clone();
        let orig = old.release.clone();
        ops.release = Some(Arc::new(move |inode: &Arc<Inode>, file: &Arc<File>| {
            file_ops::release(&w, orig.as_ref(), inode, file)
        }));
    }
    if wants(OpName::Llseek, old.llseek.is_some()) {
        let w = weak.clone();
        let orig = old.llseek.clone();
        ops.llseek = Some(Arc::new(move |file: &Arc<File>, offset: i64, whence: i32| {
            file_ops::llseek(&w, orig.as_ref(), file, offset, whence)
        }));
    }
    if wants(OpName::Read, old.read.is_some()) {
        let w = weak.clone();
        let orig = old.read.clone();
        ops.read = Some(Arc::new(move |file: &Arc<File>, buf: &mut [u8], pos: u64| {
            file_ops::read(&w, orig.as_ref(), file, buf, pos)
        }));
    }
    if wants(OpName::Write, old.write.is_some()) {
        let w = weak.clone();
        let orig = old.write.clone();
        ops.write = Some(Arc::new(move |file: &Arc<File>, buf: &[u8], pos: u64| {
            file_ops::write(&w, orig.as_ref(), file, buf, pos)
        }));
    }
    if wants(OpName::Iterate, old.iterate.is_some()) {
        let w = weak.clone();
        let orig = old.iterate.clone();
        ops.iterate = Some(Arc::new(move |file: &Arc<File>, ctx: &mut DirContext| {
            file_ops::iterate(&w, orig.as_ref(), file, ctx)
        }));
    }
    if wants(OpName::Flush, old.flush.is_some()) {
        let w = weak.clone();
        let orig = old.flush.clone();
        ops.flush = Some(Arc::new(move |file: &Arc<File>| {
            file_ops::flush(&w, orig.as_ref(), file)
        }));
    }
    if wants(OpName::Fsync, old.fsync.is_some()) {
        let w = weak.clone();
        let orig = old.fsync.clone();
        ops.fsync = Some(Arc::new(move |file: &Arc<File>, datasync: bool| {
            file_ops::fsync(&w, orig.as_ref(), file, datasync)
        }));
    }
    if wants(OpName::Ioctl, old.ioctl.is_some()) {
        let w = weak.clone();
        let orig = old.ioctl.clone();
        ops.ioctl = Some(Arc::new(move |file: &Arc<File>, cmd: u32, arg: u64| {
            file_ops::ioctl(&w, orig.as_ref(), file, cmd, arg)
        }));
    }
    if wants(OpName::Fallocate, old.fallocate.is_some()) {
        let w = weak.clone();
        let orig = old.fallocate.clone();
        ops.fallocate = Some(Arc::new(move |file: &Arc<File>, mode: i32, offset: u64, len: u64| {
            file_ops::fallocate(&w, orig.as_ref(), file, mode, offset, len)
        }));
    }
    ops
}

impl RfsFile {
    /// Capture the file's current table (the one the original open left in
    /// place) and install the redirecting one.
    pub(crate) fn create(
        core: Weak<Core>,
        file: &Arc<File>,
        kind: ObjKind,
        rdentry: ShadowRef<RfsDentry>,
    ) -> Arc<Self> {
        let op_old = file.f_op.get();
        let info = rdentry.info();
        let shadow = Arc::new_cyclic(|weak: &Weak<RfsFile>| RfsFile {
            op_new: Arc::new(redirect_fops(weak, &op_old, kind)),
            core,
            file: Arc::downgrade(file),
            id: file.id(),
            kind,
            refs: AtomicUsize::new(1),
            attached: AtomicBool::new(false),
            op_old,
            rdentry: Mutex::new(Some(rdentry)),
            info: Mutex::new(info),
            data: Mutex::new(HashMap::new()),
        });
        file.f_op.swap(shadow.op_new.clone());
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

    pub fn original_fops(&self) -> &Arc<FileOperations> {
        &self.op_old
    }

    pub(crate) fn data<T: Any + Send + Sync>(&self, filter: FilterId) -> Option<Arc<T>> {
        let data = self.data.lock().unwrap().get(&filter).cloned()?;
        data.downcast::<T>().ok()
    }

    pub(crate) fn attach_data(&self, filter: FilterId, value: FileData) -> Option<FileData> {
        self.data.lock().unwrap().insert(filter, value)
    }

    pub(crate) fn detach_data(&self, filter: FilterId) -> bool {
        self.data.lock().unwrap().remove(&filter).is_some()
    }
}

impl Shadow for RfsFile {
    const KIND: &'static str = "file";

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
        &core.files
    }

    fn teardown(&self) {
        if let Some(file) = self.file.upgrade() {
            if !file.f_op.is(&self.op_new) {
                tracing::warn!(object = self.id.raw(), "file table replaced while shadowed");
            }
            file.f_op.swap(self.op_old.clone());
        }
    }

    fn retire(&self) {
        let rdentry = self.rdentry.lock().unwrap().take();
        if let Some(rdentry) = &rdentry {
            rdentry.remove_file(self);
        }
        self.data.lock().unwrap().clear();
        drop(rdentry);
    }
}
