// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Real-object model: inodes, dentries and open files, each reaching its
//! implementation through a swappable operation table.

use crate::error::{Errno, OpResult};
use crate::ops::{ObjKind, OpName};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

pub const MAY_EXEC: i32 = 0x1;
pub const MAY_WRITE: i32 = 0x2;
pub const MAY_READ: i32 = 0x4;

static NEXT_OBJ_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a real object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(u64);

impl ObjId {
    pub(crate) fn next() -> Self {
        ObjId(NEXT_OBJ_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The operation-table slot of a real object.
pub struct OpsCell<T> {
    slot: RwLock<Arc<T>>,
}

impl<T> OpsCell<T> {
    pub fn new(ops: Arc<T>) -> Self {
        Self {
            slot: RwLock::new(ops),
        }
    }

    pub fn get(&self) -> Arc<T> {
        self.slot.read().unwrap().clone()
    }

    /// Install `ops`, returning the table it replaced.
    pub fn swap(&self, ops: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.slot.write().unwrap(), ops)
    }

    pub fn is(&self, ops: &Arc<T>) -> bool {
        Arc::ptr_eq(&self.slot.read().unwrap(), ops)
    }
}

impl<T> fmt::Debug for OpsCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpsCell({:p})", Arc::as_ptr(&self.slot.read().unwrap()))
    }
}

pub type OpenFn = Arc<dyn Fn(&Arc<Inode>, &Arc<File>) -> OpResult + Send + Sync>;
pub type ReleaseFn = OpenFn;
pub type LlseekFn = Arc<dyn Fn(&Arc<File>, i64, i32) -> OpResult + Send + Sync>;
pub type ReadFn = Arc<dyn Fn(&Arc<File>, &mut [u8], u64) -> OpResult + Send + Sync>;
pub type WriteFn = Arc<dyn Fn(&Arc<File>, &[u8], u64) -> OpResult + Send + Sync>;
pub type IterateFn = Arc<dyn Fn(&Arc<File>, &mut DirContext) -> OpResult + Send + Sync>;
pub type FlushFn = Arc<dyn Fn(&Arc<File>) -> OpResult + Send + Sync>;
pub type FsyncFn = Arc<dyn Fn(&Arc<File>, bool) -> OpResult + Send + Sync>;
pub type IoctlFn = Arc<dyn Fn(&Arc<File>, u32, u64) -> OpResult + Send + Sync>;
pub type FallocateFn = Arc<dyn Fn(&Arc<File>, i32, u64, u64) -> OpResult + Send + Sync>;
pub type LookupFn = Arc<dyn Fn(&Arc<Inode>, &Arc<Dentry>) -> OpResult + Send + Sync>;
pub type CreateFn = Arc<dyn Fn(&Arc<Inode>, &Arc<Dentry>, u32) -> OpResult + Send + Sync>;
pub type UnlinkFn = LookupFn;
pub type PermissionFn = Arc<dyn Fn(&Arc<Inode>, i32) -> OpResult + Send + Sync>;
pub type ReadlinkFn = Arc<dyn Fn(&Arc<Dentry>, &mut [u8]) -> OpResult + Send + Sync>;
pub type RevalidateFn = Arc<dyn Fn(&Arc<Dentry>) -> OpResult + Send + Sync>;

/// Operations reached through an open file (and, before open, through the
/// inode's default file table).
#[derive(Clone, Default)]
pub struct FileOperations {
    pub open: Option<OpenFn>,
    pub release: Option<ReleaseFn>,
    pub llseek: Option<LlseekFn>,
    pub read: Option<ReadFn>,
    pub write: Option<WriteFn>,
    pub iterate: Option<IterateFn>,
    pub flush: Option<FlushFn>,
    pub fsync: Option<FsyncFn>,
    pub ioctl: Option<IoctlFn>,
    pub fallocate: Option<FallocateFn>,
}

impl FileOperations {
    pub fn provides(&self, op: OpName) -> bool {
        match op {
            OpName::Open => self.open.is_some(),
            OpName::Release => self.release.is_some(),
            OpName::Llseek => self.llseek.is_some(),
            OpName::Read => self.read.is_some(),
            OpName::Write => self.write.is_some(),
            OpName::Iterate => self.iterate.is_some(),
            OpName::Flush => self.flush.is_some(),
            OpName::Fsync => self.fsync.is_some(),
            OpName::Ioctl => self.ioctl.is_some(),
            OpName::Fallocate => self.fallocate.is_some(),
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct InodeOperations {
    pub lookup: Option<LookupFn>,
    /// Serves both `create` and `mknod`; the file type travels in the mode.
    pub create: Option<CreateFn>,
    pub mkdir: Option<CreateFn>,
    pub unlink: Option<UnlinkFn>,
    pub rmdir: Option<UnlinkFn>,
    pub permission: Option<PermissionFn>,
    pub readlink: Option<ReadlinkFn>,
}

impl InodeOperations {
    pub fn provides(&self, op: OpName) -> bool {
        match op {
            OpName::Lookup => self.lookup.is_some(),
            OpName::Create => self.create.is_some(),
            OpName::Mkdir => self.mkdir.is_some(),
            OpName::Unlink => self.unlink.is_some(),
            OpName::Rmdir => self.rmdir.is_some(),
            OpName::Permission => self.permission.is_some(),
            OpName::Readlink => self.readlink.is_some(),
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct DentryOperations {
    pub revalidate: Option<RevalidateFn>,
}

fn present(ops: &[(OpName, bool)], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
        .entries(ops.iter().filter(|(_, set)| *set).map(|(op, _)| op.as_str()))
        .finish()
}

impl fmt::Debug for FileOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<(OpName, bool)> = OpName::ALL.iter().map(|op| (*op, self.provides(*op))).collect();
        present(&ops, f)
    }
}

impl fmt::Debug for InodeOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<(OpName, bool)> = OpName::ALL.iter().map(|op| (*op, self.provides(*op))).collect();
        present(&ops, f)
    }
}

impl fmt::Debug for DentryOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        present(&[(OpName::Revalidate, self.revalidate.is_some())], f)
    }
}

/// Result the VFS produces when a table lacks an entry.
pub fn missing_op(op: OpName) -> OpResult {
    match op {
        OpName::Open | OpName::Release | OpName::Flush | OpName::Permission => Ok(0),
        OpName::Revalidate => Ok(1),
        OpName::Iterate | OpName::Lookup => Err(Errno::ENOTDIR),
        OpName::Ioctl => Err(Errno::ENOTTY),
        OpName::Fallocate => Err(Errno::EOPNOTSUPP),
        OpName::Create | OpName::Mkdir | OpName::Unlink | OpName::Rmdir => Err(Errno::EPERM),
        _ => Err(Errno::EINVAL),
    }
}

pub struct Inode {
    id: ObjId,
    ino: u64,
    mode: u32,
    pub i_op: OpsCell<InodeOperations>,
    pub i_fop: OpsCell<FileOperations>,
    private: Arc<dyn Any + Send + Sync>,
}

impl Inode {
    pub fn new(
        ino: u64,
        mode: u32,
        i_op: Arc<InodeOperations>,
        i_fop: Arc<FileOperations>,
        private: Arc<dyn Any + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ObjId::next(),
            ino,
            mode,
            i_op: OpsCell::new(i_op),
            i_fop: OpsCell::new(i_fop),
            private,
        })
    }

    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn kind(&self) -> Option<ObjKind> {
        ObjKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(ObjKind::Directory)
    }

    /// Implementation-private data of the filesystem that owns the inode.
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.downcast_ref::<T>()
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("id", &self.id)
            .field("ino", &self.ino)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish()
    }
}

pub struct Dentry {
    id: ObjId,
    name: String,
    parent: Option<Weak<Dentry>>,
    inode: RwLock<Option<Arc<Inode>>>,
    children: Mutex<BTreeMap<String, Arc<Dentry>>>,
    fs_dop: Arc<DentryOperations>,
    pub d_op: OpsCell<DentryOperations>,
}

impl Dentry {
    pub fn new_root(inode: Arc<Inode>, d_op: Arc<DentryOperations>) -> Arc<Self> {
        Arc::new(Self {
            id: ObjId::next(),
            name: "/".to_string(),
            parent: None,
            inode: RwLock::new(Some(inode)),
            children: Mutex::new(BTreeMap::new()),
            fs_dop: d_op.clone(),
            d_op: OpsCell::new(d_op),
        })
    }

    /// Allocate a negative, not yet hashed child. Children start with the
    /// filesystem's dentry table, never with a table installed on the parent.
    pub fn alloc_child(self: &Arc<Self>, name: &str) -> Arc<Dentry> {
        Arc::new(Self {
            id: ObjId::next(),
            name: name.to_string(),
            parent: Some(Arc::downgrade(self)),
            inode: RwLock::new(None),
            children: Mutex::new(BTreeMap::new()),
            fs_dop: self.fs_dop.clone(),
            d_op: OpsCell::new(self.fs_dop.clone()),
        })
    }

    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.inode.read().unwrap().clone()
    }

    pub fn is_positive(&self) -> bool {
        self.inode.read().unwrap().is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.inode().is_some_and(|inode| inode.is_dir())
    }

    pub fn instantiate(&self, inode: Arc<Inode>) {
        *self.inode.write().unwrap() = Some(inode);
    }

    pub fn path(&self) -> PathBuf {
        let mut names = vec![self.name.clone()];
        let mut cursor = self.parent();
        while let Some(dentry) = cursor {
            names.push(dentry.name.clone());
            cursor = dentry.parent();
        }
        let mut path = PathBuf::from("/");
        for name in names.iter().rev().skip(1) {
            path.push(name);
        }
        path
    }

    pub fn child(&self, name: &str) -> Option<Arc<Dentry>> {
        self.children.lock().unwrap().get(name).cloned()
    }

    pub fn children(&self) -> Vec<Arc<Dentry>> {
        self.children.lock().unwrap().values().cloned().collect()
    }

    /// Hash `child` into this directory's cache.
    pub fn d_add(&self, child: Arc<Dentry>) {
        self.children.lock().unwrap().insert(child.name.clone(), child);
    }

    /// Unhash this dentry from its parent's cache.
    pub fn d_drop(&self) {
        if let Some(parent) = self.parent() {
            let mut children = parent.children.lock().unwrap();
            if children.get(&self.name).is_some_and(|d| d.id == self.id) {
                children.remove(&self.name);
            }
        }
    }
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry").field("id", &self.id).field("path", &self.path()).finish()
    }
}

pub struct File {
    id: ObjId,
    dentry: Arc<Dentry>,
    inode: Arc<Inode>,
    flags: i32,
    pos: Mutex<u64>,
    pub f_op: OpsCell<FileOperations>,
}

impl File {
    fn new(dentry: Arc<Dentry>, inode: Arc<Inode>, flags: i32) -> Arc<Self> {
        let f_op = inode.i_fop.get();
        Arc::new(Self {
            id: ObjId::next(),
            dentry,
            inode,
            flags,
            pos: Mutex::new(0),
            f_op: OpsCell::new(f_op),
        })
    }

    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }

    pub fn pos(&self) -> u64 {
        *self.pos.lock().unwrap()
    }

    pub fn set_pos(&self, pos: u64) {
        *self.pos.lock().unwrap() = pos;
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("path", &self.dentry.path())
            .field("flags", &self.flags)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub kind: Option<ObjKind>,
}

/// Sink for directory iteration.
#[derive(Debug, Default)]
pub struct DirContext {
    entries: Vec<DirEntry>,
}

impl DirContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, name: &str, ino: u64, kind: Option<ObjKind>) {
        self.entries.push(DirEntry {
            name: name.to_string(),
            ino,
            kind,
        });
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }
}

pub fn vfs_open(dentry: &Arc<Dentry>, flags: i32) -> Result<Arc<File>, Errno> {
    let inode = dentry.inode().ok_or(Errno::ENOENT)?;
    let file = File::new(dentry.clone(), inode.clone(), flags);
    let fop = file.f_op.get();
    match &fop.open {
        Some(open) => open(&inode, &file)?,
        None => missing_op(OpName::Open)?,
    };
    Ok(file)
}

/// Flush and release an open file.
pub fn vfs_close(file: &Arc<File>) -> OpResult {
    let fop = file.f_op.get();
    let flushed = match &fop.flush {
        Some(flush) => flush(file),
        None => missing_op(OpName::Flush),
    };
    let fop = file.f_op.get();
    let released = match &fop.release {
        Some(release) => release(file.inode(), file),
        None => missing_op(OpName::Release),
    };
    flushed.and(released)
}

pub fn vfs_read(file: &Arc<File>, buf: &mut [u8]) -> OpResult {
    let pos = file.pos();
    let fop = file.f_op.get();
    let read = match &fop.read {
        Some(read) => read(file, buf, pos)?,
        None => missing_op(OpName::Read)?,
    };
    file.set_pos(pos + read as u64);
    Ok(read)
}

pub fn vfs_write(file: &Arc<File>, buf: &[u8]) -> OpResult {
    let pos = file.pos();
    let fop = file.f_op.get();
    let written = match &fop.write {
        Some(write) => write(file, buf, pos)?,
        None => missing_op(OpName::Write)?,
    };
    file.set_pos(pos + written as u64);
    Ok(written)
}

pub fn vfs_llseek(file: &Arc<File>, offset: i64, whence: i32) -> OpResult {
    let fop = file.f_op.get();
    match &fop.llseek {
        Some(llseek) => llseek(file, offset, whence),
        None => missing_op(OpName::Llseek),
    }
}

pub fn vfs_readdir(file: &Arc<File>) -> Result<Vec<DirEntry>, Errno> {
    let mut ctx = DirContext::new();
    let fop = file.f_op.get();
    match &fop.iterate {
        Some(iterate) => iterate(file, &mut ctx)?,
        None => missing_op(OpName::Iterate)?,
    };
    Ok(ctx.into_entries())
}

pub fn vfs_fsync(file: &Arc<File>, datasync: bool) -> OpResult {
    let fop = file.f_op.get();
    match &fop.fsync {
        Some(fsync) => fsync(file, datasync),
        None => missing_op(OpName::Fsync),
    }
}

pub fn vfs_ioctl(file: &Arc<File>, cmd: u32, arg: u64) -> OpResult {
    let fop = file.f_op.get();
    match &fop.ioctl {
        Some(ioctl) => ioctl(file, cmd, arg),
        None => missing_op(OpName::Ioctl),
    }
}

pub fn vfs_fallocate(file: &Arc<File>, mode: i32, offset: u64, len: u64) -> OpResult {
    let fop = file.f_op.get();
    match &fop.fallocate {
        Some(fallocate) => fallocate(file, mode, offset, len),
        None => missing_op(OpName::Fallocate),
    }
}

fn dir_inode(dir: &Dentry) -> Result<Arc<Inode>, Errno> {
    let inode = dir.inode().ok_or(Errno::ENOENT)?;
    if !inode.is_dir() {
        return Err(Errno::ENOTDIR);
    }
    Ok(inode)
}

fn check_name(name: &str) -> Result<(), Errno> {
    if name.is_empty() || name.contains('/') {
        return Err(Errno::EINVAL);
    }
    if name.len() > 255 {
        return Err(Errno::ENAMETOOLONG);
    }
    Ok(())
}

/// Cached children are revalidated through their dentry table; anything
/// else goes to the directory's `lookup`.
pub fn vfs_lookup(dir: &Arc<Dentry>, name: &str) -> Result<Arc<Dentry>, Errno> {
    let dir_ino = dir_inode(dir)?;
    match name {
        "." => return Ok(dir.clone()),
        ".." => return Ok(dir.parent().unwrap_or_else(|| dir.clone())),
        _ => check_name(name)?,
    }
    if let Some(child) = dir.child(name) {
        let dop = child.d_op.get();
        let valid = match &dop.revalidate {
            Some(revalidate) => revalidate(&child)?,
            None => missing_op(OpName::Revalidate)?,
        };
        if valid > 0 {
            return Ok(child);
        }
        child.d_drop();
    }
    let child = dir.alloc_child(name);
    let iop = dir_ino.i_op.get();
    match &iop.lookup {
        Some(lookup) => lookup(&dir_ino, &child)?,
        None => missing_op(OpName::Lookup)?,
    };
    if !child.is_positive() {
        return Err(Errno::ENOENT);
    }
    dir.d_add(child.clone());
    Ok(child)
}

/// Walk `path` from `root`, one `vfs_lookup` per component.
pub fn vfs_resolve(root: &Arc<Dentry>, path: impl AsRef<Path>) -> Result<Arc<Dentry>, Errno> {
    let mut cursor = root.clone();
    for component in path.as_ref().components() {
        cursor = match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => cursor,
            Component::ParentDir => vfs_lookup(&cursor, "..")?,
            Component::Normal(name) => {
                let name = name.to_str().ok_or(Errno::EINVAL)?;
                vfs_lookup(&cursor, name)?
            }
        };
    }
    Ok(cursor)
}

fn create_with(
    dir: &Arc<Dentry>,
    name: &str,
    mode: u32,
    pick: impl FnOnce(&InodeOperations) -> Option<CreateFn>,
    op: OpName,
) -> Result<Arc<Dentry>, Errno> {
    let dir_ino = dir_inode(dir)?;
    check_name(name)?;
    if let Ok(existing) = vfs_lookup(dir, name) {
        if existing.is_positive() {
            return Err(Errno::EEXIST);
        }
    }
    let child = dir.alloc_child(name);
    let iop = dir_ino.i_op.get();
    match pick(&iop) {
        Some(create) => create(&dir_ino, &child, mode)?,
        None => missing_op(op)?,
    };
    if !child.is_positive() {
        return Err(Errno::EIO);
    }
    dir.d_add(child.clone());
    Ok(child)
}

pub fn vfs_create(dir: &Arc<Dentry>, name: &str, mode: u32) -> Result<Arc<Dentry>, Errno> {
    let mode = (mode & !(libc::S_IFMT as u32)) | libc::S_IFREG as u32;
    create_with(dir, name, mode, |iop| iop.create.clone(), OpName::Create)
}

pub fn vfs_mkdir(dir: &Arc<Dentry>, name: &str, mode: u32) -> Result<Arc<Dentry>, Errno> {
    let mode = (mode & !(libc::S_IFMT as u32)) | libc::S_IFDIR as u32;
    create_with(dir, name, mode, |iop| iop.mkdir.clone(), OpName::Mkdir)
}

/// Create a special file; the file type is taken from `mode`.
pub fn vfs_mknod(dir: &Arc<Dentry>, name: &str, mode: u32) -> Result<Arc<Dentry>, Errno> {
    match ObjKind::from_mode(mode) {
        Some(ObjKind::Directory) | Some(ObjKind::Symlink) | None => Err(Errno::EINVAL),
        Some(_) => create_with(dir, name, mode, |iop| iop.create.clone(), OpName::Create),
    }
}

fn remove_with(
    dir: &Arc<Dentry>,
    name: &str,
    pick: impl FnOnce(&InodeOperations) -> Option<UnlinkFn>,
    op: OpName,
) -> OpResult {
    let dir_ino = dir_inode(dir)?;
    let child = vfs_lookup(dir, name)?;
    let iop = dir_ino.i_op.get();
    let rv = match pick(&iop) {
        Some(remove) => remove(&dir_ino, &child)?,
        None => missing_op(op)?,
    };
    child.d_drop();
    Ok(rv)
}

pub fn vfs_unlink(dir: &Arc<Dentry>, name: &str) -> OpResult {
    remove_with(dir, name, |iop| iop.unlink.clone(), OpName::Unlink)
}

pub fn vfs_rmdir(dir: &Arc<Dentry>, name: &str) -> OpResult {
    remove_with(dir, name, |iop| iop.rmdir.clone(), OpName::Rmdir)
}

pub fn vfs_permission(inode: &Arc<Inode>, mask: i32) -> OpResult {
    let iop = inode.i_op.get();
    match &iop.permission {
        Some(permission) => permission(inode, mask),
        None => missing_op(OpName::Permission),
    }
}

pub fn vfs_readlink(dentry: &Arc<Dentry>, buf: &mut [u8]) -> OpResult {
    let inode = dentry.inode().ok_or(Errno::ENOENT)?;
    let iop = inode.i_op.get();
    match &iop.readlink {
        Some(readlink) => readlink(dentry, buf),
        None => missing_op(OpName::Readlink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_inode_with(iop: InodeOperations) -> Arc<Inode> {
        Inode::new(
            1,
            libc::S_IFDIR as u32 | 0o755,
            Arc::new(iop),
            Arc::new(FileOperations::default()),
            Arc::new(()),
        )
    }

    #[test]
    fn ops_cell_swap_returns_previous_table() {
        let first = Arc::new(FileOperations::default());
        let second = Arc::new(FileOperations::default());
        let cell = OpsCell::new(first.clone());
        assert!(cell.is(&first));
        let old = cell.swap(second.clone());
        assert!(Arc::ptr_eq(&old, &first));
        assert!(cell.is(&second));
    }

    #[test]
    fn dentry_paths_follow_parents() {
        let root = Dentry::new_root(dir_inode_with(InodeOperations::default()), Arc::default());
        let a = root.alloc_child("a");
        root.d_add(a.clone());
        let b = a.alloc_child("b");
        assert_eq!(root.path(), PathBuf::from("/"));
        assert_eq!(b.path(), PathBuf::from("/a/b"));
        a.d_drop();
        assert!(root.child("a").is_none());
    }

    #[test]
    fn missing_entries_use_vfs_defaults() {
        let root = Dentry::new_root(dir_inode_with(InodeOperations::default()), Arc::default());
        assert_eq!(vfs_lookup(&root, "x").unwrap_err(), Errno::ENOTDIR);
        assert_eq!(vfs_mkdir(&root, "x", 0o755).unwrap_err(), Errno::EPERM);
        let file = vfs_open(&root, libc::O_RDONLY).expect("open without entry");
        assert_eq!(vfs_read(&file, &mut [0u8; 4]), Err(Errno::EINVAL));
        assert_eq!(vfs_close(&file), Ok(0));
    }

    #[test]
    fn lookup_rejects_bad_names() {
        let root = Dentry::new_root(dir_inode_with(InodeOperations::default()), Arc::default());
        assert_eq!(vfs_lookup(&root, "a/b").unwrap_err(), Errno::EINVAL);
        assert_eq!(vfs_lookup(&root, &"n".repeat(300)).unwrap_err(), Errno::ENAMETOOLONG);
        assert!(Arc::ptr_eq(&vfs_lookup(&root, "..").expect("dotdot"), &root));
    }
}
