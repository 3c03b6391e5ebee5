// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory underlying filesystem used to exercise interception end to end

use crate::error::{Errno, OpResult};
use crate::ops::ObjKind;
use crate::vfs::{
    Dentry, DentryOperations, DirContext, File, FileOperations, Inode, InodeOperations, MAY_EXEC,
    MAY_READ, MAY_WRITE,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

enum Content {
    File(Vec<u8>),
    Dir(BTreeMap<String, Arc<Inode>>),
    Symlink(String),
    Special,
}

/// Private data hung off every MemFs inode.
pub struct MemNode {
    content: Mutex<Content>,
}

fn node(inode: &Inode) -> Result<&MemNode, Errno> {
    inode.private::<MemNode>().ok_or(Errno::EIO)
}

struct Tables {
    reg_fops: Arc<FileOperations>,
    dir_fops: Arc<FileOperations>,
    chr_fops: Arc<FileOperations>,
    special_fops: Arc<FileOperations>,
    dir_iops: Arc<InodeOperations>,
    reg_iops: Arc<InodeOperations>,
    lnk_iops: Arc<InodeOperations>,
    dops: Arc<DentryOperations>,
}

struct MemFsInner {
    next_ino: AtomicU64,
    tables: Tables,
}

impl MemFsInner {
    fn new_inode(&self, mode: u32, content: Content) -> Arc<Inode> {
        let t = &self.tables;
        let (i_op, i_fop) = match ObjKind::from_mode(mode) {
            Some(ObjKind::Directory) => (&t.dir_iops, &t.dir_fops),
            Some(ObjKind::Regular) => (&t.reg_iops, &t.reg_fops),
            Some(ObjKind::Symlink) => (&t.lnk_iops, &t.special_fops),
            Some(ObjKind::CharDevice) => (&t.reg_iops, &t.chr_fops),
            _ => (&t.reg_iops, &t.special_fops),
        };
        Inode::new(
            self.next_ino.fetch_add(1, Ordering::Relaxed),
            mode,
            i_op.clone(),
            i_fop.clone(),
            Arc::new(MemNode {
                content: Mutex::new(content),
            }),
        )
    }
}

fn with_fs<R>(weak: &Weak<MemFsInner>, f: impl FnOnce(&MemFsInner) -> Result<R, Errno>) -> Result<R, Errno> {
    let fs = weak.upgrade().ok_or(Errno::EIO)?;
    f(&fs)
}

fn ok(_: &Arc<Inode>, _: &Arc<File>) -> OpResult {
    Ok(0)
}

fn read_file(file: &Arc<File>, buf: &mut [u8], pos: u64) -> OpResult {
    let node = node(file.inode())?;
    let content = node.content.lock().unwrap();
    match &*content {
        Content::File(data) => {
            let start = (pos as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n as i64)
        }
        Content::Dir(_) => Err(Errno::EISDIR),
        _ => Err(Errno::EINVAL),
    }
}

fn write_file(file: &Arc<File>, buf: &[u8], pos: u64) -> OpResult {
    let node = node(file.inode())?;
    let mut content = node.content.lock().unwrap();
    match &mut *content {
        Content::File(data) => {
            let start = pos as usize;
            let end = start + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);
            Ok(buf.len() as i64)
        }
        Content::Dir(_) => Err(Errno::EISDIR),
        _ => Err(Errno::EINVAL),
    }
}

fn size_of(inode: &Inode) -> Result<u64, Errno> {
    let node = node(inode)?;
    let content = node.content.lock().unwrap();
    Ok(match &*content {
        Content::File(data) => data.len() as u64,
        Content::Dir(entries) => entries.len() as u64,
        Content::Symlink(target) => target.len() as u64,
        Content::Special => 0,
    })
}

fn llseek(file: &Arc<File>, offset: i64, whence: i32) -> OpResult {
    let base = match whence {
        libc::SEEK_SET => 0,
        libc::SEEK_CUR => file.pos() as i64,
        libc::SEEK_END => size_of(file.inode())? as i64,
        _ => return Err(Errno::EINVAL),
    };
    let pos = base.checked_add(offset).filter(|p| *p >= 0).ok_or(Errno::EINVAL)?;
    file.set_pos(pos as u64);
    Ok(pos)
}

fn iterate(file: &Arc<File>, ctx: &mut DirContext) -> OpResult {
    let node = node(file.inode())?;
    let content = node.content.lock().unwrap();
    let Content::Dir(entries) = &*content else {
        return Err(Errno::ENOTDIR);
    };
    let skip = file.pos() as usize;
    let mut emitted = 0;
    for (name, inode) in entries.iter().skip(skip) {
        ctx.emit(name, inode.ino(), inode.kind());
        emitted += 1;
    }
    file.set_pos((skip + emitted) as u64);
    Ok(0)
}

fn fallocate(file: &Arc<File>, mode: i32, offset: u64, len: u64) -> OpResult {
    if mode != 0 {
        return Err(Errno::EOPNOTSUPP);
    }
    let node = node(file.inode())?;
    let mut content = node.content.lock().unwrap();
    match &mut *content {
        Content::File(data) => {
            let end = (offset + len) as usize;
            if data.len() < end {
                data.resize(end, 0);
            }
            Ok(0)
        }
        _ => Err(Errno::ENODEV),
    }
}

fn permission(inode: &Arc<Inode>, mask: i32) -> OpResult {
    let mode = inode.mode();
    let denied = (mask & MAY_READ != 0 && mode & 0o400 == 0)
        || (mask & MAY_WRITE != 0 && mode & 0o200 == 0)
        || (mask & MAY_EXEC != 0 && mode & 0o100 == 0);
    if denied {
        Err(Errno::EACCES)
    } else {
        Ok(0)
    }
}

fn lookup(dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> OpResult {
    let node = node(dir)?;
    let content = node.content.lock().unwrap();
    let Content::Dir(entries) = &*content else {
        return Err(Errno::ENOTDIR);
    };
    if let Some(inode) = entries.get(dentry.name()) {
        dentry.instantiate(inode.clone());
    }
    Ok(0)
}

fn insert_child(fs: &MemFsInner, dir: &Inode, dentry: &Dentry, mode: u32) -> OpResult {
    let content = match ObjKind::from_mode(mode) {
        Some(ObjKind::Regular) => Content::File(Vec::new()),
        Some(ObjKind::Directory) => Content::Dir(BTreeMap::new()),
        Some(ObjKind::CharDevice) | Some(ObjKind::BlockDevice) | Some(ObjKind::Fifo) => {
            Content::Special
        }
        _ => return Err(Errno::EINVAL),
    };
    let node = node(dir)?;
    let mut dir_content = node.content.lock().unwrap();
    let Content::Dir(entries) = &mut *dir_content else {
        return Err(Errno::ENOTDIR);
    };
    if entries.contains_key(dentry.name()) {
        return Err(Errno::EEXIST);
    }
    let inode = fs.new_inode(mode, content);
    entries.insert(dentry.name().to_string(), inode.clone());
    dentry.instantiate(inode);
    Ok(0)
}

fn remove_child(dir: &Inode, dentry: &Dentry, want_dir: bool) -> OpResult {
    let victim = dentry.inode().ok_or(Errno::ENOENT)?;
    if victim.is_dir() != want_dir {
        return Err(if want_dir { Errno::ENOTDIR } else { Errno::EISDIR });
    }
    if want_dir {
        let victim_node = node(&victim)?;
        let victim_content = victim_node.content.lock().unwrap();
        if matches!(&*victim_content, Content::Dir(entries) if !entries.is_empty()) {
            return Err(Errno::ENOTEMPTY);
        }
    }
    let node = node(dir)?;
    let mut content = node.content.lock().unwrap();
    let Content::Dir(entries) = &mut *content else {
        return Err(Errno::ENOTDIR);
    };
    entries.remove(dentry.name()).ok_or(Errno::ENOENT)?;
    Ok(0)
}

fn readlink(dentry: &Arc<Dentry>, buf: &mut [u8]) -> OpResult {
    let inode = dentry.inode().ok_or(Errno::ENOENT)?;
    let node = node(&inode)?;
    let content = node.content.lock().unwrap();
    let Content::Symlink(target) = &*content else {
        return Err(Errno::EINVAL);
    };
    let n = buf.len().min(target.len());
    buf[..n].copy_from_slice(&target.as_bytes()[..n]);
    Ok(n as i64)
}

impl Tables {
    fn new(weak: Weak<MemFsInner>) -> Self {
        let reg_fops = FileOperations {
            open: Some(Arc::new(ok)),
            release: Some(Arc::new(ok)),
            llseek: Some(Arc::new(llseek)),
            read: Some(Arc::new(read_file)),
            write: Some(Arc::new(write_file)),
            flush: Some(Arc::new(|_file: &Arc<File>| Ok(0))),
            fsync: Some(Arc::new(|_file: &Arc<File>, _datasync: bool| Ok(0))),
            fallocate: Some(Arc::new(fallocate)),
            ..FileOperations::default()
        };
        let dir_fops = FileOperations {
            open: Some(Arc::new(ok)),
            release: Some(Arc::new(ok)),
            llseek: Some(Arc::new(llseek)),
            iterate: Some(Arc::new(iterate)),
            fsync: Some(Arc::new(|_file: &Arc<File>, _datasync: bool| Ok(0))),
            ..FileOperations::default()
        };
        // A null device: no open entry, reads hit EOF, writes are swallowed.
        let chr_fops = FileOperations {
            read: Some(Arc::new(|_file: &Arc<File>, _buf: &mut [u8], _pos: u64| Ok(0))),
            write: Some(Arc::new(|_file: &Arc<File>, buf: &[u8], _pos: u64| {
                Ok(buf.len() as i64)
            })),
            ioctl: Some(Arc::new(|_file: &Arc<File>, _cmd: u32, _arg: u64| {
                Err(Errno::ENOTTY)
            })),
            ..FileOperations::default()
        };
        let special_fops = FileOperations {
            open: Some(Arc::new(ok)),
            release: Some(Arc::new(ok)),
            ..FileOperations::default()
        };

        let create_fs = weak.clone();
        let mkdir_fs = weak;
        let dir_iops = InodeOperations {
            lookup: Some(Arc::new(lookup)),
            create: Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32| {
                with_fs(&create_fs, |fs| insert_child(fs, dir, dentry, mode))
            })),
            mkdir: Some(Arc::new(move |dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32| {
                with_fs(&mkdir_fs, |fs| insert_child(fs, dir, dentry, mode))
            })),
            unlink: Some(Arc::new(|dir: &Arc<Inode>, dentry: &Arc<Dentry>| {
                remove_child(dir, dentry, false)
            })),
            rmdir: Some(Arc::new(|dir: &Arc<Inode>, dentry: &Arc<Dentry>| {
                remove_child(dir, dentry, true)
            })),
            permission: Some(Arc::new(permission)),
            ..InodeOperations::default()
        };
        let reg_iops = InodeOperations {
            permission: Some(Arc::new(permission)),
            ..InodeOperations::default()
        };
        let lnk_iops = InodeOperations {
            permission: Some(Arc::new(permission)),
            readlink: Some(Arc::new(readlink)),
            ..InodeOperations::default()
        };
        let dops = DentryOperations {
            revalidate: Some(Arc::new(|dentry: &Arc<Dentry>| {
                Ok(i64::from(dentry.is_positive()))
            })),
        };

        Self {
            reg_fops: Arc::new(reg_fops),
            dir_fops: Arc::new(dir_fops),
            chr_fops: Arc::new(chr_fops),
            special_fops: Arc::new(special_fops),
            dir_iops: Arc::new(dir_iops),
            reg_iops: Arc::new(reg_iops),
            lnk_iops: Arc::new(lnk_iops),
            dops: Arc::new(dops),
        }
    }
}

/// A mounted in-memory filesystem.
pub struct MemFs {
    inner: Arc<MemFsInner>,
    root: Arc<Dentry>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<MemFsInner>| MemFsInner {
            next_ino: AtomicU64::new(1),
            tables: Tables::new(weak.clone()),
        });
        let root_inode =
            inner.new_inode(libc::S_IFDIR as u32 | 0o755, Content::Dir(BTreeMap::new()));
        let root = Dentry::new_root(root_inode, inner.tables.dops.clone());
        Self { inner, root }
    }

    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// Create a symlink; there is no intercepted entry for this.
    pub fn symlink(&self, dir: &Arc<Dentry>, name: &str, target: &str) -> Result<Arc<Dentry>, Errno> {
        let dir_inode = dir.inode().ok_or(Errno::ENOENT)?;
        let node = node(&dir_inode)?;
        let mut content = node.content.lock().unwrap();
        let Content::Dir(entries) = &mut *content else {
            return Err(Errno::ENOTDIR);
        };
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }
        let inode = self
            .inner
            .new_inode(libc::S_IFLNK as u32 | 0o777, Content::Symlink(target.to_string()));
        entries.insert(name.to_string(), inode.clone());
        drop(content);
        let dentry = dir.alloc_child(name);
        dentry.instantiate(inode);
        dir.d_add(dentry.clone());
        Ok(dentry)
    }

    /// Original file table of regular files, for identity checks.
    pub fn regular_fops(&self) -> &Arc<FileOperations> {
        &self.inner.tables.reg_fops
    }

    pub fn directory_fops(&self) -> &Arc<FileOperations> {
        &self.inner.tables.dir_fops
    }

    pub fn chardev_fops(&self) -> &Arc<FileOperations> {
        &self.inner.tables.chr_fops
    }

    pub fn directory_iops(&self) -> &Arc<InodeOperations> {
        &self.inner.tables.dir_iops
    }

    pub fn regular_iops(&self) -> &Arc<InodeOperations> {
        &self.inner.tables.reg_iops
    }

    pub fn dentry_ops(&self) -> &Arc<DentryOperations> {
        &self.inner.tables.dops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::*;

    #[test]
    fn create_write_read_roundtrip() {
        let fs = MemFs::new();
        let dir = vfs_mkdir(fs.root(), "docs", 0o755).expect("mkdir");
        let dentry = vfs_create(&dir, "a.txt", 0o644).expect("create");
        let file = vfs_open(&dentry, libc::O_RDWR).expect("open");
        assert_eq!(vfs_write(&file, b"hello"), Ok(5));
        assert_eq!(vfs_llseek(&file, 0, libc::SEEK_SET), Ok(0));
        let mut buf = [0u8; 16];
        assert_eq!(vfs_read(&file, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(vfs_close(&file), Ok(0));
    }

    #[test]
    fn readdir_lists_children_in_order() {
        let fs = MemFs::new();
        vfs_mkdir(fs.root(), "b", 0o755).expect("mkdir");
        vfs_create(fs.root(), "a", 0o644).expect("create");
        let dir = vfs_open(fs.root(), libc::O_RDONLY).expect("open");
        let names: Vec<String> = vfs_readdir(&dir).expect("readdir").into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert!(vfs_readdir(&dir).expect("second pass").is_empty());
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let fs = MemFs::new();
        let dir = vfs_mkdir(fs.root(), "d", 0o755).expect("mkdir");
        vfs_create(&dir, "f", 0o644).expect("create");
        assert_eq!(vfs_rmdir(fs.root(), "d"), Err(Errno::ENOTEMPTY));
        assert_eq!(vfs_unlink(&dir, "f"), Ok(0));
        assert_eq!(vfs_rmdir(fs.root(), "d"), Ok(0));
        assert_eq!(vfs_lookup(fs.root(), "d").unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn null_device_has_no_open_entry() {
        let fs = MemFs::new();
        let dev = vfs_mknod(fs.root(), "null", libc::S_IFCHR as u32 | 0o666).expect("mknod");
        assert!(dev.inode().expect("inode").i_fop.get().open.is_none());
        let file = vfs_open(&dev, libc::O_WRONLY).expect("open");
        assert_eq!(vfs_write(&file, b"discard"), Ok(7));
        assert_eq!(vfs_read(&file, &mut [0u8; 4]), Ok(0));
    }

    #[test]
    fn symlink_readlink_and_permission() {
        let fs = MemFs::new();
        let link = fs.symlink(fs.root(), "l", "/target").expect("symlink");
        let mut buf = [0u8; 32];
        assert_eq!(vfs_readlink(&link, &mut buf), Ok(7));
        assert_eq!(&buf[..7], b"/target");
        let ro = vfs_create(fs.root(), "ro", 0o444).expect("create");
        let inode = ro.inode().expect("inode");
        assert_eq!(vfs_permission(&inode, MAY_READ), Ok(0));
        assert_eq!(vfs_permission(&inode, MAY_WRITE), Err(Errno::EACCES));
    }
}
