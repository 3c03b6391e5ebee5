// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Common helpers for integration tests

#![allow(dead_code)]

use redirfs_core::vfs::{self, Dentry, DentryOperations, File, FileOperations, Inode, InodeOperations};
use redirfs_core::{CallPhase, Filter, FilterInfo, FilterOps, MemFs, OpId, Redirfs, RedirfsConfig, Verdict};
use redirfs_test_utils::TraceRecorder;
use std::sync::Arc;

/// A single regular file served by hand-written operations that record
/// every call that reaches them as `original-<op>`.
pub struct TracedFile {
    pub dentry: Arc<Dentry>,
    pub fops: Arc<FileOperations>,
}

pub fn traced_file(trace: &TraceRecorder) -> TracedFile {
    let open_trace = trace.clone();
    let release_trace = trace.clone();
    let read_trace = trace.clone();
    let write_trace = trace.clone();
    let fops = Arc::new(FileOperations {
        open: Some(Arc::new(move |_inode: &Arc<Inode>, _file: &Arc<File>| {
            open_trace.record("original-open");
            Ok(0)
        })),
        release: Some(Arc::new(move |_inode: &Arc<Inode>, _file: &Arc<File>| {
            release_trace.record("original-release");
            Ok(0)
        })),
        read: Some(Arc::new(move |_file: &Arc<File>, buf: &mut [u8], _pos: u64| {
            read_trace.record("original-read");
            buf.fill(b'x');
            Ok(buf.len() as i64)
        })),
        write: Some(Arc::new(move |_file: &Arc<File>, buf: &[u8], _pos: u64| {
            write_trace.record("original-write");
            Ok(buf.len() as i64)
        })),
        ..FileOperations::default()
    });
    let dentry = file_with(fops.clone());
    TracedFile { dentry, fops }
}

/// A regular file at the root of its own tree, served by `fops` alone.
pub fn file_with(fops: Arc<FileOperations>) -> Arc<Dentry> {
    let inode = Inode::new(
        1,
        libc::S_IFREG as u32 | 0o644,
        Arc::new(InodeOperations::default()),
        fops,
        Arc::new(()),
    );
    Dentry::new_root(inode, Arc::new(DentryOperations::default()))
}

/// `/srv/a.txt`, `/srv/sub/b.txt` and `/other/c.txt`.
pub struct Tree {
    pub fs: MemFs,
    pub srv: Arc<Dentry>,
    pub sub: Arc<Dentry>,
    pub other: Arc<Dentry>,
}

pub fn seeded_tree() -> Tree {
    let fs = MemFs::new();
    let srv = vfs::vfs_mkdir(fs.root(), "srv", 0o755).unwrap();
    vfs::vfs_create(&srv, "a.txt", 0o644).unwrap();
    let sub = vfs::vfs_mkdir(&srv, "sub", 0o755).unwrap();
    vfs::vfs_create(&sub, "b.txt", 0o644).unwrap();
    let other = vfs::vfs_mkdir(fs.root(), "other", 0o755).unwrap();
    vfs::vfs_create(&other, "c.txt", 0o644).unwrap();
    Tree { fs, srv, sub, other }
}

pub fn framework() -> Redirfs {
    Redirfs::new(RedirfsConfig::default()).unwrap()
}

/// Records `<tag>.pre:<op>` / `<tag>.post:<op>` for every listed operation.
pub fn recording_ops(trace: &TraceRecorder, tag: &'static str, ops: &[OpId]) -> FilterOps {
    ops.iter().fold(FilterOps::new(), |table, &op| {
        let trace = trace.clone();
        table.both(op, move |_ctx, args| {
            let phase = match args.phase() {
                CallPhase::Pre => "pre",
                CallPhase::Post => "post",
            };
            trace.record(format!("{tag}.{phase}:{}", args.op().op.as_str()));
            Verdict::Continue
        })
    })
}

pub fn recording_filter(
    rfs: &Redirfs,
    trace: &TraceRecorder,
    tag: &'static str,
    priority: i32,
    ops: &[OpId],
) -> Arc<Filter> {
    rfs.register_filter(FilterInfo::new(tag, priority), recording_ops(trace, tag, ops))
        .unwrap()
}
