// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use crate::filter::{Filter, FilterInfo, FilterOps, Verdict};
use crate::memfs::MemFs;
use crate::ops::{CallPhase, OpId};
use crate::redirfs::Redirfs;
use crate::vfs::{self, Dentry};
use crate::RedirfsConfig;
use redirfs_test_utils::TraceRecorder;
use std::sync::Arc;

/// `/srv/a.txt`, `/srv/sub/b.txt` and `/other/c.txt` on a fresh `MemFs`.
pub struct Tree {
    pub fs: MemFs,
    pub srv: Arc<Dentry>,
    pub sub: Arc<Dentry>,
    pub other: Arc<Dentry>,
}

pub fn seeded_tree() -> Tree {
    let fs = MemFs::new();
    let srv = vfs::vfs_mkdir(fs.root(), "srv", 0o755).expect("mkdir /srv");
    vfs::vfs_create(&srv, "a.txt", 0o644).expect("create a.txt");
    let sub = vfs::vfs_mkdir(&srv, "sub", 0o755).expect("mkdir sub");
    vfs::vfs_create(&sub, "b.txt", 0o644).expect("create b.txt");
    let other = vfs::vfs_mkdir(fs.root(), "other", 0o755).expect("mkdir /other");
    vfs::vfs_create(&other, "c.txt", 0o644).expect("create c.txt");
    Tree { fs, srv, sub, other }
}

pub fn framework() -> Redirfs {
    Redirfs::new(RedirfsConfig::default()).expect("framework")
}

/// Callbacks that record `<tag>.pre:<op>` and `<tag>.post:<op>`.
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
        .expect("register")
}
