// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Redirected open-file entries

use super::{enter, invoke, mismatch};
use crate::context::{OpArgs, RfsArgs};
use crate::error::OpResult;
use crate::ops::OpName;
use crate::shadow::{RfsFile, Shadow};
use crate::vfs::{
    self, DirContext, FallocateFn, File, FlushFn, FsyncFn, Inode, IoctlFn, IterateFn, LlseekFn, ReadFn,
    ReleaseFn, WriteFn,
};
use std::sync::{Arc, Weak};

/// Dispatch one file operation. `call` runs the captured entry; without one
/// the call gets the missing-entry result.
fn through<'a, F>(
    weak: &Weak<RfsFile>,
    op: OpName,
    orig: Option<&F>,
    mut args: OpArgs<'a>,
    call: impl FnOnce(&F, &mut OpArgs<'a>) -> OpResult,
    settle: impl FnOnce(&mut RfsArgs<'a>),
) -> OpResult {
    let Some((core, rfile)) = enter(weak) else {
        return match orig {
            Some(orig) => call(orig, &mut args),
            None => vfs::missing_op(op),
        };
    };
    let info = rfile.info();
    let args = RfsArgs::new(rfile.kind().op(op), args);
    invoke(
        &core,
        &info,
        Some(&*rfile),
        args,
        |args| match orig {
            Some(orig) => call(orig, args),
            None => core.missing(op),
        },
        settle,
    )
}

/// Runs the chain, then drops the file's own reference on its shadow; the
/// original table comes back once in-flight calls finish.
pub(crate) fn release(
    weak: &Weak<RfsFile>,
    orig: Option<&ReleaseFn>,
    inode: &Arc<Inode>,
    file: &Arc<File>,
) -> OpResult {
    let Some((core, rfile)) = enter(weak) else {
        return orig.map_or(Ok(0), |release| release(inode, file));
    };
    let info = rfile.info();
    let args = RfsArgs::new(rfile.kind().op(OpName::Release), OpArgs::Release { inode, file });
    let rv = invoke(
        &core,
        &info,
        Some(&*rfile),
        args,
        |_| match orig {
            Some(release) => release(inode, file),
            None => core.missing(OpName::Release),
        },
        |_| {},
    );
    core.detach_file(rfile.arc());
    rv
}

pub(crate) fn llseek(
    weak: &Weak<RfsFile>,
    orig: Option<&LlseekFn>,
    file: &Arc<File>,
    offset: i64,
    whence: i32,
) -> OpResult {
    through(
        weak,
        OpName::Llseek,
        orig,
        OpArgs::Llseek { file, offset, whence },
        |llseek, args| match args {
            OpArgs::Llseek { file, offset, whence } => llseek(file, *offset, *whence),
            other => mismatch(other),
        },
        |_| {},
    )
}

pub(crate) fn read(
    weak: &Weak<RfsFile>,
    orig: Option<&ReadFn>,
    file: &Arc<File>,
    buf: &mut [u8],
    pos: u64,
) -> OpResult {
    through(
        weak,
        OpName::Read,
        orig,
        OpArgs::Read { file, buf, pos },
        |read, args| match args {
            OpArgs::Read { file, buf, pos } => read(file, &mut **buf, *pos),
            other => mismatch(other),
        },
        |_| {},
    )
}

pub(crate) fn write(
    weak: &Weak<RfsFile>,
    orig: Option<&WriteFn>,
    file: &Arc<File>,
    buf: &[u8],
    pos: u64,
) -> OpResult {
    through(
        weak,
        OpName::Write,
        orig,
        OpArgs::Write { file, buf, pos },
        |write, args| match args {
            OpArgs::Write { file, buf, pos } => write(file, buf, *pos),
            other => mismatch(other),
        },
        |_| {},
    )
}

/// Successful listings feed the pending-child table.
pub(crate) fn iterate(
    weak: &Weak<RfsFile>,
    orig: Option<&IterateFn>,
    file: &Arc<File>,
    ctx: &mut DirContext,
) -> OpResult {
    let core = weak.upgrade().and_then(|rfile| rfile.core().upgrade());
    through(
        weak,
        OpName::Iterate,
        orig,
        OpArgs::Iterate { file, ctx },
        |iterate, args| match args {
            OpArgs::Iterate { file, ctx } => iterate(file, &mut **ctx),
            other => mismatch(other),
        },
        |args| {
            let (Some(core), Ok(_)) = (core.as_ref(), args.rv) else {
                return;
            };
            if let OpArgs::Iterate { file, ctx } = &args.args {
                core.record_listing(file.dentry(), ctx.entries());
            }
        },
    )
}

pub(crate) fn flush(weak: &Weak<RfsFile>, orig: Option<&FlushFn>, file: &Arc<File>) -> OpResult {
    through(
        weak,
        OpName::Flush,
        orig,
        OpArgs::Flush { file },
        |flush, _| flush(file),
        |_| {},
    )
}

pub(crate) fn fsync(
    weak: &Weak<RfsFile>,
    orig: Option<&FsyncFn>,
    file: &Arc<File>,
    datasync: bool,
) -> OpResult {
    through(
        weak,
        OpName::Fsync,
        orig,
        OpArgs::Fsync { file, datasync },
        |fsync, _| fsync(file, datasync),
        |_| {},
    )
}

pub(crate) fn ioctl(
    weak: &Weak<RfsFile>,
    orig: Option<&IoctlFn>,
    file: &Arc<File>,
    cmd: u32,
    arg: u64,
) -> OpResult {
    through(
        weak,
        OpName::Ioctl,
        orig,
        OpArgs::Ioctl { file, cmd, arg },
        |ioctl, args| match args {
            OpArgs::Ioctl { file, cmd, arg } => ioctl(file, *cmd, *arg),
            other => mismatch(other),
        },
        |_| {},
    )
}

pub(crate) fn fallocate(
    weak: &Weak<RfsFile>,
    orig: Option<&FallocateFn>,
    file: &Arc<File>,
    mode: i32,
    offset: u64,
    len: u64,
) -> OpResult {
    through(
        weak,
        OpName::Fallocate,
        orig,
        OpArgs::Fallocate { file, mode, offset, len },
        |fallocate, args| match args {
            OpArgs::Fallocate { file, mode, offset, len } => fallocate(file, *mode, *offset, *len),
            other => mismatch(other),
        },
        |_| {},
    )
}
