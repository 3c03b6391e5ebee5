// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Redirected inode entries, plus the `open` entry of the inode's default
//! file table.

use super::{enter, invoke, mismatch};
use crate::context::{OpArgs, RfsArgs};
use crate::error::{consistency_fault, OpResult, RfsError};
use crate::ops::OpName;
use crate::runtime::Core;
use crate::shadow::RfsInode;
use crate::vfs::{self, CreateFn, Dentry, File, Inode, LookupFn, OpenFn, PermissionFn, ReadlinkFn, UnlinkFn};
use std::cell::Cell;
use std::sync::{Arc, Weak};

/// Dispatch one inode operation; a missing original entry yields the
/// missing-entry result.
fn through<'a, F>(
    weak: &Weak<RfsInode>,
    op: OpName,
    orig: Option<&F>,
    mut args: OpArgs<'a>,
    call: impl FnOnce(&F, &mut OpArgs<'a>) -> OpResult,
    settle: impl FnOnce(&Core, &mut RfsArgs<'a>),
) -> OpResult {
    let Some((core, rinode)) = enter(weak) else {
        return match orig {
            Some(orig) => call(orig, &mut args),
            None => vfs::missing_op(op),
        };
    };
    let info = rinode.info();
    let args = RfsArgs::new(rinode.kind().op(op), args);
    invoke(
        &core,
        &info,
        None,
        args,
        |args| match orig {
            Some(orig) => call(orig, args),
            None => core.missing(op),
        },
        |args| settle(&core, args),
    )
}

/// Every open of a shadowed inode lands here. The file first gets the
/// original table back; a file shadow replaces it after a successful open.
///
/// The open result is final only after post-call. A success that never went
/// through the file-shadow step is a consistency fault; a failure set by
/// post-call drops the shadow the open already got.
pub(crate) fn open(
    weak: &Weak<RfsInode>,
    orig: Option<&OpenFn>,
    inode: &Arc<Inode>,
    file: &Arc<File>,
) -> OpResult {
    let call_original = |inode: &Arc<Inode>, file: &Arc<File>, core: Option<&Core>| match orig {
        Some(open) => open(inode, file),
        None => core.map_or(Ok(0), |core| core.missing(OpName::Open)),
    };
    let Some((core, rinode)) = enter(weak) else {
        return call_original(inode, file, None);
    };
    file.f_op.swap(rinode.original_fops().clone());

    let Some(rdentry) = core.dentries.lookup(file.dentry().id()) else {
        // opened through a dentry that never got a shadow
        core.count_passthrough();
        return call_original(inode, file, Some(&core));
    };
    let info = rdentry.info();
    let args = RfsArgs::new(rinode.kind().op(OpName::Open), OpArgs::Open { inode, file });
    let settled = Cell::new(false);
    let rv = invoke(
        &core,
        &info,
        None,
        args,
        |_| call_original(inode, file, Some(&core)),
        |args| {
            if args.rv.is_err() {
                return;
            }
            settled.set(true);
            if !core.is_enabled() {
                return;
            }
            match core.attach_file(&rdentry, file, rinode.kind()) {
                Ok(()) => {}
                Err(RfsError::ResourceExhausted(what)) => {
                    tracing::warn!(object = file.id().raw(), what, "file left unshadowed");
                }
                Err(err) => consistency_fault("file shadow", err),
            }
        },
    );
    match rv {
        Ok(_) if !settled.get() => {
            consistency_fault("open succeeded without a file shadow", file.id().raw())
        }
        Err(errno) if settled.get() => {
            if let Some(rfile) = core.files.lookup(file.id()) {
                tracing::debug!(object = file.id().raw(), %errno, "open failed in post-call");
                core.detach_file(rfile.arc());
            }
        }
        _ => {}
    }
    rv
}

fn adopt_on_success(core: &Core, args: &mut RfsArgs<'_>) {
    if args.rv.is_err() {
        return;
    }
    if let Some(dentry) = args.args.dentry() {
        core.adopt_child(dentry);
    }
}

fn detach_on_success(core: &Core, args: &mut RfsArgs<'_>) {
    if args.rv.is_err() {
        return;
    }
    if let Some(dentry) = args.args.dentry() {
        core.forget_child(dentry);
    }
}

pub(crate) fn lookup(
    weak: &Weak<RfsInode>,
    orig: Option<&LookupFn>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
) -> OpResult {
    through(
        weak,
        OpName::Lookup,
        orig,
        OpArgs::Lookup { dir, dentry },
        |lookup, _| lookup(dir, dentry),
        adopt_on_success,
    )
}

pub(crate) fn create(
    weak: &Weak<RfsInode>,
    orig: Option<&CreateFn>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
    mode: u32,
) -> OpResult {
    through(
        weak,
        OpName::Create,
        orig,
        OpArgs::Create { dir, dentry, mode },
        |create, args| match args {
            OpArgs::Create { dir, dentry, mode } => create(dir, dentry, *mode),
            other => mismatch(other),
        },
        adopt_on_success,
    )
}

pub(crate) fn mkdir(
    weak: &Weak<RfsInode>,
    orig: Option<&CreateFn>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
    mode: u32,
) -> OpResult {
    through(
        weak,
        OpName::Mkdir,
        orig,
        OpArgs::Mkdir { dir, dentry, mode },
        |mkdir, args| match args {
            OpArgs::Mkdir { dir, dentry, mode } => mkdir(dir, dentry, *mode),
            other => mismatch(other),
        },
        adopt_on_success,
    )
}

pub(crate) fn unlink(
    weak: &Weak<RfsInode>,
    orig: Option<&UnlinkFn>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
) -> OpResult {
    through(
        weak,
        OpName::Unlink,
        orig,
        OpArgs::Unlink { dir, dentry },
        |unlink, _| unlink(dir, dentry),
        detach_on_success,
    )
}

pub(crate) fn rmdir(
    weak: &Weak<RfsInode>,
    orig: Option<&UnlinkFn>,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
) -> OpResult {
    through(
        weak,
        OpName::Rmdir,
        orig,
        OpArgs::Rmdir { dir, dentry },
        |rmdir, _| rmdir(dir, dentry),
        detach_on_success,
    )
}

pub(crate) fn permission(
    weak: &Weak<RfsInode>,
    orig: Option<&PermissionFn>,
    inode: &Arc<Inode>,
    mask: i32,
) -> OpResult {
    through(
        weak,
        OpName::Permission,
        orig,
        OpArgs::Permission { inode, mask },
        |permission, args| match args {
            OpArgs::Permission { inode, mask } => permission(inode, *mask),
            other => mismatch(other),
        },
        |_, _| {},
    )
}

pub(crate) fn readlink(
    weak: &Weak<RfsInode>,
    orig: Option<&ReadlinkFn>,
    dentry: &Arc<Dentry>,
    buf: &mut [u8],
) -> OpResult {
    through(
        weak,
        OpName::Readlink,
        orig,
        OpArgs::Readlink { dentry, buf },
        |readlink, args| match args {
            OpArgs::Readlink { dentry, buf } => readlink(dentry, &mut **buf),
            other => mismatch(other),
        },
        |_, _| {},
    )
}
