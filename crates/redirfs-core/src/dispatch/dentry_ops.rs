// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{enter, invoke};
use crate::context::{OpArgs, RfsArgs};
use crate::error::OpResult;
use crate::ops::{ObjKind, OpName};
use crate::shadow::RfsDentry;
use crate::vfs::{self, Dentry, RevalidateFn};
use std::sync::{Arc, Weak};

/// A dentry that fails revalidation loses its shadow.
pub(crate) fn revalidate(weak: &Weak<RfsDentry>, orig: Option<&RevalidateFn>, dentry: &Arc<Dentry>) -> OpResult {
    let Some((core, rdentry)) = enter(weak) else {
        return orig.map_or_else(|| vfs::missing_op(OpName::Revalidate), |revalidate| revalidate(dentry));
    };
    let info = rdentry.info();
    let kind = dentry
        .inode()
        .and_then(|inode| inode.kind())
        .unwrap_or(ObjKind::Directory);
    let args = RfsArgs::new(kind.op(OpName::Revalidate), OpArgs::Revalidate { dentry });
    invoke(
        &core,
        &info,
        None,
        args,
        |_| match orig {
            Some(revalidate) => revalidate(dentry),
            None => core.missing(OpName::Revalidate),
        },
        |args| {
            if args.rv == Ok(0) {
                core.detach_dentry(dentry);
            }
        },
    )
}
