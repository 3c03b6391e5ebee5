// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch engine: the only functions placed in redirecting tables.
//!
//! Every entry resolves its shadow through a weak back-pointer, takes a
//! counted reference for the duration of the call and reads the governing
//! chain once. When the shadow is already gone the captured original entry
//! is called directly.

pub(crate) mod dentry_ops;
pub(crate) mod file_ops;
pub(crate) mod inode_ops;

use crate::chain::RfsInfo;
use crate::context::{OpArgs, RfsArgs};
use crate::error::{consistency_fault, OpResult};
use crate::runtime::Core;
use crate::shadow::{RfsFile, Shadow, ShadowRef};
use std::sync::{Arc, Weak};

/// Pin the shadow behind a redirect for the duration of one call.
pub(crate) fn enter<S: Shadow>(weak: &Weak<S>) -> Option<(Arc<Core>, ShadowRef<S>)> {
    let shadow = weak.upgrade()?;
    let core = shadow.core().upgrade()?;
    let held = S::arena(&core).try_acquire(&shadow)?;
    Some((core, held))
}

/// Run one intercepted call: pre-call, the original unless a filter stopped
/// the chain, `settle`, then post-call.
///
/// `settle` runs whether or not the original ran, before post-call, so
/// bookkeeping tied to the result (file shadows after open, child shadows
/// after lookup) is visible to post-call filters.
pub(crate) fn invoke<'a>(
    core: &Core,
    info: &RfsInfo,
    rfile: Option<&RfsFile>,
    mut args: RfsArgs<'a>,
    original: impl FnOnce(&mut OpArgs<'a>) -> OpResult,
    settle: impl FnOnce(&mut RfsArgs<'a>),
) -> OpResult {
    let op = args.op();
    let filtered = core.is_enabled() && info.chain.has_op(op);
    let ctx = if filtered {
        core.new_context(info, rfile)
    } else {
        None
    };
    let Some(mut ctx) = ctx else {
        core.count_passthrough();
        args.rv = original(&mut args.args);
        settle(&mut args);
        return args.rv;
    };

    core.count_intercepted();
    if !ctx.precall(&mut args) {
        args.rv = original(&mut args.args);
    }
    settle(&mut args);
    ctx.postcall(&mut args);
    args.rv
}

/// An argument bundle that does not belong to the entry it reached.
#[cold]
pub(crate) fn mismatch(args: &OpArgs<'_>) -> ! {
    consistency_fault("argument bundle mismatch", args.op_name().as_str())
}
