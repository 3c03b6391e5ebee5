// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! DummyFlt: a filter that logs open, release, read, lookup and iterate
//! calls in both phases and never changes their outcome.

use redirfs_core::{
    CallContext, CallPhase, Filter, FilterInfo, FilterOps, ObjKind, OpName, Redirfs, RfsArgs,
    RfsError, RfsResult, Verdict,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const NAME: &str = "dummyflt";
pub const DEFAULT_PRIORITY: i32 = 500_000_000;

/// Operations the filter hooks, with the object kinds it hooks them on.
pub const HOOKED: &[(OpName, &[ObjKind])] = &[
    (OpName::Open, &[ObjKind::Regular, ObjKind::CharDevice, ObjKind::Directory]),
    (OpName::Release, &[ObjKind::Regular, ObjKind::Directory, ObjKind::CharDevice]),
    (OpName::Read, &[ObjKind::Regular]),
    (OpName::Lookup, &[ObjKind::Directory]),
    (OpName::Iterate, &[ObjKind::Directory]),
];

/// Calls seen, per phase.
#[derive(Debug, Default)]
pub struct CallCounters {
    pre: AtomicU64,
    post: AtomicU64,
}

impl CallCounters {
    pub fn precalls(&self) -> u64 {
        self.pre.load(Ordering::Relaxed)
    }

    pub fn postcalls(&self) -> u64 {
        self.post.load(Ordering::Relaxed)
    }
}

fn log_call(counters: &CallCounters, ctx: &CallContext<'_>, args: &RfsArgs<'_>) -> Verdict {
    let path = args
        .args
        .dentry()
        .map(|dentry| dentry.path())
        .unwrap_or_else(|| ctx.path().to_path_buf());
    let phase = match args.phase() {
        CallPhase::Pre => {
            counters.pre.fetch_add(1, Ordering::Relaxed);
            "precall"
        }
        CallPhase::Post => {
            counters.post.fetch_add(1, Ordering::Relaxed);
            "postcall"
        }
    };
    let object = args.args.file().map(|file| file.id().raw());
    tracing::info!(
        target: "dummyflt",
        op = args.op().op.as_str(),
        kind = args.op().kind.label(),
        path = %path.display(),
        ?object,
        call = phase,
        "dummyflt"
    );
    Verdict::Continue
}

/// One callback for both phases of every hooked operation.
pub fn operations(counters: Arc<CallCounters>) -> FilterOps {
    let mut ops = FilterOps::new();
    for (op, kinds) in HOOKED {
        for kind in kinds.iter() {
            let counters = counters.clone();
            ops = ops.both(kind.op(*op), move |ctx, args| log_call(&counters, ctx, args));
        }
    }
    ops
}

pub fn filter_info(priority: i32) -> FilterInfo {
    FilterInfo::new(NAME, priority)
}

pub fn register(rfs: &Redirfs, priority: i32, counters: Arc<CallCounters>) -> RfsResult<Arc<Filter>> {
    rfs.register_filter(filter_info(priority), operations(counters))
}

/// Unregister, waiting for in-flight calls that still hold the filter.
pub fn unregister_with_retry(rfs: &Redirfs, filter: &Arc<Filter>, attempts: u32, pause: Duration) -> RfsResult<()> {
    let mut left = attempts.max(1);
    loop {
        match rfs.unregister_filter(filter) {
            Err(RfsError::StillReferenced(refs)) if left > 1 => {
                tracing::debug!(target: "dummyflt", refs, "filter busy, retrying unregister");
                left -= 1;
                thread::sleep(pause);
            }
            other => return other,
        }
    }
}
