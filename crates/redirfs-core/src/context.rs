// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-invocation call context and the argument bundle handed to filters

use crate::chain::{Chain, RfsInfo};
use crate::error::{consistency_fault, OpResult};
use crate::filter::{Filter, FilterId, Verdict};
use crate::ops::{CallPhase, OpId, OpName};
use crate::shadow::RfsFile;
use crate::vfs::{Dentry, DirContext, File, Inode};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Arguments of one intercepted call, borrowed from the caller.
pub enum OpArgs<'a> {
    Open { inode: &'a Arc<Inode>, file: &'a Arc<File> },
    Release { inode: &'a Arc<Inode>, file: &'a Arc<File> },
    Llseek { file: &'a Arc<File>, offset: i64, whence: i32 },
    Read { file: &'a Arc<File>, buf: &'a mut [u8], pos: u64 },
    Write { file: &'a Arc<File>, buf: &'a [u8], pos: u64 },
    Iterate { file: &'a Arc<File>, ctx: &'a mut DirContext },
    Flush { file: &'a Arc<File> },
    Fsync { file: &'a Arc<File>, datasync: bool },
    Ioctl { file: &'a Arc<File>, cmd: u32, arg: u64 },
    Fallocate { file: &'a Arc<File>, mode: i32, offset: u64, len: u64 },
    Lookup { dir: &'a Arc<Inode>, dentry: &'a Arc<Dentry> },
    Create { dir: &'a Arc<Inode>, dentry: &'a Arc<Dentry>, mode: u32 },
    Mkdir { dir: &'a Arc<Inode>, dentry: &'a Arc<Dentry>, mode: u32 },
    Unlink { dir: &'a Arc<Inode>, dentry: &'a Arc<Dentry> },
    Rmdir { dir: &'a Arc<Inode>, dentry: &'a Arc<Dentry> },
    Permission { inode: &'a Arc<Inode>, mask: i32 },
    Readlink { dentry: &'a Arc<Dentry>, buf: &'a mut [u8] },
    Revalidate { dentry: &'a Arc<Dentry> },
}

impl OpArgs<'_> {
    pub fn op_name(&self) -> OpName {
        match self {
            OpArgs::Open { .. } => OpName::Open,
            OpArgs::Release { .. } => OpName::Release,
            OpArgs::Llseek { .. } => OpName::Llseek,
            OpArgs::Read { .. } => OpName::Read,
            OpArgs::Write { .. } => OpName::Write,
            OpArgs::Iterate { .. } => OpName::Iterate,
            OpArgs::Flush { .. } => OpName::Flush,
            OpArgs::Fsync { .. } => OpName::Fsync,
            OpArgs::Ioctl { .. } => OpName::Ioctl,
            OpArgs::Fallocate { .. } => OpName::Fallocate,
            OpArgs::Lookup { .. } => OpName::Lookup,
            OpArgs::Create { .. } => OpName::Create,
            OpArgs::Mkdir { .. } => OpName::Mkdir,
            OpArgs::Unlink { .. } => OpName::Unlink,
            OpArgs::Rmdir { .. } => OpName::Rmdir,
            OpArgs::Permission { .. } => OpName::Permission,
            OpArgs::Readlink { .. } => OpName::Readlink,
            OpArgs::Revalidate { .. } => OpName::Revalidate,
        }
    }

    pub fn file(&self) -> Option<&Arc<File>> {
        match self {
            OpArgs::Open { file, .. }
            | OpArgs::Release { file, .. }
            | OpArgs::Llseek { file, .. }
            | OpArgs::Read { file, .. }
            | OpArgs::Write { file, .. }
            | OpArgs::Iterate { file, .. }
            | OpArgs::Flush { file }
            | OpArgs::Fsync { file, .. }
            | OpArgs::Ioctl { file, .. }
            | OpArgs::Fallocate { file, .. } => Some(*file),
            _ => None,
        }
    }

    /// The dentry the call is about: the file's dentry for file operations,
    /// the child for directory operations.
    pub fn dentry(&self) -> Option<&Arc<Dentry>> {
        match self {
            OpArgs::Lookup { dentry, .. }
            | OpArgs::Create { dentry, .. }
            | OpArgs::Mkdir { dentry, .. }
            | OpArgs::Unlink { dentry, .. }
            | OpArgs::Rmdir { dentry, .. }
            | OpArgs::Readlink { dentry, .. }
            | OpArgs::Revalidate { dentry } => Some(*dentry),
            _ => self.file().map(|f| f.dentry()),
        }
    }
}

/// Argument and result bundle passed to every callback of one call.
pub struct RfsArgs<'a> {
    op: OpId,
    phase: CallPhase,
    pub args: OpArgs<'a>,
    /// Provisional result. A pre-call callback that stops the chain sets the
    /// final value here; post-call callbacks may overwrite it.
    pub rv: OpResult,
}

impl<'a> RfsArgs<'a> {
    pub fn new(op: OpId, args: OpArgs<'a>) -> Self {
        Self {
            op,
            phase: CallPhase::Pre,
            args,
            rv: Ok(0),
        }
    }

    pub fn op(&self) -> OpId {
        self.op
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }
}

/// State threaded through one call: traversal cursor, per-filter private
/// data and the short-circuit decision. Never outlives the call.
pub struct CallContext<'c> {
    info: &'c RfsInfo,
    file: Option<&'c RfsFile>,
    cursor: usize,
    data: HashMap<FilterId, Box<dyn Any + Send>>,
    short_circuited: bool,
}

impl<'c> CallContext<'c> {
    pub(crate) fn new(info: &'c RfsInfo, file: Option<&'c RfsFile>) -> Self {
        Self {
            info,
            file,
            cursor: 0,
            data: HashMap::new(),
            short_circuited: false,
        }
    }

    pub fn chain(&self) -> &'c Chain {
        &self.info.chain
    }

    /// Path the governing chain was computed for.
    pub fn path(&self) -> &'c Path {
        &self.info.path
    }

    /// Filter whose callback is running.
    pub fn filter(&self) -> &'c Arc<Filter> {
        match self.info.chain.links().get(self.cursor) {
            Some(link) => link.filter(),
            None => consistency_fault("call context cursor out of range", self.cursor),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    /// Store per-call data for the running filter, returning what it had
    /// stored before.
    pub fn attach_data<T: Any + Send>(&mut self, value: T) -> Option<Box<dyn Any + Send>> {
        let id = self.filter().id();
        self.data.insert(id, Box::new(value))
    }

    pub fn data<T: Any + Send>(&self) -> Option<&T> {
        let id = self.filter().id();
        self.data.get(&id).and_then(|d| d.downcast_ref::<T>())
    }

    pub fn data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        let id = self.filter().id();
        self.data.get_mut(&id).and_then(|d| d.downcast_mut::<T>())
    }

    pub fn detach_data<T: Any + Send>(&mut self) -> Option<T> {
        let id = self.filter().id();
        let boxed = self.data.remove(&id)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.data.insert(id, other);
                None
            }
        }
    }

    /// Per-file data of the running filter, when the call is on a shadowed
    /// open file.
    pub fn file_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.file?.data(self.filter().id())
    }

    pub fn attach_file_data<T: Any + Send + Sync>(&self, value: T) -> bool {
        match self.file {
            Some(file) => {
                file.attach_data(self.filter().id(), Arc::new(value));
                true
            }
            None => false,
        }
    }

    pub fn detach_file_data(&self) -> bool {
        self.file.is_some_and(|file| file.detach_data(self.filter().id()))
    }

    /// Pre-call phase. Returns true when a filter stopped the chain.
    pub(crate) fn precall(&mut self, args: &mut RfsArgs<'_>) -> bool {
        let op = args.op;
        args.phase = CallPhase::Pre;
        let chain: &'c Chain = &self.info.chain;
        for (idx, link) in chain.links().iter().enumerate() {
            let Some(callback) = link.ops().pre_for(op) else {
                continue;
            };
            self.cursor = idx;
            tracing::trace!(filter = link.filter().name(), %op, "precall");
            if callback(self, args) == Verdict::Stop {
                tracing::trace!(filter = link.filter().name(), %op, rv = ?args.rv, "short-circuit");
                self.short_circuited = true;
                return true;
            }
        }
        false
    }

    /// Post-call phase: every filter with a post-call entry, same order as
    /// pre-call. Verdicts are ignored.
    pub(crate) fn postcall(&mut self, args: &mut RfsArgs<'_>) {
        let op = args.op;
        args.phase = CallPhase::Post;
        let chain: &'c Chain = &self.info.chain;
        for (idx, link) in chain.links().iter().enumerate() {
            let Some(callback) = link.ops().post_for(op) else {
                continue;
            };
            self.cursor = idx;
            tracing::trace!(filter = link.filter().name(), %op, "postcall");
            let _ = callback(self, args);
        }
    }
}
