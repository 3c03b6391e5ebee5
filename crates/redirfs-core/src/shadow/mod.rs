// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shadow objects: per-real-object wrappers that own the captured original
//! operation table and the redirecting table installed in its place.

mod arena;
mod dentry;
mod file;
mod inode;

pub(crate) use arena::{ShadowArena, ShadowRef};
pub use dentry::RfsDentry;
pub use file::RfsFile;
pub use inode::RfsInode;

use crate::runtime::Core;
use crate::vfs::ObjId;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Weak};

pub(crate) trait Shadow: Send + Sync + Sized + 'static {
    const KIND: &'static str;

    fn object_id(&self) -> ObjId;

    fn refs(&self) -> &AtomicUsize;

    /// Set while the real object itself holds a reference.
    fn attached(&self) -> &AtomicBool;

    fn core(&self) -> &Weak<Core>;

    fn arena(core: &Core) -> &Arc<ShadowArena<Self>>;

    /// Put the captured original table back. Runs under the bucket lock, so
    /// it cannot interleave with creation of a new shadow for the object.
    fn teardown(&self);

    /// Drop links to other shadows. Runs once the shadow left its arena.
    fn retire(&self);
}
