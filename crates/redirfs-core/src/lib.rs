// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RedirFS Core: filesystem call interception
//!
//! Filters register callbacks for operations on files, inodes and
//! dentries. Objects inside a filter's path scope get a shadow that swaps
//! their operation table for a redirecting one; every redirected call runs
//! the governing chain of filters around the operation it replaced.

pub mod chain;
pub mod config;
pub mod context;
mod dcache;
mod dispatch;
pub mod error;
pub mod fault;
pub mod filter;
pub mod memfs;
pub mod ops;
pub mod redirfs;
mod runtime;
pub mod scope;
pub mod shadow;
pub mod vfs;

#[cfg(test)]
mod testing;

pub use chain::{Chain, ChainLink, RfsInfo};
pub use config::{DcacheConfig, MissingOpPolicy, RedirfsConfig, ShadowLimits};
pub use context::{CallContext, OpArgs, RfsArgs};
pub use error::{Errno, OpResult, RfsError, RfsResult};
pub use fault::{FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use filter::{Filter, FilterFn, FilterId, FilterInfo, FilterOp, FilterOps, Verdict};
pub use memfs::MemFs;
pub use ops::{CallPhase, ObjKind, OpId, OpMask, OpName};
pub use redirfs::Redirfs;
pub use runtime::RfsStats;
pub use scope::{PathFlags, PathScope, PathTable};
