// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filter identities and the registry that owns them

use crate::context::{CallContext, RfsArgs};
use crate::error::{RfsError, RfsResult};
use crate::ops::{OpId, OpMask};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterId(pub u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flt#{}", self.0)
    }
}

/// What a callback tells the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Supply `RfsArgs::rv` as the final result; only meaningful in pre-call.
    Stop,
}

pub type FilterFn =
    Arc<dyn Fn(&mut CallContext<'_>, &mut RfsArgs<'_>) -> Verdict + Send + Sync>;

/// Callbacks a filter registers for one operation.
#[derive(Clone, Default)]
pub struct FilterOp {
    pub pre: Option<FilterFn>,
    pub post: Option<FilterFn>,
}

/// Sparse operation table of a filter.
#[derive(Clone, Default)]
pub struct FilterOps {
    entries: HashMap<OpId, FilterOp>,
}

impl FilterOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre<F>(mut self, op: OpId, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &mut RfsArgs<'_>) -> Verdict + Send + Sync + 'static,
    {
        self.entries.entry(op).or_default().pre = Some(Arc::new(f));
        self
    }

    pub fn post<F>(mut self, op: OpId, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &mut RfsArgs<'_>) -> Verdict + Send + Sync + 'static,
    {
        self.entries.entry(op).or_default().post = Some(Arc::new(f));
        self
    }

    /// Register one callback for both phases; it can tell them apart through
    /// `RfsArgs::phase`.
    pub fn both<F>(mut self, op: OpId, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &mut RfsArgs<'_>) -> Verdict + Send + Sync + 'static,
    {
        let f: FilterFn = Arc::new(f);
        self.entries.insert(
            op,
            FilterOp {
                pre: Some(f.clone()),
                post: Some(f),
            },
        );
        self
    }

    pub fn set(&mut self, op: OpId, entry: FilterOp) {
        self.entries.insert(op, entry);
    }

    pub fn get(&self, op: OpId) -> Option<&FilterOp> {
        self.entries.get(&op)
    }

    pub(crate) fn pre_for(&self, op: OpId) -> Option<&FilterFn> {
        self.entries.get(&op).and_then(|e| e.pre.as_ref())
    }

    pub(crate) fn post_for(&self, op: OpId) -> Option<&FilterFn> {
        self.entries.get(&op).and_then(|e| e.post.as_ref())
    }

    /// Operations with at least one callback.
    pub fn mask(&self) -> OpMask {
        self.entries
            .iter()
            .filter(|(_, e)| e.pre.is_some() || e.post.is_some())
            .map(|(op, _)| *op)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn validate(&self) -> RfsResult<()> {
        match self.entries.keys().find(|op| !op.is_meaningful()) {
            Some(op) => Err(RfsError::Config(format!(
                "{op} is not an operation of {:?} objects",
                op.kind
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FilterOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterOps").field(&self.mask()).finish()
    }
}

/// Registration parameters of a filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInfo {
    pub name: String,
    /// Lower values run first.
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl FilterInfo {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Clone)]
pub(crate) struct OpsSnapshot {
    pub(crate) generation: u64,
    pub(crate) ops: Arc<FilterOps>,
}

/// A registered filter identity. Name and priority never change; the
/// operation table can be replaced, which produces new chains.
pub struct Filter {
    id: FilterId,
    name: String,
    priority: i32,
    seq: u64,
    active: AtomicBool,
    unregistering: AtomicBool,
    ops: RwLock<OpsSnapshot>,
    chain_refs: AtomicUsize,
}

impl Filter {
    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Registration order, used to break priority ties.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.unregistering.load(Ordering::Acquire)
    }

    pub fn is_unregistering(&self) -> bool {
        self.unregistering.load(Ordering::Acquire)
    }

    pub fn ops(&self) -> Arc<FilterOps> {
        self.ops.read().unwrap().ops.clone()
    }

    pub fn ops_generation(&self) -> u64 {
        self.ops.read().unwrap().generation
    }

    /// Number of live chains that include this filter.
    pub fn chain_refs(&self) -> usize {
        self.chain_refs.load(Ordering::Acquire)
    }

    pub(crate) fn ops_snapshot(&self) -> OpsSnapshot {
        self.ops.read().unwrap().clone()
    }

    pub(crate) fn order_key(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }

    pub(crate) fn retain_chain(&self) {
        self.chain_refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_chain(&self) {
        let prev = self.chain_refs.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            crate::error::consistency_fault("filter chain refcount underflow", &self.name);
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    by_name: BTreeMap<String, Arc<Filter>>,
    next_id: u64,
    next_seq: u64,
}

/// Process-wide filter table; mutation goes through a single lock and
/// dispatch never touches it.
pub(crate) struct FilterRegistry {
    state: Mutex<RegistryState>,
    unique_priorities: bool,
}

impl FilterRegistry {
    pub(crate) fn new(unique_priorities: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            unique_priorities,
        }
    }

    pub(crate) fn register(&self, info: FilterInfo, ops: FilterOps) -> RfsResult<Arc<Filter>> {
        if info.name.is_empty() {
            return Err(RfsError::Config("filter name must not be empty".into()));
        }
        ops.validate()?;
        let mut state = self.state.lock().unwrap();
        if state.by_name.contains_key(&info.name) {
            return Err(RfsError::DuplicateName(info.name));
        }
        if self.unique_priorities && state.by_name.values().any(|f| f.priority == info.priority) {
            return Err(RfsError::PriorityConflict(info.priority));
        }
        state.next_id += 1;
        state.next_seq += 1;
        let filter = Arc::new(Filter {
            id: FilterId(state.next_id),
            name: info.name.clone(),
            priority: info.priority,
            seq: state.next_seq,
            active: AtomicBool::new(info.active),
            unregistering: AtomicBool::new(false),
            ops: RwLock::new(OpsSnapshot {
                generation: 0,
                ops: Arc::new(ops),
            }),
            chain_refs: AtomicUsize::new(0),
        });
        state.by_name.insert(info.name, filter.clone());
        Ok(filter)
    }

    fn ensure_registered(state: &RegistryState, filter: &Arc<Filter>) -> RfsResult<()> {
        match state.by_name.get(&filter.name) {
            Some(known) if Arc::ptr_eq(known, filter) => Ok(()),
            _ => Err(RfsError::InvalidFilter),
        }
    }

    pub(crate) fn contains(&self, filter: &Arc<Filter>) -> bool {
        let state = self.state.lock().unwrap();
        Self::ensure_registered(&state, filter).is_ok()
    }

    /// Stop the filter from entering new chains. The entry stays until
    /// `finish_unregister` succeeds.
    pub(crate) fn begin_unregister(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        let state = self.state.lock().unwrap();
        Self::ensure_registered(&state, filter)?;
        filter.unregistering.store(true, Ordering::Release);
        Ok(())
    }

    /// Remove the entry once no chain references the filter.
    pub(crate) fn finish_unregister(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::ensure_registered(&state, filter)?;
        let refs = filter.chain_refs();
        if refs > 0 {
            return Err(RfsError::StillReferenced(refs));
        }
        state.by_name.remove(&filter.name);
        Ok(())
    }

    pub(crate) fn set_operations(&self, filter: &Arc<Filter>, ops: FilterOps) -> RfsResult<()> {
        ops.validate()?;
        let state = self.state.lock().unwrap();
        Self::ensure_registered(&state, filter)?;
        let mut snapshot = filter.ops.write().unwrap();
        snapshot.generation += 1;
        snapshot.ops = Arc::new(ops);
        Ok(())
    }

    pub(crate) fn set_active(&self, filter: &Arc<Filter>, active: bool) -> RfsResult<bool> {
        let state = self.state.lock().unwrap();
        Self::ensure_registered(&state, filter)?;
        Ok(filter.active.swap(active, Ordering::AcqRel) != active)
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<Filter>> {
        self.state.lock().unwrap().by_name.get(name).cloned()
    }

    /// Registered filters in invocation order.
    pub(crate) fn filters(&self) -> Vec<Arc<Filter>> {
        let mut filters: Vec<Arc<Filter>> =
            self.state.lock().unwrap().by_name.values().cloned().collect();
        filters.sort_by_key(|f| f.order_key());
        filters
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().by_name.len()
    }
}
