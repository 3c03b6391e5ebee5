// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Lookup-or-create arena keyed by real-object identity

use super::Shadow;
use crate::error::{consistency_fault, RfsError, RfsResult};
use crate::fault::{FaultInjector, FaultOp};
use crate::vfs::ObjId;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Bucket<S> = Mutex<HashMap<ObjId, Arc<S>>>;

/// At most one shadow per real object. Creation and table installation run
/// under the bucket lock; so does the final release and table restore.
pub(crate) struct ShadowArena<S> {
    buckets: Box<[Bucket<S>]>,
    live: AtomicUsize,
    limit: Option<usize>,
    faults: Arc<FaultInjector>,
    fault_op: FaultOp,
}

impl<S: Shadow> ShadowArena<S> {
    pub(crate) fn new(
        buckets: usize,
        limit: Option<usize>,
        faults: Arc<FaultInjector>,
        fault_op: FaultOp,
    ) -> Arc<Self> {
        let buckets = (0..buckets.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Arc::new(Self {
            buckets,
            live: AtomicUsize::new(0),
            limit,
            faults,
            fault_op,
        })
    }

    fn bucket(&self, id: ObjId) -> &Bucket<S> {
        let hash = id.raw().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        &self.buckets[(hash >> 32) as usize % self.buckets.len()]
    }

    fn exhausted(&self) -> bool {
        if self.faults.should_fault(self.fault_op) {
            return true;
        }
        self.limit.is_some_and(|limit| self.live.load(Ordering::Acquire) >= limit)
    }

    fn held(self: &Arc<Self>, shadow: Arc<S>) -> ShadowRef<S> {
        ShadowRef {
            arena: self.clone(),
            shadow,
        }
    }

    pub(crate) fn lookup(self: &Arc<Self>, id: ObjId) -> Option<ShadowRef<S>> {
        let map = self.bucket(id).lock().unwrap();
        let shadow = map.get(&id)?.clone();
        // entries in the map always hold at least one reference
        shadow.refs().fetch_add(1, Ordering::AcqRel);
        drop(map);
        Some(self.held(shadow))
    }

    pub(crate) fn contains(&self, id: ObjId) -> bool {
        self.bucket(id).lock().unwrap().contains_key(&id)
    }

    /// Return the shadow of `id`, creating it with `create` when there is
    /// none. `create` must return a shadow holding one reference with its
    /// table already installed.
    pub(crate) fn get_or_create(
        self: &Arc<Self>,
        id: ObjId,
        create: impl FnOnce() -> Arc<S>,
    ) -> RfsResult<ShadowRef<S>> {
        let mut map = self.bucket(id).lock().unwrap();
        if let Some(existing) = map.get(&id) {
            existing.refs().fetch_add(1, Ordering::AcqRel);
            let existing = existing.clone();
            drop(map);
            return Ok(self.held(existing));
        }
        if self.exhausted() {
            return Err(RfsError::ResourceExhausted(S::KIND));
        }
        let shadow = create();
        map.insert(id, shadow.clone());
        self.live.fetch_add(1, Ordering::AcqRel);
        drop(map);
        tracing::debug!(kind = S::KIND, object = id.raw(), "shadow created");
        Ok(self.held(shadow))
    }

    /// Like `get_or_create`, for objects that can never have a shadow yet.
    pub(crate) fn create_new(
        self: &Arc<Self>,
        id: ObjId,
        create: impl FnOnce() -> Arc<S>,
    ) -> RfsResult<ShadowRef<S>> {
        let mut map = self.bucket(id).lock().unwrap();
        if map.contains_key(&id) {
            drop(map);
            consistency_fault("second shadow for one object", format_args!("{} {}", S::KIND, id.raw()));
        }
        if self.exhausted() {
            return Err(RfsError::ResourceExhausted(S::KIND));
        }
        let shadow = create();
        map.insert(id, shadow.clone());
        self.live.fetch_add(1, Ordering::AcqRel);
        drop(map);
        tracing::debug!(kind = S::KIND, object = id.raw(), "shadow created");
        Ok(self.held(shadow))
    }

    /// Take a reference on a shadow found through a weak back-pointer.
    /// Fails once the shadow reached zero and is being torn down.
    pub(crate) fn try_acquire(self: &Arc<Self>, shadow: &Arc<S>) -> Option<ShadowRef<S>> {
        let refs = shadow.refs();
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match refs.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(self.held(shadow.clone())),
                Err(actual) => current = actual,
            }
        }
    }

    /// Record that the real object holds a reference. Returns false when it
    /// already did.
    pub(crate) fn pin(&self, held: &ShadowRef<S>) -> bool {
        if held.attached().swap(true, Ordering::AcqRel) {
            return false;
        }
        held.refs().fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Drop the real object's reference, if it holds one.
    pub(crate) fn unpin(&self, shadow: &Arc<S>) -> bool {
        if !shadow.attached().swap(false, Ordering::AcqRel) {
            return false;
        }
        self.release(shadow);
        true
    }

    /// Drop one reference. The transition to zero happens exactly once, under
    /// the bucket lock, and restores the original table there.
    pub(crate) fn release(&self, shadow: &Arc<S>) {
        let refs = shadow.refs();
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                consistency_fault("shadow released twice", format_args!("{} {}", S::KIND, shadow.object_id().raw()));
            }
            if current > 1 {
                match refs.compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return,
                    Err(actual) => {
                        current = actual;
                        continue;
                    }
                }
            }

            let id = shadow.object_id();
            let mut map = self.bucket(id).lock().unwrap();
            match refs.compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    match map.remove(&id) {
                        Some(stored) if Arc::ptr_eq(&stored, shadow) => {}
                        _ => {
                            drop(map);
                            consistency_fault("released shadow missing from arena", format_args!("{} {}", S::KIND, id.raw()));
                        }
                    }
                    shadow.teardown();
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    drop(map);
                    tracing::debug!(kind = S::KIND, object = id.raw(), "shadow released");
                    shadow.retire();
                    return;
                }
                Err(actual) => {
                    // a lookup took a reference before we got the lock
                    drop(map);
                    current = actual;
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<S>> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.lock().unwrap().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Counted reference to a shadow; dropping it releases the reference.
pub(crate) struct ShadowRef<S: Shadow> {
    arena: Arc<ShadowArena<S>>,
    shadow: Arc<S>,
}

impl<S: Shadow> ShadowRef<S> {
    pub(crate) fn arc(&self) -> &Arc<S> {
        &self.shadow
    }
}

impl<S: Shadow> Clone for ShadowRef<S> {
    fn clone(&self) -> Self {
        let prev = self.shadow.refs().fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            consistency_fault("reference taken on a dead shadow", format_args!("{} {}", S::KIND, self.shadow.object_id().raw()));
        }
        Self {
            arena: self.arena.clone(),
            shadow: self.shadow.clone(),
        }
    }
}

impl<S: Shadow> Drop for ShadowRef<S> {
    fn drop(&mut self) {
        self.arena.release(&self.shadow);
    }
}

impl<S: Shadow> Deref for ShadowRef<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.shadow
    }
}
