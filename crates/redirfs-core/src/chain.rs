// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Immutable filter chains and the builder that shares them

use crate::filter::{Filter, FilterId, FilterOps};
use crate::ops::{OpId, OpMask};
use crate::scope::PathScope;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// One filter in a chain, with the operation table it had when the chain
/// was built.
pub struct ChainLink {
    filter: Arc<Filter>,
    ops: Arc<FilterOps>,
}

impl ChainLink {
    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }

    pub fn ops(&self) -> &Arc<FilterOps> {
        &self.ops
    }
}

/// Ordered, immutable list of the filters governing an object.
pub struct Chain {
    id: u64,
    links: Vec<ChainLink>,
    mask: OpMask,
}

impl Chain {
    fn new(id: u64, links: Vec<ChainLink>) -> Self {
        let mut mask = OpMask::EMPTY;
        for link in &links {
            link.filter.retain_chain();
            mask = mask.union(link.ops.mask());
        }
        Self { id, links, mask }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn mask(&self) -> OpMask {
        self.mask
    }

    /// True when at least one filter has a callback for `op`.
    pub fn has_op(&self, op: OpId) -> bool {
        self.mask.contains(op)
    }

    pub fn contains(&self, filter: FilterId) -> bool {
        self.links.iter().any(|l| l.filter.id() == filter)
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.filter.name()).collect()
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        for link in &self.links {
            link.filter.release_chain();
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("filters", &self.filter_names())
            .field("mask", &self.mask)
            .finish()
    }
}

/// Inclusion decision for one node: the path it was computed for and the
/// chain that governs objects there.
#[derive(Debug)]
pub struct RfsInfo {
    pub path: PathBuf,
    pub chain: Arc<Chain>,
}

type Signature = Vec<(FilterId, u64)>;

pub struct ChainBuilder {
    scope: Arc<dyn PathScope>,
    cache: Mutex<HashMap<Signature, Weak<Chain>>>,
    next_id: AtomicU64,
}

impl ChainBuilder {
    pub fn new(scope: Arc<dyn PathScope>) -> Self {
        Self {
            scope,
            cache: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn scope(&self) -> &Arc<dyn PathScope> {
        &self.scope
    }

    /// Chain for `path`: the active filters the scope reports, ascending by
    /// priority. Chains with the same filters and operation tables are shared.
    pub fn build_chain(&self, path: &Path) -> Arc<Chain> {
        // Scope evaluation happens before any lock is taken.
        let mut filters = self.scope.filters_for(path);
        filters.retain(|f| f.is_active());
        filters.sort_by_key(|f| f.order_key());
        filters.dedup_by_key(|f| f.id());

        let snapshots: Vec<_> = filters.iter().map(|f| f.ops_snapshot()).collect();
        let signature: Signature = filters
            .iter()
            .zip(&snapshots)
            .map(|(f, s)| (f.id(), s.generation))
            .collect();

        let mut cache = self.cache.lock().unwrap();
        if let Some(chain) = cache.get(&signature).and_then(Weak::upgrade) {
            return chain;
        }
        let links = filters
            .into_iter()
            .zip(snapshots)
            .map(|(filter, snapshot)| ChainLink {
                filter,
                ops: snapshot.ops,
            })
            .collect();
        let chain = Arc::new(Chain::new(self.next_id.fetch_add(1, Ordering::Relaxed), links));
        cache.retain(|_, weak| weak.strong_count() > 0);
        cache.insert(signature, Arc::downgrade(&chain));
        tracing::trace!(chain = chain.id(), path = %path.display(), filters = ?chain.filter_names(), "built chain");
        chain
    }

    pub fn info_for(&self, path: &Path) -> Arc<RfsInfo> {
        Arc::new(RfsInfo {
            path: path.to_path_buf(),
            chain: self.build_chain(path),
        })
    }

    /// Chains still alive somewhere.
    pub fn live_chains(&self) -> usize {
        self.cache.lock().unwrap().values().filter(|w| w.strong_count() > 0).count()
    }
}
