// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Pending inclusion decisions for children seen in directory listings
//! before the dentry cache has materialized them.

use crate::chain::RfsInfo;
use crate::vfs::ObjId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct Pending {
    info: Arc<RfsInfo>,
    generation: u64,
}

/// Keyed by parent dentry and child name. Any configuration change bumps
/// the generation and empties the table, so a stale decision is never
/// consumed.
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<(ObjId, String), Pending>>,
    generation: AtomicU64,
    max: usize,
}

impl PendingTable {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            max,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Record a decision computed under `generation`. Returns false when the
    /// decision is already stale or the table is full.
    pub(crate) fn insert(&self, parent: ObjId, name: &str, info: Arc<RfsInfo>, generation: u64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if generation != self.generation() {
            return false;
        }
        let key = (parent, name.to_string());
        if entries.len() >= self.max && !entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, Pending { info, generation });
        true
    }

    /// Consume the decision for `name` under `parent`, if one is current.
    pub(crate) fn take(&self, parent: ObjId, name: &str) -> Option<Arc<RfsInfo>> {
        let mut entries = self.entries.lock().unwrap();
        let pending = entries.remove(&(parent, name.to_string()))?;
        (pending.generation == self.generation()).then_some(pending.info)
    }

    pub(crate) fn invalidate(&self) {
        let mut entries = self.entries.lock().unwrap();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBuilder;
    use crate::scope::PathTable;
    use std::path::Path;

    fn info(path: &str) -> Arc<RfsInfo> {
        ChainBuilder::new(Arc::new(PathTable::new())).info_for(Path::new(path))
    }

    #[test]
    fn entries_are_consumed_once() {
        let table = PendingTable::new(8);
        let parent = ObjId::next();
        let generation = table.generation();
        assert!(table.insert(parent, "a", info("/d/a"), generation));
        assert_eq!(table.len(), 1);

        let taken = table.take(parent, "a").expect("pending entry");
        assert_eq!(taken.path, Path::new("/d/a"));
        assert!(table.take(parent, "a").is_none());
        assert!(table.take(ObjId::next(), "a").is_none());
    }

    #[test]
    fn invalidation_discards_stale_decisions() {
        let table = PendingTable::new(8);
        let parent = ObjId::next();
        let before = table.generation();
        assert!(table.insert(parent, "a", info("/a"), before));

        table.invalidate();
        assert_eq!(table.len(), 0);
        assert!(table.take(parent, "a").is_none());
        assert!(!table.insert(parent, "b", info("/b"), before));
        assert!(table.insert(parent, "b", info("/b"), table.generation()));
    }

    #[test]
    fn full_table_rejects_new_names() {
        let table = PendingTable::new(1);
        let parent = ObjId::next();
        let generation = table.generation();
        assert!(table.insert(parent, "a", info("/a"), generation));
        assert!(!table.insert(parent, "b", info("/b"), generation));
        assert!(table.insert(parent, "a", info("/a"), generation));
    }
}
