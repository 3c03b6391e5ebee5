// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path scope: which filters apply to which part of the tree

use crate::error::{RfsError, RfsResult};
use crate::filter::{Filter, FilterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Decides the filters applicable at a node of the directory tree. The
/// returned order does not matter; chains sort by priority.
#[cfg_attr(test, mockall::automock)]
pub trait PathScope: Send + Sync {
    fn filters_for(&self, path: &Path) -> Vec<Arc<Filter>>;

    /// Drop everything recorded for an unregistered filter.
    fn forget(&self, _filter: FilterId) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathFlags {
    Include,
    Exclude,
}

struct FilterPaths {
    filter: Arc<Filter>,
    rules: BTreeMap<PathBuf, PathFlags>,
}

impl FilterPaths {
    /// The longest rule that is a component-wise prefix of `path` wins.
    fn decision(&self, path: &Path) -> Option<PathFlags> {
        self.rules
            .iter()
            .filter(|(rule, _)| path.starts_with(rule))
            .max_by_key(|(rule, _)| rule.components().count())
            .map(|(_, flags)| *flags)
    }
}

/// Default scope: per-filter include and exclude rules.
#[derive(Default)]
pub struct PathTable {
    filters: RwLock<HashMap<FilterId, FilterPaths>>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, filter: &Arc<Filter>, path: &Path, flags: PathFlags) -> RfsResult<()> {
        let mut filters = self.filters.write().unwrap();
        let entry = filters.entry(filter.id()).or_insert_with(|| FilterPaths {
            filter: filter.clone(),
            rules: BTreeMap::new(),
        });
        if entry.rules.contains_key(path) {
            return Err(RfsError::PathExists(path.display().to_string()));
        }
        entry.rules.insert(path.to_path_buf(), flags);
        Ok(())
    }

    pub fn remove(&self, filter: FilterId, path: &Path) -> RfsResult<PathFlags> {
        let mut filters = self.filters.write().unwrap();
        let not_found = || RfsError::PathNotFound(path.display().to_string());
        let entry = filters.get_mut(&filter).ok_or_else(not_found)?;
        let flags = entry.rules.remove(path).ok_or_else(not_found)?;
        if entry.rules.is_empty() {
            filters.remove(&filter);
        }
        Ok(flags)
    }

    pub fn paths(&self, filter: FilterId) -> Vec<(PathBuf, PathFlags)> {
        self.filters
            .read()
            .unwrap()
            .get(&filter)
            .map(|entry| entry.rules.iter().map(|(p, f)| (p.clone(), *f)).collect())
            .unwrap_or_default()
    }
}

impl PathScope for PathTable {
    fn filters_for(&self, path: &Path) -> Vec<Arc<Filter>> {
        self.filters
            .read()
            .unwrap()
            .values()
            .filter(|entry| entry.decision(path) == Some(PathFlags::Include))
            .map(|entry| entry.filter.clone())
            .collect()
    }

    fn forget(&self, filter: FilterId) {
        self.filters.write().unwrap().remove(&filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterInfo, FilterOps, FilterRegistry};

    fn filters() -> (FilterRegistry, Arc<Filter>, Arc<Filter>) {
        let registry = FilterRegistry::new(false);
        let a = registry.register(FilterInfo::new("a", 1), FilterOps::new()).expect("a");
        let b = registry.register(FilterInfo::new("b", 2), FilterOps::new()).expect("b");
        (registry, a, b)
    }

    fn names(list: Vec<Arc<Filter>>) -> Vec<String> {
        let mut names: Vec<String> = list.iter().map(|f| f.name().to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn longest_prefix_decides() {
        let (_registry, a, b) = filters();
        let table = PathTable::new();
        table.add(&a, Path::new("/srv"), PathFlags::Include).expect("include");
        table.add(&a, Path::new("/srv/cache"), PathFlags::Exclude).expect("exclude");
        table.add(&a, Path::new("/srv/cache/keep"), PathFlags::Include).expect("re-include");
        table.add(&b, Path::new("/"), PathFlags::Include).expect("root");

        assert_eq!(names(table.filters_for(Path::new("/srv/data"))), vec!["a", "b"]);
        assert_eq!(names(table.filters_for(Path::new("/srv/cache/x"))), vec!["b"]);
        assert_eq!(names(table.filters_for(Path::new("/srv/cache/keep/y"))), vec!["a", "b"]);
        // component-wise, not string prefix
        assert_eq!(names(table.filters_for(Path::new("/srvx"))), vec!["b"]);
    }

    #[test]
    fn duplicate_and_missing_paths() {
        let (_registry, a, _b) = filters();
        let table = PathTable::new();
        table.add(&a, Path::new("/data"), PathFlags::Include).expect("add");
        assert!(matches!(
            table.add(&a, Path::new("/data"), PathFlags::Exclude),
            Err(RfsError::PathExists(_))
        ));
        assert!(matches!(
            table.remove(a.id(), Path::new("/other")),
            Err(RfsError::PathNotFound(_))
        ));
        assert_eq!(table.remove(a.id(), Path::new("/data")).expect("remove"), PathFlags::Include);
        assert!(table.paths(a.id()).is_empty());
    }

    #[test]
    fn forget_drops_all_rules() {
        let (_registry, a, _b) = filters();
        let table = PathTable::new();
        table.add(&a, Path::new("/"), PathFlags::Include).expect("add");
        table.forget(a.id());
        assert!(table.filters_for(Path::new("/x")).is_empty());
    }
}
