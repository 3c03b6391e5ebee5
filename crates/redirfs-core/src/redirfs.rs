// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Framework facade used by filters and by whoever wires paths to them

use crate::chain::Chain;
use crate::config::RedirfsConfig;
use crate::error::{RfsError, RfsResult};
use crate::fault::FaultInjector;
use crate::filter::{Filter, FilterInfo, FilterOps};
use crate::runtime::{Core, RfsStats};
use crate::scope::{PathFlags, PathScope, PathTable};
use crate::vfs::{Dentry, File, Inode};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// One interception framework instance. Dropping it detaches every shadow
/// it installed.
pub struct Redirfs {
    core: Arc<Core>,
    paths: Option<Arc<PathTable>>,
}

impl Redirfs {
    /// Framework with the default include/exclude path table.
    pub fn new(config: RedirfsConfig) -> RfsResult<Self> {
        config.validate()?;
        let paths = Arc::new(PathTable::new());
        Ok(Self {
            core: Core::new(config, paths.clone()),
            paths: Some(paths),
        })
    }

    /// Framework driven by an external scope. The scope reports its changes
    /// through [`Redirfs::scope_changed`].
    pub fn with_scope(config: RedirfsConfig, scope: Arc<dyn PathScope>) -> RfsResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Core::new(config, scope),
            paths: None,
        })
    }

    pub fn config(&self) -> &RedirfsConfig {
        self.core.config()
    }

    pub fn register_filter(&self, info: FilterInfo, ops: FilterOps) -> RfsResult<Arc<Filter>> {
        let filter = self.core.registry.register(info, ops)?;
        tracing::info!(filter = filter.name(), priority = filter.priority(), "filter registered");
        if self.paths.is_none() {
            self.core.config_changed();
        }
        Ok(filter)
    }

    /// Take the filter out of every chain and remove it. Fails with
    /// `StillReferenced` while in-flight calls still hold a chain with the
    /// filter; the filter stays inactive and the call can be repeated.
    pub fn unregister_filter(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        self.core.registry.begin_unregister(filter)?;
        self.core.config_changed();
        match self.core.registry.finish_unregister(filter) {
            Ok(()) => {
                self.core.builder.scope().forget(filter.id());
                tracing::info!(filter = filter.name(), "filter unregistered");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(filter = filter.name(), %err, "unregister deferred");
                Err(err)
            }
        }
    }

    /// Replace the filter's operation table; chains are rebuilt.
    pub fn set_operations(&self, filter: &Arc<Filter>, ops: FilterOps) -> RfsResult<()> {
        self.core.registry.set_operations(filter, ops)?;
        self.core.config_changed();
        Ok(())
    }

    pub fn activate_filter(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        self.set_active(filter, true)
    }

    pub fn deactivate_filter(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        self.set_active(filter, false)
    }

    fn set_active(&self, filter: &Arc<Filter>, active: bool) -> RfsResult<()> {
        if self.core.registry.set_active(filter, active)? {
            tracing::info!(filter = filter.name(), active, "filter state changed");
            self.core.config_changed();
        }
        Ok(())
    }

    pub fn find_filter(&self, name: &str) -> Option<Arc<Filter>> {
        self.core.registry.find(name)
    }

    /// Registered filters in invocation order.
    pub fn filters(&self) -> Vec<Arc<Filter>> {
        self.core.registry.filters()
    }

    fn path_table(&self) -> RfsResult<&Arc<PathTable>> {
        self.paths
            .as_ref()
            .ok_or_else(|| RfsError::Config("paths are managed by an external scope".into()))
    }

    fn ensure_registered(&self, filter: &Arc<Filter>) -> RfsResult<()> {
        if self.core.registry.contains(filter) {
            Ok(())
        } else {
            Err(RfsError::InvalidFilter)
        }
    }

    /// Include or exclude the subtree at `dentry` for `filter`.
    pub fn add_path(&self, filter: &Arc<Filter>, dentry: &Arc<Dentry>, flags: PathFlags) -> RfsResult<()> {
        self.ensure_registered(filter)?;
        let path = dentry.path();
        self.path_table()?.add(filter, &path, flags)?;
        tracing::info!(filter = filter.name(), path = %path.display(), ?flags, "path added");
        self.core.add_root(dentry);
        self.core.config_changed();
        Ok(())
    }

    pub fn remove_path(&self, filter: &Arc<Filter>, dentry: &Arc<Dentry>) -> RfsResult<PathFlags> {
        self.ensure_registered(filter)?;
        let path = dentry.path();
        let flags = self.path_table()?.remove(filter.id(), &path)?;
        tracing::info!(filter = filter.name(), path = %path.display(), "path removed");
        self.core.config_changed();
        Ok(flags)
    }

    pub fn paths(&self, filter: &Arc<Filter>) -> RfsResult<Vec<(PathBuf, PathFlags)>> {
        Ok(self.path_table()?.paths(filter.id()))
    }

    /// An external scope changed its decisions for the subtree at `dentry`.
    pub fn scope_changed(&self, dentry: &Arc<Dentry>) {
        self.core.add_root(dentry);
        self.core.subtree_changed(dentry);
    }

    /// Chain governing `dentry`, when it has a shadow.
    pub fn chain_for(&self, dentry: &Dentry) -> Option<Arc<Chain>> {
        let rdentry = self.core.dentries.lookup(dentry.id())?;
        let info = rdentry.info();
        Some(info.chain.clone())
    }

    pub fn file_chain(&self, file: &File) -> Option<Arc<Chain>> {
        let rfile = self.core.files.lookup(file.id())?;
        let info = rfile.info();
        Some(info.chain.clone())
    }

    pub fn is_shadowed(&self, dentry: &Dentry) -> bool {
        self.core.dentries.contains(dentry.id())
    }

    pub fn is_inode_shadowed(&self, inode: &Inode) -> bool {
        self.core.inodes.contains(inode.id())
    }

    pub fn is_file_shadowed(&self, file: &File) -> bool {
        self.core.files.contains(file.id())
    }

    /// Attach per-file data for `filter`, returning what was stored before.
    pub fn attach_file_data<T: Any + Send + Sync>(
        &self,
        filter: &Arc<Filter>,
        file: &File,
        value: T,
    ) -> RfsResult<Option<Arc<dyn Any + Send + Sync>>> {
        self.ensure_registered(filter)?;
        let rfile = self.core.files.lookup(file.id()).ok_or(RfsError::NotAttached)?;
        Ok(rfile.attach_data(filter.id(), Arc::new(value)))
    }

    pub fn file_data<T: Any + Send + Sync>(&self, filter: &Arc<Filter>, file: &File) -> Option<Arc<T>> {
        self.core.files.lookup(file.id())?.data(filter.id())
    }

    pub fn detach_file_data(&self, filter: &Arc<Filter>, file: &File) -> bool {
        self.core
            .files
            .lookup(file.id())
            .is_some_and(|rfile| rfile.detach_data(filter.id()))
    }

    /// Turn dispatch on or off. Shadows stay installed; while off every
    /// call goes straight to the original operation table.
    pub fn set_enabled(&self, enabled: bool) {
        if self.core.set_enabled(enabled) != enabled {
            tracing::info!(enabled, "dispatch switched");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn faults(&self) -> &Arc<FaultInjector> {
        &self.core.faults
    }

    pub fn shutdown(&self) {
        self.core.shutdown();
    }

    pub fn stats(&self) -> RfsStats {
        self.core.stats()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }
}

impl Drop for Redirfs {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}
