// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Framework configuration

use crate::error::{Errno, OpResult, RfsError, RfsResult};
use crate::fault::FaultPolicy;
use crate::ops::OpName;
use crate::vfs;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result substituted when an intercepted object has no original entry for
/// the operation being dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingOpPolicy {
    /// `EOPNOTSUPP`
    NotSupported,
    /// Whatever the VFS itself returns for a missing entry.
    #[default]
    Invalid,
    /// Report success with a zero result.
    Zero,
}

impl MissingOpPolicy {
    pub fn result(self, op: OpName) -> OpResult {
        match op {
            // The VFS never fails these for a missing entry.
            OpName::Open | OpName::Release | OpName::Flush | OpName::Permission => Ok(0),
            OpName::Revalidate => Ok(1),
            _ => match self {
                MissingOpPolicy::NotSupported => Err(Errno::EOPNOTSUPP),
                MissingOpPolicy::Invalid => vfs::missing_op(op),
                MissingOpPolicy::Zero => Ok(0),
            },
        }
    }
}

/// Shadow arena sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShadowLimits {
    /// Lock buckets per arena.
    pub buckets: usize,
    /// Capacity of each arena, unbounded when unset.
    pub max_inodes: Option<usize>,
    pub max_dentries: Option<usize>,
    pub max_files: Option<usize>,
}

impl Default for ShadowLimits {
    fn default() -> Self {
        Self {
            buckets: 64,
            max_inodes: None,
            max_dentries: None,
            max_files: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DcacheConfig {
    /// Record inclusion decisions for children discovered by directory
    /// iteration.
    pub eager_population: bool,
    pub max_pending: usize,
}

impl Default for DcacheConfig {
    fn default() -> Self {
        Self {
            eager_population: true,
            max_pending: 4096,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RedirfsConfig {
    /// Initial state of the dispatch switch.
    pub enabled: bool,
    /// Reject registration of a filter whose priority is already taken.
    pub unique_priorities: bool,
    pub missing_op: MissingOpPolicy,
    pub limits: ShadowLimits,
    pub dcache: DcacheConfig,
    pub faults: FaultPolicy,
}

impl Default for RedirfsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unique_priorities: false,
            missing_op: MissingOpPolicy::default(),
            limits: ShadowLimits::default(),
            dcache: DcacheConfig::default(),
            faults: FaultPolicy::default(),
        }
    }
}

impl RedirfsConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> RfsResult<Self> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| RfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> RfsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: impl AsRef<Path>) -> RfsResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path)?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            Self::from_json_bytes(&content)
        } else {
            let text =
                String::from_utf8(content).map_err(|e| RfsError::Config(e.to_string()))?;
            Self::from_toml_str(&text)
        }
    }

    pub fn validate(&self) -> RfsResult<()> {
        if self.limits.buckets == 0 {
            return Err(RfsError::Config("limits.buckets must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultOp;
    use std::io::Write;

    #[test]
    fn defaults_are_filled_for_partial_toml() {
        let config = RedirfsConfig::from_toml_str(
            r#"
            unique-priorities = true

            [limits]
            max-files = 8

            [dcache]
            max-pending = 16
            "#,
        )
        .expect("config");
        assert!(config.enabled);
        assert!(config.unique_priorities);
        assert_eq!(config.limits.buckets, 64);
        assert_eq!(config.limits.max_files, Some(8));
        assert!(config.dcache.eager_population);
        assert_eq!(config.dcache.max_pending, 16);
        assert_eq!(config.missing_op, MissingOpPolicy::Invalid);
    }

    #[test]
    fn loads_json_file_with_fault_policy() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().expect("tempfile");
        file.write_all(
            br#"{ "missing-op": "not-supported",
                  "faults": { "enabled": true, "rules": [ { "op": "alloc_chain" } ] } }"#,
        )
        .expect("write");
        let config = RedirfsConfig::load(file.path()).expect("load");
        assert_eq!(config.missing_op, MissingOpPolicy::NotSupported);
        assert_eq!(config.faults.rules[0].op, FaultOp::AllocChain);
    }

    #[test]
    fn zero_buckets_rejected() {
        let err = RedirfsConfig::from_toml_str("[limits]\nbuckets = 0\n").unwrap_err();
        assert!(matches!(err, RfsError::Config(_)));
    }

    #[test]
    fn missing_op_policy_results() {
        assert_eq!(MissingOpPolicy::NotSupported.result(OpName::Open), Ok(0));
        assert_eq!(MissingOpPolicy::NotSupported.result(OpName::Read), Err(Errno::EOPNOTSUPP));
        assert_eq!(MissingOpPolicy::Invalid.result(OpName::Ioctl), Err(Errno::ENOTTY));
        assert_eq!(MissingOpPolicy::Zero.result(OpName::Write), Ok(0));
    }
}
