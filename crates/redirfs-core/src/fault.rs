// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy + runtime controller for the allocation points of
//! the framework

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Allocation points that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    AllocInode,
    AllocDentry,
    AllocFile,
    AllocChain,
    AllocContext,
}

impl FaultOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultOp::AllocInode => "inode shadow",
            FaultOp::AllocDentry => "dentry shadow",
            FaultOp::AllocFile => "file shadow",
            FaultOp::AllocChain => "chain",
            FaultOp::AllocContext => "call context",
        }
    }
}

/// Individual rule describing which allocation should fail and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Optional number of leading invocations to skip before injecting faults.
    #[serde(default)]
    pub start_after: u64,
    /// Optional maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl FaultRule {
    pub fn always(op: FaultOp) -> Self {
        Self {
            op,
            start_after: 0,
            max_faults: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn failing(rules: Vec<FaultRule>) -> Self {
        Self {
            enabled: true,
            rules,
        }
    }

    pub fn summary(&self) -> FaultPolicySummary {
        FaultPolicySummary {
            enabled: self.enabled,
            active: self.enabled && !self.rules.is_empty(),
            rule_count: self.rules.len(),
        }
    }
}

/// Lightweight summary returned to callers.
#[derive(Clone, Debug, Default)]
pub struct FaultPolicySummary {
    pub enabled: bool,
    pub active: bool,
    pub rule_count: usize,
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Clone, Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
    injected: u64,
}

/// Runtime controller that tracks policy + hit counts.
#[derive(Debug)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FaultState::default()),
        }
    }

    pub fn with_policy(policy: FaultPolicy) -> Self {
        let injector = Self::new();
        injector.set_policy(policy);
        injector
    }

    pub fn snapshot(&self) -> FaultPolicy {
        self.state.lock().unwrap().policy.clone()
    }

    pub fn summary(&self) -> FaultPolicySummary {
        self.snapshot().summary()
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state.lock().unwrap();
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Total number of faults injected since creation.
    pub fn injected(&self) -> u64 {
        self.state.lock().unwrap().injected
    }

    /// Returns true when the allocation identified by `op` must fail.
    pub fn should_fault(&self, op: FaultOp) -> bool {
        let mut guard = self.state.lock().unwrap();
        if !guard.policy.enabled {
            return false;
        }
        let rules_len = guard.policy.rules.len();
        if guard.counters.len() < rules_len {
            guard.counters.resize(rules_len, RuleCounters::default());
        }
        for idx in 0..rules_len {
            let rule = guard.policy.rules[idx].clone();
            if rule.op != op {
                continue;
            }
            let counters = &mut guard.counters[idx];
            counters.invocations = counters.invocations.saturating_add(1);
            if counters.invocations <= rule.start_after {
                continue;
            }
            if let Some(max) = rule.max_faults {
                if counters.hits >= max {
                    continue;
                }
            }
            counters.hits = counters.hits.saturating_add(1);
            guard.injected = guard.injected.saturating_add(1);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fault_policy_json() {
        let json = br#"{ "enabled": true, "rules": [ { "op": "alloc_file", "max_faults": 2 } ] }"#;
        let policy = FaultPolicy::from_json_bytes(json).expect("policy");
        assert!(policy.enabled);
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].op, FaultOp::AllocFile);
        assert_eq!(policy.rules[0].max_faults, Some(2));
    }

    #[test]
    fn injector_respects_start_and_max_hits() {
        let injector = FaultInjector::with_policy(FaultPolicy::failing(vec![FaultRule {
            op: FaultOp::AllocDentry,
            start_after: 1,
            max_faults: Some(2),
        }]));

        // First call skipped due to start_after
        assert!(!injector.should_fault(FaultOp::AllocDentry));
        assert!(injector.should_fault(FaultOp::AllocDentry));
        assert!(injector.should_fault(FaultOp::AllocDentry));
        // Max hits reached
        assert!(!injector.should_fault(FaultOp::AllocDentry));
        assert!(!injector.should_fault(FaultOp::AllocInode));
        assert_eq!(injector.injected(), 2);
    }

    #[test]
    fn disabled_policy_never_faults() {
        let injector = FaultInjector::with_policy(FaultPolicy {
            enabled: false,
            rules: vec![FaultRule::always(FaultOp::AllocChain)],
        });
        assert!(!injector.should_fault(FaultOp::AllocChain));
        assert!(!injector.summary().active);
    }
}
