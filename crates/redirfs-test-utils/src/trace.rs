// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Ordered record of invocations, shared between callbacks and the test

use std::sync::{Arc, Mutex};

/// Cheap to clone; all clones append to the same trace.
#[derive(Clone, Debug, Default)]
pub struct TraceRecorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Return the trace recorded so far and start a new one.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_trace() {
        let trace = TraceRecorder::new();
        let other = trace.clone();
        trace.record("a.pre");
        other.record("original");
        trace.record("a.post");
        assert_eq!(trace.events(), vec!["a.pre", "original", "a.post"]);
        assert_eq!(other.count("original"), 1);
        assert_eq!(trace.take().len(), 3);
        assert!(other.is_empty());
    }
}
