//! Per-case call correlation state
//!
//! Two pieces of bookkeeping live here. The occurrence counters give the Nth
//! identical call to one dependency operation the index N, assigned strictly
//! in the order calls are entered, so replay returns the Nth recorded
//! response to the Nth call regardless of completion order. The depth guard
//! detects the same logical call being observed by more than one
//! instrumentation layer, so only the outermost observation triggers record
//! or replay side effects.

use crate::error::SequenceError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Key for one occurrence counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SequenceKey {
    service_key: String,
    operation_name: String,
}

/// Correlation state for a single case.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    depth: AtomicI64,
    counters: Mutex<HashMap<SequenceKey, u32>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register entry into a traced call and return the new depth.
    pub fn enter(&self) -> i64 {
        self.depth.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True only while the outermost traced call is the one in flight.
    /// Nested interception at depth > 1 must not trigger side effects.
    pub fn validate(&self) -> bool {
        self.depth.load(Ordering::SeqCst) == 1
    }

    /// Register exit from a traced call. Returns true only if the matching
    /// `enter` was the outermost one. Must be reachable on every path out of
    /// the wrapped call, including failures, so callers pair it through a drop
    /// guard. An exit with no outstanding enter is absorbed so depth never
    /// leaks into the next case.
    pub fn exit_and_validate(&self) -> bool {
        self.try_exit_and_validate().unwrap_or(false)
    }

    /// Checked exit for callers driving the tracker directly.
    pub fn try_exit_and_validate(&self) -> Result<bool, SequenceError> {
        let previous = self.depth.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            self.depth.fetch_add(1, Ordering::SeqCst);
            return Err(SequenceError::UnbalancedPairing {
                depth: previous - 1,
            });
        }
        Ok(previous == 1)
    }

    /// Current nesting depth.
    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Atomically read and post-increment the occurrence counter for a
    /// dependency operation. The first call observes 0.
    pub fn next_sequence(&self, service_key: &str, operation_name: &str) -> u32 {
        let key = SequenceKey {
            service_key: service_key.to_string(),
            operation_name: operation_name.to_string(),
        };
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(key).or_insert(0);
        let assigned = *counter;
        *counter += 1;
        assigned
    }

    /// Peek at the next sequence a key would be assigned, without consuming it.
    pub fn peek_sequence(&self, service_key: &str, operation_name: &str) -> u32 {
        let key = SequenceKey {
            service_key: service_key.to_string(),
            operation_name: operation_name.to_string(),
        };
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        counters.get(&key).copied().unwrap_or(0)
    }
}
