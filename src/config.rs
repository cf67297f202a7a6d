//! Engine configuration
//!
//! Configuration is read-mostly and shared across all cases. The external
//! configuration collaborator replaces the snapshot wholesale; readers clone
//! an `Arc` and evaluate against an immutable view, so a case never sees a
//! half-updated rule set.

use crate::rules::ExclusionRules;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    service_name: String,
    exclusion_rules: ExclusionRules,
    replay_disabled: bool,
    recording_suspended: bool,
    /// Operations whose recordings were judged invalid upstream; entry skips
    /// them until the configuration source clears the set.
    suspended_operations: HashSet<String>,
}

impl EngineConfig {
    pub fn builder(service_name: impl Into<String>) -> EngineConfigBuilder {
        EngineConfigBuilder::new(service_name)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn exclusion_rules(&self) -> &ExclusionRules {
        &self.exclusion_rules
    }

    pub fn replay_disabled(&self) -> bool {
        self.replay_disabled
    }

    /// Whether recording the given operation is currently not permitted.
    pub fn recording_suspended(&self, operation: &str) -> bool {
        self.recording_suspended || self.suspended_operations.contains(operation)
    }
}

/// Builder for configuration snapshots.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            config: EngineConfig {
                service_name: service_name.into(),
                ..EngineConfig::default()
            },
        }
    }

    /// Set the exclusion rules from raw pattern strings.
    pub fn exclude_operations<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.exclusion_rules = ExclusionRules::from_patterns(patterns);
        self
    }

    pub fn disable_replay(mut self, disabled: bool) -> Self {
        self.config.replay_disabled = disabled;
        self
    }

    /// Pause all recording, regardless of operation.
    pub fn suspend_recording(mut self, suspended: bool) -> Self {
        self.config.recording_suspended = suspended;
        self
    }

    pub fn suspend_operation(mut self, operation: impl Into<String>) -> Self {
        self.config.suspended_operations.insert(operation.into());
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Shared handle to the current snapshot.
///
/// Clones share one slot; `replace` swaps the snapshot wholesale and in-flight
/// readers keep the `Arc` they already loaded.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<EngineConfig>>>,
}

impl SharedConfig {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<EngineConfig> {
        Arc::clone(
            &self
                .inner
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, config: EngineConfig) {
        *self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}
