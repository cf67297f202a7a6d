//! Core data types shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of dependency a call goes out to.
///
/// Adapters for dependency kinds not covered by the built-in variants use
/// `Custom` with a stable label of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallCategory {
    HttpRequest,
    Rpc,
    Redis,
    MessageQueue,
    DatabaseQuery,
    Custom(String),
}

impl CallCategory {
    /// Stable label used in store keys and diagnostics.
    pub fn label(&self) -> &str {
        match self {
            CallCategory::HttpRequest => "http-request",
            CallCategory::Rpc => "rpc",
            CallCategory::Redis => "redis",
            CallCategory::MessageQueue => "message-queue",
            CallCategory::DatabaseQuery => "database-query",
            CallCategory::Custom(label) => label,
        }
    }
}

impl fmt::Display for CallCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mode a case runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseMode {
    /// No interception; calls pass through untouched.
    None,
    /// Real calls happen and their outcomes are persisted.
    Record,
    /// Persisted outcomes substitute for real calls.
    Replay,
    /// Traffic is observed but never recorded (cache-priming runs).
    WarmUp,
}

impl CaseMode {
    /// Whether calls under this mode trigger record or replay side effects.
    pub fn is_live(self) -> bool {
        matches!(self, CaseMode::Record | CaseMode::Replay)
    }
}

/// Handle addressing one logical unit of execution (a request, a task).
///
/// The embedder allocates these and threads them through adapter calls in
/// place of ambient thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Content digest of a mock record key, for stores keyed by a flat string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordDigest(pub [u8; 32]);

impl fmt::Display for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Why an inbound request was left uninstrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Replay is globally disabled and the request carried a case id.
    ReplayDisabled,
    /// Warm-up traffic never pollutes recordings.
    WarmUp,
    /// The operation matched an exclusion rule.
    ExcludedOperation,
    /// Static-asset URL suffix (scripts, images, fonts).
    StaticAsset,
    /// Filtered content type.
    FilteredContentType,
    /// Recording for this operation is currently not permitted.
    RecordingSuspended,
    /// The entry was already processed for this scope.
    AlreadyProcessed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::ReplayDisabled => "replay disabled",
            SkipReason::WarmUp => "warm-up traffic",
            SkipReason::ExcludedOperation => "excluded operation",
            SkipReason::StaticAsset => "static asset",
            SkipReason::FilteredContentType => "filtered content type",
            SkipReason::RecordingSuspended => "recording suspended",
            SkipReason::AlreadyProcessed => "already processed",
        };
        f.write_str(text)
    }
}
