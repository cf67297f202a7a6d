//! Error types for the record-and-replay engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failures while deciding whether to intercept a call.
///
/// These are inputs to policy, not faults: every decision error degrades to
/// "do not intercept" and is never propagated into the wrapped call.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Malformed exclusion template: {reason}")]
    MalformedTemplate { reason: String },

    #[error("No active case for scope {scope}")]
    NoActiveCase { scope: u64 },

    #[error("Entry already processed for scope {scope}")]
    AlreadyProcessed { scope: u64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Store read failed: {reason}")]
    ReadFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Unbalanced call pairing: depth {depth}")]
    UnbalancedPairing { depth: i64 },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}
