//! Record-and-replay interception engine for outbound dependency calls
//!
//! During a record run, every outbound call an application makes to an
//! external dependency is captured alongside the real response; during a
//! replay run, previously captured responses are substituted instead of
//! invoking the real dependency. This crate is the decision-and-correlation
//! core: per logical request it decides whether to record, replay, or ignore
//! a call, and correlates repeated or nested calls to the right stored
//! instance so replay ordering is deterministic under concurrency.
//!
//! Interception plumbing, per-protocol adapters, the configuration source,
//! and the store transport are external collaborators speaking the contracts
//! defined here.

pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod journal;
pub mod record;
pub mod rules;
pub mod sequence;
pub mod store;
pub mod types;

// Re-export core types and traits
pub use codec::{BincodeCodec, JsonCodec, PayloadCodec};
pub use config::{EngineConfig, EngineConfigBuilder, SharedConfig};
pub use context::{
    parse_exclude_mock_template, CaseContext, ContextRegistry, ExcludeMockTemplate,
};
pub use engine::{
    CallToken, CaseIdSource, DecisionEngine, DecisionEngineBuilder, EntryOutcome, EntryRequest,
    ServiceNameCache,
};
pub use error::{CodecError, DecisionError, EngineError, SequenceError, StoreError};
pub use journal::{EngineJournal, JournalEntry, JournalEvent, JournalLevel};
pub use record::{MockKey, MockRecord, Target};
pub use rules::{ExclusionPattern, ExclusionRules};
pub use sequence::SequenceTracker;
pub use store::{InMemoryMockStore, MockResult, MockStore};
pub use types::{CallCategory, CaseMode, RecordDigest, ScopeId, SkipReason};
