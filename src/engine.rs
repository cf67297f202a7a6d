//! Record/replay/skip decisions and call correlation
//!
//! The `DecisionEngine` composes the rule matcher, the per-case sequence
//! state, the store client, and the configuration snapshot into the
//! per-call decision surface adapters consume. It runs synchronously on the
//! caller's thread, performs no hot-path I/O of its own, and never lets a
//! failure escape into the wrapped call.

use crate::codec::PayloadCodec;
use crate::config::SharedConfig;
use crate::context::{parse_exclude_mock_template, CaseContext, ContextRegistry, ExcludeMockTemplate};
use crate::error::DecisionError;
use crate::journal::{EngineJournal, JournalEntry, JournalEvent, JournalLevel};
use crate::record::{MockKey, MockRecord, Target};
use crate::store::{MockResult, MockStore};
use crate::types::{CallCategory, CaseMode, ScopeId, SkipReason};
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Static-asset URL fragments that are never worth recording.
const FILTERED_URL_SUFFIXES: [&str; 7] =
    [".js", ".css", ".png", ".woff", ".pdf", ".map", ".ico"];

/// Content types that are never worth recording.
const FILTERED_CONTENT_TYPES: [&str; 5] =
    ["/javascript", "image/", "/font", "/pdf", "/css"];

/// Entry-point metadata for one inbound request.
///
/// Adapters translate their transport's headers and parameters into this
/// shape; which header carries which field is the adapter's configuration
/// detail, not engine contract.
#[derive(Debug, Clone, Default)]
pub struct EntryRequest {
    /// Operation identifier (request URI, RPC method, topic).
    pub operation: String,
    pub content_type: Option<String>,
    /// Case id carried on a replay request's header.
    pub case_id: Option<String>,
    /// Case id carried as a request *parameter* by a redirect continuation.
    pub redirect_case_id: Option<String>,
    pub referer: Option<String>,
    pub force_record: bool,
    pub warm_up: bool,
    /// Serialized exclusion template, `{"service": ["operation", ...]}`.
    pub exclude_mock_template: Option<String>,
}

impl EntryRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_redirect(
        mut self,
        case_id: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        self.redirect_case_id = Some(case_id.into());
        self.referer = Some(referer.into());
        self
    }

    pub fn with_exclude_mock_template(mut self, template: impl Into<String>) -> Self {
        self.exclude_mock_template = Some(template.into());
        self
    }

    pub fn force_record(mut self) -> Self {
        self.force_record = true;
        self
    }

    pub fn warm_up(mut self) -> Self {
        self.warm_up = true;
        self
    }
}

/// Outcome of an entry-point decision.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// A fresh case was opened for this request.
    Started(Arc<CaseContext>),
    /// The request attached to an existing case via redirect correlation.
    Attached(Arc<CaseContext>),
    /// The request is left uninstrumented.
    Skipped(SkipReason),
}

impl EntryOutcome {
    pub fn context(&self) -> Option<&Arc<CaseContext>> {
        match self {
            EntryOutcome::Started(ctx) | EntryOutcome::Attached(ctx) => Some(ctx),
            EntryOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, EntryOutcome::Skipped(_))
    }
}

/// Handle for one observed dependency call.
///
/// Holds the enter/exit pairing open; dropping an unreleased token releases
/// the pairing, so depth never leaks when the wrapped call fails or is
/// cancelled. Only the outermost observation carries a sequence number.
#[derive(Debug)]
pub struct CallToken {
    context: Arc<CaseContext>,
    category: CallCategory,
    service_key: String,
    operation_name: String,
    sequence: Option<u32>,
    outermost: bool,
    released: bool,
}

impl CallToken {
    pub fn case_id(&self) -> &str {
        self.context.case_id()
    }

    pub fn context(&self) -> &Arc<CaseContext> {
        &self.context
    }

    pub fn category(&self) -> &CallCategory {
        &self.category
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    /// Whether this token is the outermost observation of its call.
    pub fn outermost(&self) -> bool {
        self.outermost
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.context.sequences().exit_and_validate()
    }
}

impl Drop for CallToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// Mints globally unique case ids: millisecond timestamp plus an entropy
/// suffix. Seedable so tests get reproducible ids.
#[derive(Debug)]
pub struct CaseIdSource {
    rng: Mutex<ChaCha8Rng>,
}

impl CaseIdSource {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn next_id(&self) -> String {
        let suffix: u64 = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen();
        format!("{:x}-{:016x}", Utc::now().timestamp_millis(), suffix)
    }
}

impl Default for CaseIdSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Memoizing map from a connection identity (a redis URL, a cluster address)
/// to a stable display name. Get-or-create is atomic: one key gets exactly
/// one name, no matter how many threads race the first lookup.
#[derive(Debug, Default)]
pub struct ServiceNameCache {
    names: Mutex<HashMap<String, String>>,
    next: AtomicU32,
}

impl ServiceNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection: &str) -> String {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(connection.to_string())
            .or_insert_with(|| format!("Cluster{}", self.next.fetch_add(1, Ordering::SeqCst) + 1))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The record/replay/skip decision surface.
pub struct DecisionEngine<C: PayloadCodec> {
    config: SharedConfig,
    store: Arc<dyn MockStore>,
    codec: C,
    contexts: ContextRegistry,
    journal: EngineJournal,
    service_names: ServiceNameCache,
    case_ids: CaseIdSource,
}

impl<C: PayloadCodec> std::fmt::Debug for DecisionEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine").finish_non_exhaustive()
    }
}

impl<C: PayloadCodec> DecisionEngine<C> {
    pub fn new(store: Arc<dyn MockStore>, codec: C) -> Self {
        Self {
            config: SharedConfig::default(),
            store,
            codec,
            contexts: ContextRegistry::new(),
            journal: EngineJournal::default(),
            service_names: ServiceNameCache::new(),
            case_ids: CaseIdSource::new(),
        }
    }

    pub fn builder() -> DecisionEngineBuilder<C> {
        DecisionEngineBuilder::new()
    }

    /// Shared configuration handle; the external configuration collaborator
    /// clones this and replaces snapshots wholesale.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn journal(&self) -> &EngineJournal {
        &self.journal
    }

    /// Stable display name for an external connection identity.
    pub fn service_name(&self, connection: &str) -> String {
        self.service_names.get(connection)
    }

    /// The active context for a scope, if any.
    pub fn current_context(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        self.contexts.current(scope)
    }

    /// Whether an inbound request should be left uninstrumented.
    pub fn should_skip(&self, entry: &EntryRequest) -> bool {
        self.skip_reason(entry).is_some()
    }

    fn skip_reason(&self, entry: &EntryRequest) -> Option<SkipReason> {
        let config = self.config.load();

        // Replay scene: the only gate is the global replay switch.
        if non_empty(&entry.case_id).is_some() {
            return config
                .replay_disabled()
                .then_some(SkipReason::ReplayDisabled);
        }

        if entry.warm_up {
            return Some(SkipReason::WarmUp);
        }

        let operation = entry.operation.as_str();
        if operation.is_empty() {
            return None;
        }

        // Explicit exclusion rules hold even under force-record.
        if config.exclusion_rules().matches(operation) {
            return Some(SkipReason::ExcludedOperation);
        }

        if entry.force_record {
            return None;
        }

        if FILTERED_URL_SUFFIXES.iter().any(|s| operation.contains(s)) {
            return Some(SkipReason::StaticAsset);
        }

        if let Some(content_type) = non_empty(&entry.content_type) {
            if FILTERED_CONTENT_TYPES.iter().any(|f| content_type.contains(f)) {
                return Some(SkipReason::FilteredContentType);
            }
        }

        if config.recording_suspended(operation) {
            return Some(SkipReason::RecordingSuspended);
        }

        None
    }

    /// Establish (or attach to) the case for an inbound request.
    ///
    /// Evaluation order: duplicate-invocation guard, skip filters, redirect
    /// correlation, then replay/record case creation. Never fails; every
    /// malformed input degrades to a skip or an empty template.
    pub fn handle_entry(&self, scope: ScopeId, entry: &EntryRequest) -> EntryOutcome {
        if self.contexts.mark_processed(scope) {
            return EntryOutcome::Skipped(SkipReason::AlreadyProcessed);
        }

        if let Some(reason) = self.skip_reason(entry) {
            self.journal.append(
                JournalEntry::new(
                    JournalLevel::Debug,
                    JournalEvent::EntrySkipped,
                    format!("{}: {}", reason, entry.operation),
                )
                .with_operation(entry.operation.clone()),
            );
            return EntryOutcome::Skipped(reason);
        }

        if let Some(context) = self.attach_redirect(scope, entry) {
            return EntryOutcome::Attached(context);
        }

        let (case_id, mode) = match non_empty(&entry.case_id) {
            Some(case_id) => (case_id.to_string(), CaseMode::Replay),
            None => (self.case_ids.next_id(), CaseMode::Record),
        };

        let context = Arc::new(CaseContext::new(case_id, mode));
        if let Some(template) = self.parse_template(entry, context.case_id()) {
            context.set_exclude_mock_template(template);
        }
        self.contexts.activate(scope, Arc::clone(&context));
        self.journal.append(
            JournalEntry::new(
                JournalLevel::Info,
                JournalEvent::CaseCreated,
                format!("case opened for {}", entry.operation),
            )
            .with_case(context.case_id())
            .with_operation(entry.operation.clone()),
        );
        EntryOutcome::Started(context)
    }

    /// Redirect correlation: a case-identifying parameter is honored only
    /// when the referer was previously registered on that case. An unmatched
    /// referer is treated as a potential case-id spoof and the parameter is
    /// ignored.
    fn attach_redirect(&self, scope: ScopeId, entry: &EntryRequest) -> Option<Arc<CaseContext>> {
        let case_id = non_empty(&entry.redirect_case_id)?;
        let referer = non_empty(&entry.referer)?;
        let context = self.contexts.record_context(case_id)?;
        if !context.is_redirect_request(referer) {
            return None;
        }
        self.contexts.activate(scope, Arc::clone(&context));
        self.journal.append(
            JournalEntry::new(
                JournalLevel::Info,
                JournalEvent::CaseAttached,
                format!("redirect continuation from {}", referer),
            )
            .with_case(context.case_id())
            .with_operation(entry.operation.clone()),
        );
        Some(context)
    }

    fn parse_template(&self, entry: &EntryRequest, case_id: &str) -> Option<ExcludeMockTemplate> {
        let raw = non_empty(&entry.exclude_mock_template)?;
        match parse_exclude_mock_template(raw) {
            Ok(template) => Some(template),
            Err(e) => {
                self.journal.append(
                    JournalEntry::new(
                        JournalLevel::Warn,
                        JournalEvent::TemplateParseFailed,
                        format!("exclusion template dropped: {}", e),
                    )
                    .with_case(case_id),
                );
                None
            }
        }
    }

    /// Register a referer on the scope's case so the follow-up request of an
    /// HTTP redirect can attach to it.
    pub fn register_redirect_referer(&self, scope: ScopeId, referer: impl Into<String>) {
        if let Some(context) = self.contexts.current(scope) {
            context.register_redirect_referer(referer);
        }
    }

    /// Flag the scope's case as completing through an async continuation.
    /// Returns false when the scope has no active case.
    pub fn mark_deferred(&self, scope: ScopeId) -> bool {
        match self.contexts.current(scope) {
            Some(context) => {
                context.mark_deferred();
                true
            }
            None => false,
        }
    }

    /// Close out a request's case on the synchronous path. Returns the
    /// completed context, or `None` when there is nothing to complete or
    /// completion was deferred to an async continuation.
    pub fn complete_entry(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        self.contexts.clear_processed(scope);
        let context = self.contexts.current(scope)?;
        if context.is_deferred() {
            return None;
        }
        self.finalize(scope)
    }

    /// Close out a deferred case from the async completion hook. Finalizes
    /// exactly once: a second invocation (or one racing the sync path) is a
    /// no-op.
    pub fn complete_deferred(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        let context = self.contexts.current(scope)?;
        if !context.take_deferred() {
            return None;
        }
        self.contexts.clear_processed(scope);
        self.finalize(scope)
    }

    fn finalize(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        let context = self.contexts.complete(scope)?;
        self.journal.append(
            JournalEntry::new(
                JournalLevel::Info,
                JournalEvent::CaseCompleted,
                "case completed",
            )
            .with_case(context.case_id()),
        );
        Some(context)
    }

    /// Open an observation of one outbound dependency call.
    ///
    /// Returns `None` when the scope has no live case; the adapter then
    /// leaves the call alone. The returned token performs enter + sequence
    /// assignment; it must be closed with `end_call` (dropping it releases
    /// the pairing without reporting outermost-ness).
    pub fn begin_call(
        &self,
        scope: ScopeId,
        category: CallCategory,
        service_key: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Option<CallToken> {
        self.try_begin_call(scope, category, service_key, operation_name)
            .ok()
    }

    /// Checked variant of `begin_call`, for adapters that report why a call
    /// was left alone.
    pub fn try_begin_call(
        &self,
        scope: ScopeId,
        category: CallCategory,
        service_key: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Result<CallToken, DecisionError> {
        let no_case = || DecisionError::NoActiveCase { scope: scope.0 };
        let context = self.contexts.current(scope).ok_or_else(no_case)?;
        if !context.needs_record_or_replay() {
            return Err(no_case());
        }
        let service_key = service_key.into();
        let operation_name = operation_name.into();
        let depth = context.sequences().enter();
        let outermost = depth == 1;
        let sequence =
            outermost.then(|| context.sequences().next_sequence(&service_key, &operation_name));
        Ok(CallToken {
            context,
            category,
            service_key,
            operation_name,
            sequence,
            outermost,
            released: false,
        })
    }

    /// Look up the stored outcome for this call.
    ///
    /// Only the outermost observation of a replay-mode call can substitute a
    /// stored response; everything else answers `Miss`. Store failures and
    /// bodies that cannot be deserialized to `T` are also misses; replay
    /// never hard-fails the caller.
    pub fn decide_replay<T: DeserializeOwned>(&self, token: &CallToken) -> MockResult<T> {
        if !token.outermost || token.context.mode() != CaseMode::Replay {
            return MockResult::Miss;
        }
        let sequence = match token.sequence {
            Some(sequence) => sequence,
            None => return MockResult::Miss,
        };

        let key = MockKey::new(
            token.case_id(),
            token.category.clone(),
            &token.service_key,
            &token.operation_name,
            sequence,
        );
        let record = match self.store.get(&key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.journal.append(
                    JournalEntry::new(JournalLevel::Debug, JournalEvent::ReplayMiss, "no record")
                        .with_case(token.case_id())
                        .with_operation(token.operation_name.clone()),
                );
                return MockResult::Miss;
            }
            Err(e) => {
                self.journal.append(
                    JournalEntry::new(
                        JournalLevel::Warn,
                        JournalEvent::StoreReadFailed,
                        e.to_string(),
                    )
                    .with_case(token.case_id())
                    .with_operation(token.operation_name.clone()),
                );
                return MockResult::Miss;
            }
        };

        if token
            .context
            .ignores_mock_result(Some(&token.service_key), Some(&token.operation_name))
        {
            self.journal.append(
                JournalEntry::new(
                    JournalLevel::Debug,
                    JournalEvent::ReplayUntrusted,
                    "excluded by template",
                )
                .with_case(token.case_id())
                .with_operation(token.operation_name.clone()),
            );
            return MockResult::Untrusted;
        }

        if !record.target_response.has_body() {
            return MockResult::Miss;
        }
        match self.codec.deserialize::<T>(&record.target_response.body) {
            Ok(value) => MockResult::Found(value),
            Err(e) => {
                self.journal.append(
                    JournalEntry::new(
                        JournalLevel::Warn,
                        JournalEvent::ReplayTypeMismatch,
                        e.to_string(),
                    )
                    .with_case(token.case_id())
                    .with_operation(token.operation_name.clone()),
                );
                MockResult::Miss
            }
        }
    }

    /// Persist the outcome of a recorded call. Fire-and-forget: persistence
    /// failure is journaled, never surfaced. Only the outermost observation
    /// of a record-mode call writes.
    pub fn record_outcome(&self, token: &CallToken, request: Target, response: Target) {
        if !token.outermost || token.context.mode() != CaseMode::Record {
            return;
        }
        let sequence = match token.sequence {
            Some(sequence) => sequence,
            None => return,
        };

        let record = MockRecord::new(
            token.category.clone(),
            &token.service_key,
            &token.operation_name,
            sequence,
        )
        .with_request(request)
        .with_response(response);
        let key = record.key(token.case_id());

        if let Err(e) = self.store.put(key, record) {
            self.journal.append(
                JournalEntry::new(
                    JournalLevel::Warn,
                    JournalEvent::StoreWriteFailed,
                    e.to_string(),
                )
                .with_case(token.case_id())
                .with_operation(token.operation_name.clone()),
            );
        }
    }

    /// Close an observation. Returns whether this call was the outermost
    /// pairing, for adapters that must avoid double side effects.
    pub fn end_call(&self, mut token: CallToken) -> bool {
        token.release()
    }
}

/// Builder for decision engines.
pub struct DecisionEngineBuilder<C: PayloadCodec> {
    store: Option<Arc<dyn MockStore>>,
    codec: Option<C>,
    config: Option<SharedConfig>,
    journal: Option<EngineJournal>,
    case_ids: Option<CaseIdSource>,
}

impl<C: PayloadCodec> DecisionEngineBuilder<C> {
    pub fn new() -> Self {
        Self {
            store: None,
            codec: None,
            config: None,
            journal: None,
            case_ids: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MockStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_codec(mut self, codec: C) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_config(mut self, config: SharedConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_journal(mut self, journal: EngineJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_case_ids(mut self, case_ids: CaseIdSource) -> Self {
        self.case_ids = Some(case_ids);
        self
    }

    pub fn build(self) -> Result<DecisionEngine<C>, String> {
        let store = self.store.ok_or("Mock store is required")?;
        let codec = self.codec.ok_or("Payload codec is required")?;

        Ok(DecisionEngine {
            config: self.config.unwrap_or_default(),
            store,
            codec,
            contexts: ContextRegistry::new(),
            journal: self.journal.unwrap_or_default(),
            service_names: ServiceNameCache::new(),
            case_ids: self.case_ids.unwrap_or_default(),
        })
    }
}

impl<C: PayloadCodec> Default for DecisionEngineBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::config::EngineConfig;
    use crate::store::InMemoryMockStore;
    use std::collections::HashSet;
    use std::thread;

    fn engine_with_config(config: EngineConfig) -> DecisionEngine<JsonCodec> {
        DecisionEngine::builder()
            .with_store(Arc::new(InMemoryMockStore::new()))
            .with_codec(JsonCodec::new())
            .with_config(SharedConfig::new(config))
            .with_case_ids(CaseIdSource::seeded(7))
            .build()
            .unwrap()
    }

    fn default_engine() -> DecisionEngine<JsonCodec> {
        engine_with_config(EngineConfig::builder("test-service").build())
    }

    #[test]
    fn builder_requires_store_and_codec() {
        let result = DecisionEngine::<JsonCodec>::builder().build();
        assert!(result.is_err());

        let result = DecisionEngine::<JsonCodec>::builder()
            .with_store(Arc::new(InMemoryMockStore::new()))
            .build();
        assert!(result.unwrap_err().contains("codec"));
    }

    #[test]
    fn replay_scene_skips_only_when_replay_disabled() {
        let engine = default_engine();
        let entry = EntryRequest::new("/orders").with_case_id("case-1");
        assert!(!engine.should_skip(&entry));

        let engine = engine_with_config(
            EngineConfig::builder("svc").disable_replay(true).build(),
        );
        assert!(engine.should_skip(&entry));
    }

    #[test]
    fn warm_up_always_skips() {
        let engine = default_engine();
        assert!(engine.should_skip(&EntryRequest::new("/orders").warm_up()));
        assert!(engine.should_skip(&EntryRequest::new("/orders").warm_up().force_record()));
    }

    #[test]
    fn empty_operation_does_not_skip() {
        let engine = default_engine();
        assert!(!engine.should_skip(&EntryRequest::new("")));
    }

    #[test]
    fn static_assets_and_content_types_skip() {
        let engine = default_engine();
        assert!(engine.should_skip(&EntryRequest::new("/static/app.js")));
        assert!(engine.should_skip(&EntryRequest::new("/favicon.ico")));
        assert!(engine.should_skip(
            &EntryRequest::new("/orders").with_content_type("text/css")
        ));
        assert!(!engine.should_skip(
            &EntryRequest::new("/orders").with_content_type("application/json")
        ));
    }

    #[test]
    fn force_record_overrides_static_filters_but_not_exclusions() {
        let engine = engine_with_config(
            EngineConfig::builder("svc")
                .exclude_operations(["/internal/*"])
                .build(),
        );

        assert!(!engine.should_skip(&EntryRequest::new("/static/app.js").force_record()));
        assert!(engine.should_skip(&EntryRequest::new("/internal/debug").force_record()));
    }

    #[test]
    fn force_record_overrides_recording_suspension() {
        let engine = engine_with_config(
            EngineConfig::builder("svc").suspend_recording(true).build(),
        );
        assert!(engine.should_skip(&EntryRequest::new("/orders")));
        assert!(!engine.should_skip(&EntryRequest::new("/orders").force_record()));
    }

    #[test]
    fn duplicate_entry_is_absorbed() {
        let engine = default_engine();
        let entry = EntryRequest::new("/orders");

        let first = engine.handle_entry(ScopeId(1), &entry);
        assert!(!first.is_skipped());

        let second = engine.handle_entry(ScopeId(1), &entry);
        match second {
            EntryOutcome::Skipped(SkipReason::AlreadyProcessed) => {}
            other => panic!("expected AlreadyProcessed, got {:?}", other),
        }

        // Completion clears the marker for the scope's next request.
        engine.complete_entry(ScopeId(1));
        assert!(!engine.handle_entry(ScopeId(1), &entry).is_skipped());
    }

    #[test]
    fn record_entry_mints_unique_case_ids() {
        let engine = default_engine();
        let a = engine.handle_entry(ScopeId(1), &EntryRequest::new("/orders"));
        let b = engine.handle_entry(ScopeId(2), &EntryRequest::new("/orders"));

        let a_id = a.context().unwrap().case_id().to_string();
        let b_id = b.context().unwrap().case_id().to_string();
        assert_ne!(a_id, b_id);
        assert_eq!(a.context().unwrap().mode(), CaseMode::Record);
    }

    #[test]
    fn seeded_id_sources_agree() {
        let a = CaseIdSource::seeded(42);
        let b = CaseIdSource::seeded(42);
        // Timestamp prefix differs, entropy suffix must not.
        let suffix = |id: String| id.split('-').last().unwrap().to_string();
        assert_eq!(suffix(a.next_id()), suffix(b.next_id()));
    }

    #[test]
    fn malformed_template_degrades_to_empty() {
        let engine = default_engine();
        let entry = EntryRequest::new("/orders")
            .with_case_id("case-1")
            .with_exclude_mock_template("{not json");

        let outcome = engine.handle_entry(ScopeId(1), &entry);
        let context = outcome.context().unwrap();
        assert!(!context.ignores_mock_result(Some("svc"), Some("op")));
        assert_eq!(
            engine
                .journal()
                .entries_for_event(JournalEvent::TemplateParseFailed)
                .len(),
            1
        );
    }

    #[test]
    fn well_formed_template_is_applied() {
        let engine = default_engine();
        let entry = EntryRequest::new("/orders")
            .with_case_id("case-1")
            .with_exclude_mock_template(r#"{"svcA": ["op1"]}"#);

        let outcome = engine.handle_entry(ScopeId(1), &entry);
        let context = outcome.context().unwrap();
        assert!(context.ignores_mock_result(Some("svcA"), Some("op1")));
        assert!(!context.ignores_mock_result(Some("svcA"), Some("op2")));
    }

    #[test]
    fn dropping_a_token_restores_depth() {
        let engine = default_engine();
        engine.handle_entry(ScopeId(1), &EntryRequest::new("/orders"));

        {
            let token = engine
                .begin_call(ScopeId(1), CallCategory::Redis, "Cluster1", "GET")
                .unwrap();
            assert!(token.outermost());
            // Dropped without end_call, as after a panic in the wrapped call.
        }

        let context = engine.current_context(ScopeId(1)).unwrap();
        assert_eq!(context.sequences().depth(), 0);
    }

    #[test]
    fn begin_call_without_a_case_is_none() {
        let engine = default_engine();
        assert!(engine
            .begin_call(ScopeId(9), CallCategory::Redis, "Cluster1", "GET")
            .is_none());

        let err = engine
            .try_begin_call(ScopeId(9), CallCategory::Redis, "Cluster1", "GET")
            .unwrap_err();
        assert!(matches!(err, DecisionError::NoActiveCase { scope: 9 }));
    }

    #[test]
    fn service_name_cache_assigns_one_name_per_connection() {
        let cache = Arc::new(ServiceNameCache::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("redis://10.0.0.1:6379"))
            })
            .collect();

        let names: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(names.len(), 1);
        assert_eq!(cache.len(), 1);

        let second = cache.get("redis://10.0.0.2:6379");
        assert!(!names.contains(&second));
    }
}
