//! Per-case state and its scope-keyed registry
//!
//! A `CaseContext` holds everything the engine tracks for one logical
//! request: identity, mode, the exclusion template, redirect correlation
//! state, and call-correlation counters. Exactly one context is active per
//! logical unit of execution; the `ContextRegistry` addresses contexts by an
//! explicit `ScopeId` handle threaded through adapter calls, never by
//! ambient thread identity.

use crate::error::DecisionError;
use crate::sequence::SequenceTracker;
use crate::types::{CaseMode, ScopeId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Service name → operations whose replayed results must not be trusted.
pub type ExcludeMockTemplate = HashMap<String, HashSet<String>>;

/// Parse the serialized exclusion template an entry header carries,
/// `{"service": ["operation", ...]}`.
pub fn parse_exclude_mock_template(raw: &str) -> Result<ExcludeMockTemplate, DecisionError> {
    serde_json::from_str(raw).map_err(|e| DecisionError::MalformedTemplate {
        reason: e.to_string(),
    })
}

/// State for one recorded or replayed request.
#[derive(Debug)]
pub struct CaseContext {
    case_id: String,
    mode: CaseMode,
    created_at: DateTime<Utc>,
    exclude_mock_template: Mutex<ExcludeMockTemplate>,
    redirect_referers: Mutex<HashSet<String>>,
    sequences: SequenceTracker,
    deferred: AtomicBool,
}

impl CaseContext {
    pub fn new(case_id: impl Into<String>, mode: CaseMode) -> Self {
        Self {
            case_id: case_id.into(),
            mode,
            created_at: Utc::now(),
            exclude_mock_template: Mutex::new(ExcludeMockTemplate::new()),
            redirect_referers: Mutex::new(HashSet::new()),
            sequences: SequenceTracker::new(),
            deferred: AtomicBool::new(false),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn mode(&self) -> CaseMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sequences(&self) -> &SequenceTracker {
        &self.sequences
    }

    /// Whether calls under this case trigger record or replay side effects.
    pub fn needs_record_or_replay(&self) -> bool {
        self.mode.is_live()
    }

    pub fn set_exclude_mock_template(&self, template: ExcludeMockTemplate) {
        *self
            .exclude_mock_template
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = template;
    }

    /// Whether a call's replayed result must be ignored in favor of the real
    /// outcome. This is a per-operation trust override, not a skip: the call
    /// still happens and recording bookkeeping proceeds.
    ///
    /// Missing data never ignores: `None` for either argument, an unknown
    /// service, or an operation outside the set all answer false.
    pub fn ignores_mock_result(
        &self,
        service_key: Option<&str>,
        operation_name: Option<&str>,
    ) -> bool {
        let (service_key, operation_name) = match (service_key, operation_name) {
            (Some(s), Some(o)) => (s, o),
            _ => return false,
        };
        let template = self
            .exclude_mock_template
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        template
            .get(service_key)
            .map_or(false, |operations| operations.contains(operation_name))
    }

    /// Register a referer that legitimately continues this case across an
    /// HTTP redirect. Adapters call this when the case's response issues a
    /// redirect.
    pub fn register_redirect_referer(&self, referer: impl Into<String>) {
        self.redirect_referers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(referer.into());
    }

    /// Whether an inbound referer was previously registered on this case.
    pub fn is_redirect_request(&self, referer: &str) -> bool {
        self.redirect_referers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(referer)
    }

    /// Flag that this case's completion was handed to an async continuation.
    pub fn mark_deferred(&self) {
        self.deferred.store(true, Ordering::SeqCst);
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::SeqCst)
    }

    /// Clear the deferred flag, returning whether it was set. The async
    /// completion hook uses this to finalize exactly once.
    pub fn take_deferred(&self) -> bool {
        self.deferred.swap(false, Ordering::SeqCst)
    }
}

/// Registry of active contexts, addressed by execution scope.
///
/// Also indexes by case id so a redirect continuation can find the case it
/// belongs to, and tracks a processed marker per scope to absorb duplicate
/// entry invocations (filter chains invoke the entry hook more than once per
/// request).
#[derive(Debug, Default)]
pub struct ContextRegistry {
    by_scope: Mutex<HashMap<ScopeId, Arc<CaseContext>>>,
    by_case: Mutex<HashMap<String, Arc<CaseContext>>>,
    processed: Mutex<HashSet<ScopeId>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a context to a scope, making it the active case for that scope.
    pub fn activate(&self, scope: ScopeId, context: Arc<CaseContext>) {
        self.by_case
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.case_id().to_string(), Arc::clone(&context));
        self.by_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope, context);
    }

    /// The active context for a scope, if any.
    pub fn current(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        self.by_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .cloned()
    }

    /// Look up a still-active case by id. Misses once the case completes;
    /// callers treat a miss as "evaluate fresh".
    pub fn record_context(&self, case_id: &str) -> Option<Arc<CaseContext>> {
        self.by_case
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(case_id)
            .cloned()
    }

    /// Unbind and return the scope's context. The case index entry is removed
    /// only when no other scope still references the case (redirect chains
    /// attach several scopes to one case).
    pub fn complete(&self, scope: ScopeId) -> Option<Arc<CaseContext>> {
        let context = self
            .by_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope)?;

        let still_referenced = self
            .by_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|c| c.case_id() == context.case_id());
        if !still_referenced {
            self.by_case
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(context.case_id());
        }
        Some(context)
    }

    /// Mark a scope's entry as processed. Returns true if it was already
    /// marked; the caller must then treat the invocation as a duplicate.
    pub fn mark_processed(&self, scope: ScopeId) -> bool {
        !self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope)
    }

    pub fn clear_processed(&self, scope: ScopeId) {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope);
    }

    pub fn active_count(&self) -> usize {
        self.by_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(service: &str, operations: &[&str]) -> ExcludeMockTemplate {
        let mut map = ExcludeMockTemplate::new();
        map.insert(
            service.to_string(),
            operations.iter().map(|s| s.to_string()).collect(),
        );
        map
    }

    #[test]
    fn template_parsing_accepts_the_header_shape() {
        let template = parse_exclude_mock_template(r#"{"svcA": ["op1", "op2"]}"#).unwrap();
        assert!(template.get("svcA").unwrap().contains("op1"));

        assert!(parse_exclude_mock_template("{broken").is_err());
        assert!(parse_exclude_mock_template(r#"["wrong-shape"]"#).is_err());
    }

    #[test]
    fn empty_template_ignores_nothing() {
        let context = CaseContext::new("case-1", CaseMode::Replay);
        assert!(!context.ignores_mock_result(Some("svcA"), Some("op1")));
        assert!(!context.ignores_mock_result(None, None));
    }

    #[test]
    fn template_matches_exact_service_and_operation() {
        let context = CaseContext::new("case-1", CaseMode::Replay);
        context.set_exclude_mock_template(template("svcA", &["op1"]));

        assert!(context.ignores_mock_result(Some("svcA"), Some("op1")));
        assert!(!context.ignores_mock_result(Some("svcA"), Some("op2")));
        assert!(!context.ignores_mock_result(Some("svcB"), Some("op1")));
        assert!(!context.ignores_mock_result(None, None));
        assert!(!context.ignores_mock_result(Some("svcA"), None));
    }

    #[test]
    fn empty_operation_set_ignores_nothing() {
        let context = CaseContext::new("case-1", CaseMode::Replay);
        context.set_exclude_mock_template(template("svcA", &[]));
        assert!(!context.ignores_mock_result(Some("svcA"), Some("op1")));
    }

    #[test]
    fn redirect_referers_register_and_match() {
        let context = CaseContext::new("case-1", CaseMode::Record);
        assert!(!context.is_redirect_request("https://app/checkout"));

        context.register_redirect_referer("https://app/checkout");
        assert!(context.is_redirect_request("https://app/checkout"));
        assert!(!context.is_redirect_request("https://evil/forged"));
    }

    #[test]
    fn deferred_flag_is_taken_once() {
        let context = CaseContext::new("case-1", CaseMode::Record);
        assert!(!context.is_deferred());
        context.mark_deferred();
        assert!(context.take_deferred());
        assert!(!context.take_deferred());
    }

    #[test]
    fn registry_binds_and_completes_by_scope() {
        let registry = ContextRegistry::new();
        let context = Arc::new(CaseContext::new("case-1", CaseMode::Record));

        registry.activate(ScopeId(7), Arc::clone(&context));
        assert_eq!(
            registry.current(ScopeId(7)).map(|c| c.case_id().to_string()),
            Some("case-1".to_string())
        );
        assert!(registry.record_context("case-1").is_some());

        let completed = registry.complete(ScopeId(7)).unwrap();
        assert_eq!(completed.case_id(), "case-1");
        assert!(registry.current(ScopeId(7)).is_none());
        assert!(registry.record_context("case-1").is_none());
    }

    #[test]
    fn case_index_survives_while_another_scope_is_attached() {
        let registry = ContextRegistry::new();
        let context = Arc::new(CaseContext::new("case-1", CaseMode::Record));

        registry.activate(ScopeId(1), Arc::clone(&context));
        registry.activate(ScopeId(2), Arc::clone(&context));

        registry.complete(ScopeId(1));
        assert!(registry.record_context("case-1").is_some());
        registry.complete(ScopeId(2));
        assert!(registry.record_context("case-1").is_none());
    }

    #[test]
    fn processed_marker_detects_duplicates() {
        let registry = ContextRegistry::new();
        assert!(!registry.mark_processed(ScopeId(1)));
        assert!(registry.mark_processed(ScopeId(1)));
        registry.clear_processed(ScopeId(1));
        assert!(!registry.mark_processed(ScopeId(1)));
    }
}
