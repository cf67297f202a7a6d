//! Engine diagnostics journal
//!
//! The engine never fails the wrapped call and never logs through global
//! state; instead it appends structured entries here and the embedder drains
//! them into whatever logging pipeline it runs. Appending is side-effect free
//! from the application's perspective.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalLevel {
    Debug,
    Info,
    Warn,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    EntrySkipped,
    CaseCreated,
    CaseAttached,
    CaseCompleted,
    ReplayMiss,
    ReplayUntrusted,
    ReplayTypeMismatch,
    StoreWriteFailed,
    StoreReadFailed,
    TemplateParseFailed,
}

/// One structured journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub level: JournalLevel,
    pub timestamp: DateTime<Utc>,
    pub event: JournalEvent,
    pub case_id: Option<String>,
    pub operation: Option<String>,
    pub message: String,
}

impl JournalEntry {
    pub fn new(level: JournalLevel, event: JournalEvent, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            event,
            case_id: None,
            operation: None,
            message: message.into(),
        }
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Append-only journal with a minimum level.
#[derive(Debug)]
pub struct EngineJournal {
    entries: Mutex<Vec<JournalEntry>>,
    min_level: JournalLevel,
}

impl EngineJournal {
    pub fn new(min_level: JournalLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_level,
        }
    }

    /// A journal that records everything.
    pub fn all() -> Self {
        Self::new(JournalLevel::Debug)
    }

    pub fn append(&self, entry: JournalEntry) {
        if (entry.level as u8) < (self.min_level as u8) {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn debug(&self, event: JournalEvent, message: impl Into<String>) {
        self.append(JournalEntry::new(JournalLevel::Debug, event, message));
    }

    pub fn info(&self, event: JournalEvent, message: impl Into<String>) {
        self.append(JournalEntry::new(JournalLevel::Info, event, message));
    }

    pub fn warn(&self, event: JournalEvent, message: impl Into<String>) {
        self.append(JournalEntry::new(JournalLevel::Warn, event, message));
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all entries.
    pub fn drain(&self) -> Vec<JournalEntry> {
        std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries_for_event(&self, event: JournalEvent) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn entries_for_case(&self, case_id: &str) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.case_id.as_deref() == Some(case_id))
            .cloned()
            .collect()
    }
}

impl Default for EngineJournal {
    fn default() -> Self {
        Self::new(JournalLevel::Info)
    }
}
