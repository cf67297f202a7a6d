//! Canonical mock record model
//!
//! One `MockRecord` captures one dependency call's request and response for
//! storage and lookup. Records are constructed fresh per call by the calling
//! adapter, handed to the store client, and discarded after transmission.

use crate::types::{CallCategory, RecordDigest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One side of a call: a serialized payload plus its declared type and
/// adapter-specific attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub body: Vec<u8>,
    pub type_name: String,
    pub attributes: HashMap<String, String>,
}

impl Target {
    pub fn new(body: Vec<u8>, type_name: impl Into<String>) -> Self {
        Self {
            body,
            type_name: type_name.into(),
            attributes: HashMap::new(),
        }
    }

    /// An empty target, used for request templates during replay lookup.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

/// The canonical persisted unit describing one dependency call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRecord {
    pub category: CallCategory,
    pub service_key: String,
    pub operation_name: String,
    /// Occurrence index of this call within its case.
    pub sequence: u32,
    pub creation_time: DateTime<Utc>,
    pub target_request: Target,
    pub target_response: Target,
}

impl MockRecord {
    pub fn new(
        category: CallCategory,
        service_key: impl Into<String>,
        operation_name: impl Into<String>,
        sequence: u32,
    ) -> Self {
        Self {
            category,
            service_key: service_key.into(),
            operation_name: operation_name.into(),
            sequence,
            creation_time: Utc::now(),
            target_request: Target::empty(),
            target_response: Target::empty(),
        }
    }

    pub fn with_request(mut self, request: Target) -> Self {
        self.target_request = request;
        self
    }

    pub fn with_response(mut self, response: Target) -> Self {
        self.target_response = response;
        self
    }

    /// The store key identifying this record within a case.
    pub fn key(&self, case_id: impl Into<String>) -> MockKey {
        MockKey {
            case_id: case_id.into(),
            category: self.category.clone(),
            service_key: self.service_key.clone(),
            operation_name: self.operation_name.clone(),
            sequence: self.sequence,
        }
    }
}

/// Unique identity of one stored record.
///
/// Recording is an idempotent upsert by this key; replay lookup is a get by
/// this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MockKey {
    pub case_id: String,
    pub category: CallCategory,
    pub service_key: String,
    pub operation_name: String,
    pub sequence: u32,
}

impl MockKey {
    pub fn new(
        case_id: impl Into<String>,
        category: CallCategory,
        service_key: impl Into<String>,
        operation_name: impl Into<String>,
        sequence: u32,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            category,
            service_key: service_key.into(),
            operation_name: operation_name.into(),
            sequence,
        }
    }

    /// Stable content digest of the key, for stores that key by a flat
    /// string rather than a structured tuple.
    pub fn digest(&self) -> RecordDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.case_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.category.label().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.service_key.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.operation_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.sequence.to_le_bytes());
        RecordDigest(*hasher.finalize().as_bytes())
    }
}
