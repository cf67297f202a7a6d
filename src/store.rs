//! Mock store client contract and replay results
//!
//! The persistent store is an external collaborator; this module defines the
//! protocol the engine speaks against it and an in-memory implementation used
//! by tests and single-process embedders.

use crate::error::StoreError;
use crate::record::{MockKey, MockRecord};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Client contract against the mock store.
///
/// `put` is an idempotent upsert by key. `get` returning `None` is not an
/// error; it signals a replay miss and the caller decides policy.
pub trait MockStore: Send + Sync {
    fn put(&self, key: MockKey, record: MockRecord) -> Result<(), StoreError>;

    fn get(&self, key: &MockKey) -> Result<Option<MockRecord>, StoreError>;
}

/// Tri-state outcome of a replay lookup.
///
/// Only `Found` suppresses the real dependency call. `Untrusted` means a
/// record exists but the case's exclusion template says the real outcome must
/// be used; other bookkeeping still proceeds. `Miss` covers absence, empty
/// bodies, and bodies that failed to deserialize to the declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResult<T> {
    Found(T),
    Untrusted,
    Miss,
}

impl<T> MockResult<T> {
    /// Whether the caller should suppress the real dependency call.
    pub fn suppresses_real_call(&self) -> bool {
        matches!(self, MockResult::Found(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, MockResult::Miss)
    }

    pub fn is_untrusted(&self) -> bool {
        matches!(self, MockResult::Untrusted)
    }

    pub fn into_found(self) -> Option<T> {
        match self {
            MockResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> MockResult<U> {
        match self {
            MockResult::Found(value) => MockResult::Found(f(value)),
            MockResult::Untrusted => MockResult::Untrusted,
            MockResult::Miss => MockResult::Miss,
        }
    }
}

/// In-memory store keyed by `MockKey`.
#[derive(Debug, Default)]
pub struct InMemoryMockStore {
    records: Mutex<HashMap<MockKey, MockRecord>>,
}

impl InMemoryMockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl MockStore for InMemoryMockStore {
    fn put(&self, key: MockKey, record: MockRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record);
        Ok(())
    }

    fn get(&self, key: &MockKey) -> Result<Option<MockRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Target;
    use crate::types::CallCategory;

    fn sample_record(sequence: u32) -> MockRecord {
        MockRecord::new(CallCategory::Redis, "Cluster1", "GET", sequence)
            .with_response(Target::new(b"\"cached\"".to_vec(), "String"))
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryMockStore::new();
        let record = sample_record(0);
        let key = record.key("case-1");

        store.put(key.clone(), record.clone()).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(record));
    }

    #[test]
    fn get_of_absent_key_is_none_not_error() {
        let store = InMemoryMockStore::new();
        let key = MockKey::new("case-1", CallCategory::Redis, "Cluster1", "GET", 0);
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn put_is_an_upsert() {
        let store = InMemoryMockStore::new();
        let key = sample_record(0).key("case-1");

        store.put(key.clone(), sample_record(0)).unwrap();
        let replacement = MockRecord::new(CallCategory::Redis, "Cluster1", "GET", 0)
            .with_response(Target::new(b"\"fresh\"".to_vec(), "String"));
        store.put(key.clone(), replacement.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap(), Some(replacement));
    }

    #[test]
    fn sequences_key_distinct_records() {
        let store = InMemoryMockStore::new();
        store.put(sample_record(0).key("case-1"), sample_record(0)).unwrap();
        store.put(sample_record(1).key("case-1"), sample_record(1)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn only_found_suppresses_the_real_call() {
        assert!(MockResult::Found(1).suppresses_real_call());
        assert!(!MockResult::<i32>::Untrusted.suppresses_real_call());
        assert!(!MockResult::<i32>::Miss.suppresses_real_call());
    }

    #[test]
    fn mock_result_adapters() {
        assert_eq!(MockResult::Found(2).map(|v| v * 2), MockResult::Found(4));
        assert_eq!(MockResult::Found(2).into_found(), Some(2));
        assert_eq!(MockResult::<i32>::Miss.into_found(), None);
        assert!(MockResult::<i32>::Untrusted.is_untrusted());
        assert!(MockResult::<i32>::Miss.is_miss());
    }
}
