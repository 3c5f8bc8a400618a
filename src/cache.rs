//! Process-local memo of resolved keys.
//!
//! Entries live until explicitly evicted or cleared. A key, once persisted,
//! never changes for its record, so a cached entry can never go stale; the
//! only cost of an unbounded cache is memory. Evicted entries are refilled
//! from the key store on the next resolution.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::keys::{KeyMaterial, RecordId};

/// A thread-safe `record_id -> key_material` map.
#[derive(Default)]
pub struct KeyCache {
    entries: RwLock<HashMap<RecordId, KeyMaterial>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: &RecordId) -> Option<KeyMaterial> {
        self.entries.read().get(record_id).cloned()
    }

    /// Insert `key` unless an entry already exists, returning the entry
    /// that is cached afterwards.
    ///
    /// The first value cached for a record wins, so concurrent resolutions
    /// in one process always hand out the same key.
    pub fn insert_if_absent(&self, record_id: &RecordId, key: KeyMaterial) -> KeyMaterial {
        self.entries
            .write()
            .entry(record_id.clone())
            .or_insert(key)
            .clone()
    }

    /// Cache `key` for `record_id`, replacing any entry.
    ///
    /// Only for a key this process has just persisted: the store is
    /// authoritative over whatever was cached before.
    pub fn insert(&self, record_id: &RecordId, key: KeyMaterial) {
        self.entries.write().insert(record_id.clone(), key);
    }

    /// Drop one entry. Returns whether it was present.
    pub fn evict(&self, record_id: &RecordId) -> bool {
        self.entries.write().remove(record_id).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache").field("entries", &self.len()).finish()
    }
}
