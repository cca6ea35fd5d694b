//! String index: one slot per key.

use crate::index::IndexEntry;
use crate::types::SequenceNumber;
use std::collections::HashMap;

/// Maps each string key to its current entry.
#[derive(Debug, Default)]
pub struct StringIndex {
    entries: HashMap<Vec<u8>, IndexEntry>,
}

impl StringIndex {
    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8]) -> Option<&mut IndexEntry> {
        self.entries.get_mut(key)
    }

    /// Installs an entry, returning the one it replaces.
    pub fn insert(&mut self, key: &[u8], entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(key.to_vec(), entry)
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.sequence < sequence => self.entries.remove(key).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }
}
