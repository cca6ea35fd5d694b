//! Hash index: key to field map.

use crate::index::{drain_older, IndexEntry};
use crate::types::SequenceNumber;
use std::collections::HashMap;

/// Maps each hash key to its fields.
#[derive(Debug, Default)]
pub struct HashIndex {
    keys: HashMap<Vec<u8>, HashMap<Vec<u8>, IndexEntry>>,
}

impl HashIndex {
    /// Looks up one field.
    pub fn get(&self, key: &[u8], field: &[u8]) -> Option<&IndexEntry> {
        self.keys.get(key)?.get(field)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8], field: &[u8]) -> Option<&mut IndexEntry> {
        self.keys.get_mut(key)?.get_mut(field)
    }

    /// Installs a field, returning the entry it replaces.
    pub fn insert(&mut self, key: &[u8], field: &[u8], entry: IndexEntry) -> Option<IndexEntry> {
        self.keys
            .entry(key.to_vec())
            .or_default()
            .insert(field.to_vec(), entry)
    }

    /// Removes one field; the key disappears with its last field.
    pub fn remove(&mut self, key: &[u8], field: &[u8]) -> Option<IndexEntry> {
        let fields = self.keys.get_mut(key)?;
        let removed = fields.remove(field);
        if fields.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    pub(crate) fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        let Some(fields) = self.keys.get_mut(key) else {
            return Vec::new();
        };
        let removed = drain_older(fields, sequence, |e| e);
        if fields.is_empty() {
            self.keys.remove(key);
        }
        removed.into_iter().map(|(_, e)| e).collect()
    }

    /// All fields of a key.
    pub fn fields(&self, key: &[u8]) -> impl Iterator<Item = (&Vec<u8>, &IndexEntry)> {
        self.keys.get(key).into_iter().flatten()
    }

    /// Number of fields of a key.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.keys.get(key).map_or(0, HashMap::len)
    }

    /// Number of keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn keys(&self) -> Vec<Vec<u8>> {
        self.keys.keys().cloned().collect()
    }
}
