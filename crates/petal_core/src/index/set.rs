//! Set index: key to member slots.

use crate::index::{drain_older, IndexEntry};
use crate::types::SequenceNumber;
use std::collections::HashMap;

/// Maps each set key to its members. Set entries carry no value; the
/// member itself is the sub-key.
#[derive(Debug, Default)]
pub struct SetIndex {
    keys: HashMap<Vec<u8>, HashMap<Vec<u8>, IndexEntry>>,
}

impl SetIndex {
    /// Looks up one member.
    pub fn get(&self, key: &[u8], member: &[u8]) -> Option<&IndexEntry> {
        self.keys.get(key)?.get(member)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8], member: &[u8]) -> Option<&mut IndexEntry> {
        self.keys.get_mut(key)?.get_mut(member)
    }

    /// Membership probe.
    #[must_use]
    pub fn contains(&self, key: &[u8], member: &[u8]) -> bool {
        self.get(key, member).is_some()
    }

    /// Adds a member, returning the entry it replaces.
    pub fn insert(&mut self, key: &[u8], member: &[u8], entry: IndexEntry) -> Option<IndexEntry> {
        self.keys
            .entry(key.to_vec())
            .or_default()
            .insert(member.to_vec(), entry)
    }

    /// Removes a member; the key disappears with its last member.
    pub fn remove(&mut self, key: &[u8], member: &[u8]) -> Option<IndexEntry> {
        let members = self.keys.get_mut(key)?;
        let removed = members.remove(member);
        if members.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    pub(crate) fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        let Some(members) = self.keys.get_mut(key) else {
            return Vec::new();
        };
        let removed = drain_older(members, sequence, |e| e);
        if members.is_empty() {
            self.keys.remove(key);
        }
        removed.into_iter().map(|(_, e)| e).collect()
    }

    /// All members of a key.
    pub fn members(&self, key: &[u8]) -> impl Iterator<Item = &Vec<u8>> {
        self.keys.get(key).into_iter().flat_map(HashMap::keys)
    }

    /// Cardinality of a key.
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
