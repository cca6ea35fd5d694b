//! List index: key to position-ordered elements.
//!
//! Each element is addressed by a signed position. Pushing to the right uses
//! one past the last position, pushing to the left one before the first, so
//! positions stay ordered without ever renumbering stored entries.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexEntry;
use crate::types::SequenceNumber;
use std::collections::{BTreeMap, HashMap};

/// Encodes an element position as an entry sub-key.
#[must_use]
pub fn encode_position(position: i64) -> [u8; 8] {
    position.to_be_bytes()
}

/// Decodes an element position from an entry sub-key.
pub fn decode_position(sub_key: &[u8]) -> CoreResult<i64> {
    let bytes: [u8; 8] = sub_key.try_into().map_err(|_| {
        CoreError::corrupt_record(format!("list position has {} bytes", sub_key.len()))
    })?;
    Ok(i64::from_be_bytes(bytes))
}

/// Maps each list key to its elements in order.
#[derive(Debug, Default)]
pub struct ListIndex {
    keys: HashMap<Vec<u8>, BTreeMap<i64, IndexEntry>>,
}

impl ListIndex {
    /// Looks up the element at a position.
    pub fn get(&self, key: &[u8], position: i64) -> Option<&IndexEntry> {
        self.keys.get(key)?.get(&position)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8], position: i64) -> Option<&mut IndexEntry> {
        self.keys.get_mut(key)?.get_mut(&position)
    }

    /// Installs an element, returning the entry it replaces.
    pub fn insert(&mut self, key: &[u8], position: i64, entry: IndexEntry) -> Option<IndexEntry> {
        self.keys
            .entry(key.to_vec())
            .or_default()
            .insert(position, entry)
    }

    /// Removes an element; the key disappears with its last element.
    pub fn remove(&mut self, key: &[u8], position: i64) -> Option<IndexEntry> {
        let elements = self.keys.get_mut(key)?;
        let removed = elements.remove(&position);
        if elements.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    pub(crate) fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        let Some(elements) = self.keys.get_mut(key) else {
            return Vec::new();
        };
        let stale: Vec<i64> = elements
            .iter()
            .filter(|(_, e)| e.sequence < sequence)
            .map(|(pos, _)| *pos)
            .collect();
        let removed = stale
            .into_iter()
            .filter_map(|pos| elements.remove(&pos))
            .collect();
        if elements.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    /// Leftmost element.
    pub fn first(&self, key: &[u8]) -> Option<(i64, &IndexEntry)> {
        self.keys
            .get(key)?
            .first_key_value()
            .map(|(pos, e)| (*pos, e))
    }

    /// Rightmost element.
    pub fn last(&self, key: &[u8]) -> Option<(i64, &IndexEntry)> {
        self.keys
            .get(key)?
            .last_key_value()
            .map(|(pos, e)| (*pos, e))
    }

    /// Position a left push would use.
    #[must_use]
    pub fn next_left(&self, key: &[u8]) -> i64 {
        self.first(key).map_or(0, |(pos, _)| pos - 1)
    }

    /// Position a right push would use.
    #[must_use]
    pub fn next_right(&self, key: &[u8]) -> i64 {
        self.last(key).map_or(0, |(pos, _)| pos + 1)
    }

    /// Elements `start..=stop` by rank.
    pub fn range(&self, key: &[u8], start: usize, stop: usize) -> Vec<(i64, &IndexEntry)> {
        self.keys
            .get(key)
            .into_iter()
            .flatten()
            .skip(start)
            .take(stop + 1 - start)
            .map(|(pos, e)| (*pos, e))
            .collect()
    }

    /// Element at a rank.
    pub fn nth(&self, key: &[u8], rank: usize) -> Option<(i64, &IndexEntry)> {
        self.keys
            .get(key)?
            .iter()
            .nth(rank)
            .map(|(pos, e)| (*pos, e))
    }

    /// Length of a list.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.keys.get(key).map_or(0, BTreeMap::len)
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
