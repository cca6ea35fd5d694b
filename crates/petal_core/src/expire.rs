//! Expiration side-table.
//!
//! TTLs are attached to keys after the fact, so they live apart from the
//! index, one table per data type. Expiry is lazy: every command checks the
//! table, nothing sweeps it.

use crate::index::Location;
use crate::types::SequenceNumber;
use std::collections::HashMap;

/// The TTL of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpireRecord {
    /// Deadline as unix milliseconds.
    pub expire_at: u64,
    /// Sequence of the entry that set the deadline.
    pub sequence: SequenceNumber,
    /// Location of the `Expire` entry that set it; `None` when the deadline
    /// rides on a string put.
    pub origin: Option<Location>,
    /// Set once the key's bytes have been counted as discarded after the
    /// deadline passed.
    pub accounted: bool,
}

impl ExpireRecord {
    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expire_at <= now_ms
    }
}

/// Expire records of one data type.
#[derive(Debug, Default)]
pub struct ExpireTable {
    records: HashMap<Vec<u8>, ExpireRecord>,
}

impl ExpireTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL of a key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&ExpireRecord> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8]) -> Option<&mut ExpireRecord> {
        self.records.get_mut(key)
    }

    /// Sets a key's TTL, returning the record it replaces.
    pub fn set(&mut self, key: &[u8], record: ExpireRecord) -> Option<ExpireRecord> {
        self.records.insert(key.to_vec(), record)
    }

    /// Drops a key's TTL.
    pub fn remove(&mut self, key: &[u8]) -> Option<ExpireRecord> {
        self.records.remove(key)
    }

    /// Returns true if the key has a deadline that has passed.
    #[must_use]
    pub fn is_expired(&self, key: &[u8], now_ms: u64) -> bool {
        self.records.get(key).is_some_and(|r| r.is_expired(now_ms))
    }

    /// Keys whose deadline has passed.
    #[must_use]
    pub fn expired_keys(&self, now_ms: u64) -> Vec<Vec<u8>> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Iterates all records.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ExpireRecord)> {
        self.records.iter()
    }

    /// Number of keys with a TTL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no key has a TTL.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
