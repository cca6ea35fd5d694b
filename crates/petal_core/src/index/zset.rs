//! Sorted-set index: members with scores, ordered by `(score, member)`.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexEntry;
use crate::types::SequenceNumber;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Encodes a score as an entry value.
#[must_use]
pub fn encode_score(score: f64) -> [u8; 8] {
    score.to_le_bytes()
}

/// Decodes a score from an entry value.
pub fn decode_score(value: &[u8]) -> CoreResult<f64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        CoreError::corrupt_record(format!("zset score has {} bytes", value.len()))
    })?;
    Ok(f64::from_le_bytes(bytes))
}

#[derive(Debug, Clone, PartialEq)]
struct Ranked {
    score: f64,
    member: Vec<u8>,
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

#[derive(Debug, Default)]
struct SortedMembers {
    members: HashMap<Vec<u8>, (f64, IndexEntry)>,
    order: BTreeSet<Ranked>,
}

impl SortedMembers {
    fn remove(&mut self, member: &[u8]) -> Option<IndexEntry> {
        let (score, entry) = self.members.remove(member)?;
        self.order.remove(&Ranked {
            score,
            member: member.to_vec(),
        });
        Some(entry)
    }
}

/// Maps each sorted-set key to its scored members.
#[derive(Debug, Default)]
pub struct ZSetIndex {
    keys: HashMap<Vec<u8>, SortedMembers>,
}

impl ZSetIndex {
    /// Looks up one member's entry.
    pub fn get(&self, key: &[u8], member: &[u8]) -> Option<&IndexEntry> {
        self.keys.get(key)?.members.get(member).map(|(_, e)| e)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8], member: &[u8]) -> Option<&mut IndexEntry> {
        self.keys
            .get_mut(key)?
            .members
            .get_mut(member)
            .map(|(_, e)| e)
    }

    /// Score of a member.
    pub fn score(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.keys.get(key)?.members.get(member).map(|(s, _)| *s)
    }

    /// Adds or rescores a member, returning the entry it replaces.
    pub fn insert(
        &mut self,
        key: &[u8],
        member: &[u8],
        score: f64,
        entry: IndexEntry,
    ) -> Option<IndexEntry> {
        let set = self.keys.entry(key.to_vec()).or_default();
        let old = set.remove(member);
        set.order.insert(Ranked {
            score,
            member: member.to_vec(),
        });
        set.members.insert(member.to_vec(), (score, entry));
        old
    }

    /// Removes a member; the key disappears with its last member.
    pub fn remove(&mut self, key: &[u8], member: &[u8]) -> Option<IndexEntry> {
        let set = self.keys.get_mut(key)?;
        let removed = set.remove(member);
        if set.members.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    pub(crate) fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        let Some(set) = self.keys.get_mut(key) else {
            return Vec::new();
        };
        let stale: Vec<Vec<u8>> = set
            .members
            .iter()
            .filter(|(_, (_, e))| e.sequence < sequence)
            .map(|(m, _)| m.clone())
            .collect();
        let removed = stale.iter().filter_map(|m| set.remove(m)).collect();
        if set.members.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    /// Members with scores, ranks `start..=stop` in ascending order.
    pub fn range(&self, key: &[u8], start: usize, stop: usize) -> Vec<(Vec<u8>, f64)> {
        self.keys
            .get(key)
            .into_iter()
            .flat_map(|set| set.order.iter())
            .skip(start)
            .take(stop + 1 - start)
            .map(|r| (r.member.clone(), r.score))
            .collect()
    }

    /// Members with scores, ranks `start..=stop` in descending order.
    pub fn rev_range(&self, key: &[u8], start: usize, stop: usize) -> Vec<(Vec<u8>, f64)> {
        self.keys
            .get(key)
            .into_iter()
            .flat_map(|set| set.order.iter().rev())
            .skip(start)
            .take(stop + 1 - start)
            .map(|r| (r.member.clone(), r.score))
            .collect()
    }

    /// Cardinality of a key.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.keys.get(key).map_or(0, |set| set.members.len())
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
