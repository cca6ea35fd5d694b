//! In-memory indexes, one per data type.
//!
//! Indexes map logical keys to the position of the entry that holds their
//! current value. They are never persisted: recovery rebuilds them by
//! replaying the segments.
//!
//! ```text
//! string  key -> IndexEntry
//! list    key -> BTreeMap<position, IndexEntry>
//! hash    key -> HashMap<field, IndexEntry>
//! set     key -> HashMap<member, IndexEntry>
//! zset    key -> HashMap<member, (score, IndexEntry)> + BTreeSet<(score, member)>
//! ```
//!
//! Every shape is addressed uniformly by `(key, sub_key)` slots through
//! [`TypeIndex`], which is what the shared apply path, GC and recovery use.
//! Commands reach for the concrete shape.

mod hash;
mod list;
mod set;
mod string;
mod zset;

pub use hash::HashIndex;
pub use list::{decode_position, encode_position, ListIndex};
pub use set::SetIndex;
pub use string::StringIndex;
pub use zset::{decode_score, encode_score, ZSetIndex};

use crate::error::CoreResult;
use crate::types::{DataType, FileId, SequenceNumber};

/// Physical position of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /// Segment holding the entry.
    pub file_id: FileId,
    /// Offset of the entry within the segment.
    pub offset: u64,
    /// Encoded size of the entry.
    pub size: u32,
}

/// Index record for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Where the entry lives.
    pub location: Location,
    /// Sequence of the entry.
    pub sequence: SequenceNumber,
    /// Cached value, kept only in key+value mode.
    pub value: Option<Vec<u8>>,
}

/// The index of one data type.
#[derive(Debug)]
pub enum TypeIndex {
    /// String index.
    String(StringIndex),
    /// List index.
    List(ListIndex),
    /// Hash index.
    Hash(HashIndex),
    /// Set index.
    Set(SetIndex),
    /// Sorted-set index.
    ZSet(ZSetIndex),
}

impl TypeIndex {
    /// Creates an empty index of the right shape.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::String => Self::String(StringIndex::default()),
            DataType::List => Self::List(ListIndex::default()),
            DataType::Hash => Self::Hash(HashIndex::default()),
            DataType::Set => Self::Set(SetIndex::default()),
            DataType::ZSet => Self::ZSet(ZSetIndex::default()),
        }
    }

    /// The string shape, if this is the string index.
    #[must_use]
    pub fn as_string(&self) -> Option<&StringIndex> {
        match self {
            Self::String(idx) => Some(idx),
            _ => None,
        }
    }

    /// The list shape, if this is the list index.
    #[must_use]
    pub fn as_list(&self) -> Option<&ListIndex> {
        match self {
            Self::List(idx) => Some(idx),
            _ => None,
        }
    }

    /// The hash shape, if this is the hash index.
    #[must_use]
    pub fn as_hash(&self) -> Option<&HashIndex> {
        match self {
            Self::Hash(idx) => Some(idx),
            _ => None,
        }
    }

    /// The set shape, if this is the set index.
    #[must_use]
    pub fn as_set(&self) -> Option<&SetIndex> {
        match self {
            Self::Set(idx) => Some(idx),
            _ => None,
        }
    }

    /// The sorted-set shape, if this is the sorted-set index.
    #[must_use]
    pub fn as_zset(&self) -> Option<&ZSetIndex> {
        match self {
            Self::ZSet(idx) => Some(idx),
            _ => None,
        }
    }

    /// Looks up one slot.
    pub fn get(&self, key: &[u8], sub_key: &[u8]) -> Option<&IndexEntry> {
        match self {
            Self::String(idx) => idx.get(key),
            Self::List(idx) => decode_position(sub_key)
                .ok()
                .and_then(|pos| idx.get(key, pos)),
            Self::Hash(idx) => idx.get(key, sub_key),
            Self::Set(idx) => idx.get(key, sub_key),
            Self::ZSet(idx) => idx.get(key, sub_key),
        }
    }

    /// Looks up one slot for repointing.
    pub fn get_mut(&mut self, key: &[u8], sub_key: &[u8]) -> Option<&mut IndexEntry> {
        match self {
            Self::String(idx) => idx.get_mut(key),
            Self::List(idx) => match decode_position(sub_key) {
                Ok(pos) => idx.get_mut(key, pos),
                Err(_) => None,
            },
            Self::Hash(idx) => idx.get_mut(key, sub_key),
            Self::Set(idx) => idx.get_mut(key, sub_key),
            Self::ZSet(idx) => idx.get_mut(key, sub_key),
        }
    }

    /// Installs a slot from a put entry and returns the entry it replaces.
    ///
    /// `value` is the entry payload; sorted sets read the score from it.
    pub fn insert(
        &mut self,
        key: &[u8],
        sub_key: &[u8],
        value: &[u8],
        entry: IndexEntry,
    ) -> CoreResult<Option<IndexEntry>> {
        Ok(match self {
            Self::String(idx) => idx.insert(key, entry),
            Self::List(idx) => idx.insert(key, decode_position(sub_key)?, entry),
            Self::Hash(idx) => idx.insert(key, sub_key, entry),
            Self::Set(idx) => idx.insert(key, sub_key, entry),
            Self::ZSet(idx) => idx.insert(key, sub_key, decode_score(value)?, entry),
        })
    }

    /// Removes one slot.
    pub fn remove(&mut self, key: &[u8], sub_key: &[u8]) -> Option<IndexEntry> {
        match self {
            Self::String(idx) => idx.remove(key),
            Self::List(idx) => match decode_position(sub_key) {
                Ok(pos) => idx.remove(key, pos),
                Err(_) => None,
            },
            Self::Hash(idx) => idx.remove(key, sub_key),
            Self::Set(idx) => idx.remove(key, sub_key),
            Self::ZSet(idx) => idx.remove(key, sub_key),
        }
    }

    /// Removes every slot of `key` written before `sequence`.
    pub fn clear_before(&mut self, key: &[u8], sequence: SequenceNumber) -> Vec<IndexEntry> {
        match self {
            Self::String(idx) => idx.clear_before(key, sequence),
            Self::List(idx) => idx.clear_before(key, sequence),
            Self::Hash(idx) => idx.clear_before(key, sequence),
            Self::Set(idx) => idx.clear_before(key, sequence),
            Self::ZSet(idx) => idx.clear_before(key, sequence),
        }
    }

    /// Locations of every slot of `key`.
    #[must_use]
    pub fn locations(&self, key: &[u8]) -> Vec<Location> {
        match self {
            Self::String(idx) => idx.get(key).map(|e| e.location).into_iter().collect(),
            Self::List(idx) => match idx.len(key) {
                0 => Vec::new(),
                len => idx
                    .range(key, 0, len - 1)
                    .into_iter()
                    .map(|(_, e)| e.location)
                    .collect(),
            },
            Self::Hash(idx) => idx.fields(key).map(|(_, e)| e.location).collect(),
            Self::Set(idx) => idx
                .members(key)
                .filter_map(|m| idx.get(key, m))
                .map(|e| e.location)
                .collect(),
            Self::ZSet(idx) => match idx.len(key) {
                0 => Vec::new(),
                len => idx
                    .range(key, 0, len - 1)
                    .into_iter()
                    .filter_map(|(m, _)| idx.get(key, &m).map(|e| e.location))
                    .collect(),
            },
        }
    }

    /// Returns true if `key` has at least one slot.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        match self {
            Self::String(idx) => idx.get(key).is_some(),
            Self::List(idx) => idx.len(key) > 0,
            Self::Hash(idx) => idx.len(key) > 0,
            Self::Set(idx) => idx.len(key) > 0,
            Self::ZSet(idx) => idx.len(key) > 0,
        }
    }

    /// Number of keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        match self {
            Self::String(idx) => idx.key_count(),
            Self::List(idx) => idx.key_count(),
            Self::Hash(idx) => idx.key_count(),
            Self::Set(idx) => idx.key_count(),
            Self::ZSet(idx) => idx.key_count(),
        }
    }

    /// All keys, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        match self {
            Self::String(idx) => idx.keys(),
            Self::List(idx) => idx.keys(),
            Self::Hash(idx) => idx.keys(),
            Self::Set(idx) => idx.keys(),
            Self::ZSet(idx) => idx.keys(),
        }
    }
}

/// Resolves Redis-style inclusive `start..=stop` indices, where negative
/// values count from the end, against a collection of `len` items.
///
/// Returns `None` when the window is empty.
#[must_use]
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start >= len || stop < 0 || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Resolves a single Redis-style index, negative counting from the end.
#[must_use]
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Drops the entries of `slots` written before `sequence`, returning them.
pub(crate) fn drain_older<K, V>(
    slots: &mut std::collections::HashMap<K, V>,
    sequence: SequenceNumber,
    entry_of: impl Fn(&V) -> &IndexEntry,
) -> Vec<(K, V)>
where
    K: Clone + Eq + std::hash::Hash,
{
    let stale: Vec<K> = slots
        .iter()
        .filter(|(_, v)| entry_of(v).sequence < sequence)
        .map(|(k, _)| k.clone())
        .collect();
    stale
        .into_iter()
        .filter_map(|k| slots.remove(&k).map(|v| (k, v)))
        .collect()
}

#[cfg(test)]
pub(crate) fn test_entry(file_id: u32, offset: u64, seq: u64) -> IndexEntry {
    IndexEntry {
        location: Location {
            file_id: FileId::new(file_id),
            offset,
            size: 40,
        },
        sequence: SequenceNumber::new(seq),
        value: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_range_follows_redis() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 4)));
        assert_eq!(normalize_range(1, 2, 5), Some((1, 2)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(normalize_range(-100, 100, 5), Some((0, 4)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(5, 10, 5), None);
        assert_eq!(normalize_range(0, -6, 5), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn normalize_index_follows_redis() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }

    #[test]
    fn uniform_slots_across_shapes() {
        let mut list = TypeIndex::new(DataType::List);
        let pos = encode_position(-3);
        list.insert(b"k", &pos, b"elem", test_entry(1, 0, 1)).unwrap();
        assert!(list.get(b"k", &pos).is_some());
        assert!(list.contains_key(b"k"));

        let mut zset = TypeIndex::new(DataType::ZSet);
        zset.insert(b"k", b"m", &encode_score(1.5), test_entry(1, 0, 1))
            .unwrap();
        assert!(zset.get(b"k", b"m").is_some());

        assert!(list.remove(b"k", &pos).is_some());
        assert!(!list.contains_key(b"k"));
        assert_eq!(list.key_count(), 0);
    }

    #[test]
    fn locations_cover_every_slot() {
        let mut zset = TypeIndex::new(DataType::ZSet);
        zset.insert(b"k", b"a", &encode_score(2.0), test_entry(1, 0, 1)).unwrap();
        zset.insert(b"k", b"b", &encode_score(1.0), test_entry(2, 40, 2)).unwrap();
        zset.insert(b"other", b"a", &encode_score(1.0), test_entry(1, 80, 3)).unwrap();

        let mut offsets: Vec<u64> = zset.locations(b"k").iter().map(|l| l.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 40]);
        assert!(zset.locations(b"missing").is_empty());

        let mut list = TypeIndex::new(DataType::List);
        list.insert(b"l", &encode_position(0), b"x", test_entry(1, 0, 1)).unwrap();
        list.insert(b"l", &encode_position(1), b"y", test_entry(1, 40, 2)).unwrap();
        assert_eq!(list.locations(b"l").len(), 2);
    }

    #[test]
    fn malformed_sub_keys_are_rejected() {
        let mut list = TypeIndex::new(DataType::List);
        assert!(list.insert(b"k", b"short", b"", test_entry(1, 0, 1)).is_err());

        let mut zset = TypeIndex::new(DataType::ZSet);
        assert!(zset.insert(b"k", b"m", b"bad", test_entry(1, 0, 1)).is_err());
    }

    #[test]
    fn clear_before_keeps_newer_slots() {
        let mut hash = TypeIndex::new(DataType::Hash);
        hash.insert(b"k", b"old", b"", test_entry(1, 0, 1)).unwrap();
        hash.insert(b"k", b"new", b"", test_entry(1, 40, 9)).unwrap();

        let removed = hash.clear_before(b"k", SequenceNumber::new(5));
        assert_eq!(removed.len(), 1);
        assert!(hash.get(b"k", b"new").is_some());
        assert!(hash.get(b"k", b"old").is_none());
    }
}
