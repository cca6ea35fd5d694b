//! Entry format test vectors for PetalDB.
//!
//! Each vector pins the exact bytes of one encoded entry, so any change to
//! the on-disk layout or the checksum shows up as a failing vector. The
//! vectors serialize to JSON for tools that read segment files.

use petal_core::{encode_position, encode_score, DataType, Entry, SequenceNumber};
use serde::{Deserialize, Serialize};

/// A test vector that can be shared with other tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Expected encoding (hex).
    pub expected_hex: String,
}

impl TestVector {
    fn new(id: &str, description: &str, expected_hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_hex: expected_hex.into(),
        }
    }
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string.
///
/// # Panics
///
/// Panics on odd length or non-hex characters.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd-length hex string");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex"))
        .collect()
}

fn sequenced(entry: Entry, seq: u64) -> Entry {
    Entry {
        sequence: SequenceNumber::new(seq),
        ..entry
    }
}

/// The entries behind [`entry_vectors`], in the same order.
pub fn vector_entries() -> Vec<Entry> {
    vec![
        sequenced(Entry::put(DataType::String, b"k", b"", b"v"), 1),
        sequenced(
            Entry::put(DataType::String, b"session", b"", b"token").with_expire_at(1_700_000_000_000),
            7,
        ),
        sequenced(
            Entry::put(DataType::List, b"queue", &encode_position(-1), b"job"),
            3,
        ),
        sequenced(
            Entry::put(DataType::Hash, b"user", b"name", b"ada").with_reset(),
            42,
        ),
        sequenced(Entry::remove(DataType::Set, b"tags", b"red"), 9),
        sequenced(
            Entry::put(DataType::ZSet, b"board", b"alice", &encode_score(2.5)),
            5,
        ),
        sequenced(Entry::clear(DataType::ZSet, b"board"), 6),
        sequenced(Entry::expire(DataType::Hash, b"user", 0), 11),
    ]
}

/// Entry encoding test vectors.
pub fn entry_vectors() -> Vec<TestVector> {
    vec![
        TestVector::new(
            "string_put",
            "String put without TTL",
            "6a1808e8010100010000000000000000000000000000000100000000000000010000006b76",
        ),
        TestVector::new(
            "string_put_ttl",
            "String put carrying a TTL",
            "c34dd11601010007000000000000000068e5cf8b01000007000000000000000500000073657373696f6e746f6b656e",
        ),
        TestVector::new(
            "list_put",
            "List element at position -1",
            "8b32afe5020100030000000000000000000000000000000500000008000000030000007175657565ffffffffffffffff6a6f62",
        ),
        TestVector::new(
            "hash_reset_put",
            "Hash put that resets the key",
            "4fea2aed0301012a000000000000000000000000000000040000000400000003000000757365726e616d65616461",
        ),
        TestVector::new(
            "set_remove",
            "Set member removal",
            "a49521680402000900000000000000000000000000000004000000030000000000000074616773726564",
        ),
        TestVector::new(
            "zset_put",
            "Sorted-set member with score 2.5",
            "b83af24205010005000000000000000000000000000000050000000500000008000000626f617264616c6963650000000000000440",
        ),
        TestVector::new(
            "zset_clear",
            "Sorted-set clear",
            "3252b09005030006000000000000000000000000000000050000000000000000000000626f617264",
        ),
        TestVector::new(
            "hash_persist",
            "Hash TTL drop",
            "cf54cf420304000b00000000000000000000000000000004000000000000000000000075736572",
        ),
    ]
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        entry: entry_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    entry: Vec<TestVector>,
}
