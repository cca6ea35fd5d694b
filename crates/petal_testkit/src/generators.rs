//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random keys, values and command
//! sequences over every data type. Keys are drawn from a small pool so that
//! sequences keep hitting the same keys.

use petal_core::{DataType, Entry};
use proptest::prelude::*;

/// Strategy for generating keys from a pool of eight.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0u8..8).prop_map(|n| format!("key-{n}").into_bytes())
}

/// Strategy for generating hash fields and set or sorted-set members.
pub fn member_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0u8..6).prop_map(|n| format!("m{n}").into_bytes())
}

/// Strategy for generating values (arbitrary bytes, possibly empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating finite sorted-set scores.
pub fn score_strategy() -> impl Strategy<Value = f64> {
    (-1000i32..1000).prop_map(|n| f64::from(n) / 4.0)
}

/// Strategy for generating any data type.
pub fn data_type_strategy() -> impl Strategy<Value = DataType> {
    prop::sample::select(DataType::ALL.to_vec())
}

/// A single database command.
#[derive(Debug, Clone)]
pub enum Command {
    /// `set key value`
    Set {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// `delete key`
    Delete {
        /// Key
        key: Vec<u8>,
    },
    /// `lpush key value` (or `rpush` when `right`)
    Push {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
        /// Push at the tail.
        right: bool,
    },
    /// `lpop key` (or `rpop` when `right`)
    Pop {
        /// Key
        key: Vec<u8>,
        /// Pop from the tail.
        right: bool,
    },
    /// `hset key field value`
    HSet {
        /// Key
        key: Vec<u8>,
        /// Field
        field: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// `hdel key field`
    HDel {
        /// Key
        key: Vec<u8>,
        /// Field
        field: Vec<u8>,
    },
    /// `sadd key member`
    SAdd {
        /// Key
        key: Vec<u8>,
        /// Member
        member: Vec<u8>,
    },
    /// `srem key member`
    SRem {
        /// Key
        key: Vec<u8>,
        /// Member
        member: Vec<u8>,
    },
    /// `zadd key score member`
    ZAdd {
        /// Key
        key: Vec<u8>,
        /// Score
        score: f64,
        /// Member
        member: Vec<u8>,
    },
    /// `zrem key member`
    ZRem {
        /// Key
        key: Vec<u8>,
        /// Member
        member: Vec<u8>,
    },
    /// Drop a whole key of one type.
    DeleteKey {
        /// Key
        key: Vec<u8>,
        /// Data type
        data_type: DataType,
    },
}

/// Strategy for generating one command.
pub fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| Command::Set { key, value }),
        1 => key_strategy().prop_map(|key| Command::Delete { key }),
        3 => (key_strategy(), value_strategy(), any::<bool>())
            .prop_map(|(key, value, right)| Command::Push { key, value, right }),
        2 => (key_strategy(), any::<bool>()).prop_map(|(key, right)| Command::Pop { key, right }),
        3 => (key_strategy(), member_strategy(), value_strategy())
            .prop_map(|(key, field, value)| Command::HSet { key, field, value }),
        1 => (key_strategy(), member_strategy())
            .prop_map(|(key, field)| Command::HDel { key, field }),
        3 => (key_strategy(), member_strategy())
            .prop_map(|(key, member)| Command::SAdd { key, member }),
        1 => (key_strategy(), member_strategy())
            .prop_map(|(key, member)| Command::SRem { key, member }),
        3 => (key_strategy(), score_strategy(), member_strategy())
            .prop_map(|(key, score, member)| Command::ZAdd { key, score, member }),
        1 => (key_strategy(), member_strategy())
            .prop_map(|(key, member)| Command::ZRem { key, member }),
        1 => (key_strategy(), data_type_strategy())
            .prop_map(|(key, data_type)| Command::DeleteKey { key, data_type }),
    ]
}

/// Strategy for generating a sequence of commands.
pub fn command_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Command>> {
    prop::collection::vec(command_strategy(), min_ops..max_ops)
}

/// Strategy for generating well-formed entries of any type and operation.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (
        data_type_strategy(),
        0u8..4,
        prop::collection::vec(any::<u8>(), 1..32),
        prop::collection::vec(any::<u8>(), 0..16),
        value_strategy(),
        any::<u64>(),
    )
        .prop_map(|(data_type, op, key, sub_key, value, expire_at)| match op {
            0 => Entry::put(data_type, &key, &sub_key, &value),
            1 => Entry::remove(data_type, &key, &sub_key),
            2 => Entry::clear(data_type, &key),
            _ => Entry::expire(data_type, &key, expire_at),
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
