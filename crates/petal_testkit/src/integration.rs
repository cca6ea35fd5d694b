//! Model-checking harness.
//!
//! [`ModelHarness`] runs every command against a database and against plain
//! in-memory collections, asserting that both agree on each return value and
//! on the full contents afterwards. Because it only needs a [`Database`], the
//! same harness checks in-memory, file and memory-mapped databases, and
//! state that survived a reopen or a GC cycle.

use crate::generators::Command;
use petal_core::{CoreError, CoreResult, DataType, Database};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Expected contents of a database, one map per data type.
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// String keys.
    pub strings: HashMap<Vec<u8>, Vec<u8>>,
    /// List keys, head first.
    pub lists: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
    /// Hash keys.
    pub hashes: HashMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Set keys.
    pub sets: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    /// Sorted-set keys.
    pub zsets: HashMap<Vec<u8>, BTreeMap<Vec<u8>, f64>>,
}

impl Model {
    /// Number of keys of one type.
    pub fn key_count(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::String => self.strings.len(),
            DataType::List => self.lists.len(),
            DataType::Hash => self.hashes.len(),
            DataType::Set => self.sets.len(),
            DataType::ZSet => self.zsets.len(),
        }
    }
}

/// A database paired with the model it must agree with.
pub struct ModelHarness<'a> {
    db: &'a Database,
    model: Model,
    applied: usize,
}

impl<'a> ModelHarness<'a> {
    /// Starts tracking an empty database.
    pub fn new(db: &'a Database) -> Self {
        Self::with_model(db, Model::default())
    }

    /// Continues tracking a database that should already hold `model`,
    /// e.g. after a reopen.
    pub fn with_model(db: &'a Database, model: Model) -> Self {
        Self {
            db,
            model,
            applied: 0,
        }
    }

    /// Applies one command to both sides and compares the results.
    pub fn apply(&mut self, command: &Command) {
        let db = self.db;
        let m = &mut self.model;
        match command {
            Command::Set { key, value } => {
                db.set(key, value).expect("set failed");
                m.strings.insert(key.clone(), value.clone());
            }
            Command::Delete { key } => {
                db.delete(key).expect("delete failed");
                m.strings.remove(key);
            }
            Command::Push { key, value, right } => {
                let pushed = if *right {
                    db.rpush(key, &[value])
                } else {
                    db.lpush(key, &[value])
                };
                let len = pushed.expect("push failed");
                let list = m.lists.entry(key.clone()).or_default();
                if *right {
                    list.push_back(value.clone());
                } else {
                    list.push_front(value.clone());
                }
                assert_eq!(len, list.len(), "push length for {command:?}");
            }
            Command::Pop { key, right } => {
                let actual = if *right { db.rpop(key) } else { db.lpop(key) };
                let expected = m.lists.get_mut(key).and_then(|list| {
                    if *right {
                        list.pop_back()
                    } else {
                        list.pop_front()
                    }
                });
                if m.lists.get(key).is_some_and(VecDeque::is_empty) {
                    m.lists.remove(key);
                }
                assert_eq!(found(actual), expected, "pop result for {command:?}");
            }
            Command::HSet { key, field, value } => {
                let is_new = db.hset(key, field, value).expect("hset failed");
                let previous = m
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
                assert_eq!(is_new, previous.is_none(), "hset for {command:?}");
            }
            Command::HDel { key, field } => {
                let removed = db.hdel(key, field).expect("hdel failed");
                let expected = remove_member(&mut m.hashes, key, |h| h.remove(field).is_some());
                assert_eq!(removed, expected, "hdel for {command:?}");
            }
            Command::SAdd { key, member } => {
                let added = db.sadd(key, &[member]).expect("sadd failed");
                let expected = m.sets.entry(key.clone()).or_default().insert(member.clone());
                assert_eq!(added, usize::from(expected), "sadd for {command:?}");
            }
            Command::SRem { key, member } => {
                let removed = db.srem(key, &[member]).expect("srem failed");
                let expected = remove_member(&mut m.sets, key, |s| s.remove(member));
                assert_eq!(removed, usize::from(expected), "srem for {command:?}");
            }
            Command::ZAdd { key, score, member } => {
                let is_new = db.zadd(key, *score, member).expect("zadd failed");
                let previous = m
                    .zsets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score);
                assert_eq!(is_new, previous.is_none(), "zadd for {command:?}");
            }
            Command::ZRem { key, member } => {
                let removed = db.zrem(key, member).expect("zrem failed");
                let expected = remove_member(&mut m.zsets, key, |z| z.remove(member).is_some());
                assert_eq!(removed, expected, "zrem for {command:?}");
            }
            Command::DeleteKey { key, data_type } => {
                db.delete_key(key, *data_type).expect("delete_key failed");
                match data_type {
                    DataType::String => {
                        m.strings.remove(key);
                    }
                    DataType::List => {
                        m.lists.remove(key);
                    }
                    DataType::Hash => {
                        m.hashes.remove(key);
                    }
                    DataType::Set => {
                        m.sets.remove(key);
                    }
                    DataType::ZSet => {
                        m.zsets.remove(key);
                    }
                }
            }
        }
        self.applied += 1;
    }

    /// Applies every command in order.
    pub fn apply_all(&mut self, commands: &[Command]) {
        for command in commands {
            self.apply(command);
        }
    }

    /// Checks that the database holds exactly the model's contents.
    pub fn verify_all(&self) {
        verify(self.db, &self.model);
    }

    /// Number of commands applied.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// The expected contents.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Gives up the model, e.g. to carry it across a reopen.
    pub fn into_model(self) -> Model {
        self.model
    }
}

/// Checks that `db` holds exactly the contents of `model`.
pub fn verify(db: &Database, model: &Model) {
    for data_type in DataType::ALL {
        assert_eq!(
            db.key_count(data_type).expect("key_count failed"),
            model.key_count(data_type),
            "key count of {data_type}"
        );
    }

    for (key, value) in &model.strings {
        assert_eq!(&db.get(key).expect("get failed"), value);
    }
    for (key, list) in &model.lists {
        let expected: Vec<Vec<u8>> = list.iter().cloned().collect();
        assert_eq!(db.lrange(key, 0, -1).expect("lrange failed"), expected);
        assert_eq!(db.llen(key).expect("llen failed"), list.len());
    }
    for (key, hash) in &model.hashes {
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect();
        assert_eq!(db.hgetall(key).expect("hgetall failed"), expected);
    }
    for (key, set) in &model.sets {
        let expected: Vec<Vec<u8>> = set.iter().cloned().collect();
        assert_eq!(db.smembers(key).expect("smembers failed"), expected);
    }
    for (key, zset) in &model.zsets {
        let mut ranked: Vec<(&Vec<u8>, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        let expected: Vec<Vec<u8>> = ranked.into_iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(db.zrange(key, 0, -1).expect("zrange failed"), expected);

        let mut reversed = expected;
        reversed.reverse();
        assert_eq!(db.zrevrange(key, 0, -1).expect("zrevrange failed"), reversed);
        for (member, score) in zset {
            assert_eq!(db.zscore(key, member).expect("zscore failed"), *score);
        }
    }
}

/// Maps `KeyNotFound` to `None` and panics on any other error.
fn found<T>(result: CoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(CoreError::KeyNotFound) => None,
        Err(err) => panic!("unexpected error: {err}"),
    }
}

/// Removes from an aggregate, dropping the key once it is empty.
fn remove_member<C: IsEmpty>(
    keys: &mut HashMap<Vec<u8>, C>,
    key: &[u8],
    remove: impl FnOnce(&mut C) -> bool,
) -> bool {
    let Some(container) = keys.get_mut(key) else {
        return false;
    };
    let removed = remove(container);
    if container.is_empty() {
        keys.remove(key);
    }
    removed
}

trait IsEmpty {
    fn is_empty(&self) -> bool;
}

impl<K, V> IsEmpty for BTreeMap<K, V> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl<T> IsEmpty for BTreeSet<T> {
    fn is_empty(&self) -> bool {
        BTreeSet::is_empty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use crate::generators::{command_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    fn sample() -> Vec<Command> {
        vec![
            Command::Set { key: b"a".to_vec(), value: b"1".to_vec() },
            Command::Push { key: b"a".to_vec(), value: b"x".to_vec(), right: true },
            Command::Push { key: b"a".to_vec(), value: b"w".to_vec(), right: false },
            Command::HSet { key: b"a".to_vec(), field: b"f".to_vec(), value: b"v".to_vec() },
            Command::SAdd { key: b"a".to_vec(), member: b"m".to_vec() },
            Command::ZAdd { key: b"a".to_vec(), score: 2.0, member: b"m".to_vec() },
            Command::ZAdd { key: b"a".to_vec(), score: 1.0, member: b"n".to_vec() },
            Command::Pop { key: b"a".to_vec(), right: true },
            Command::SRem { key: b"a".to_vec(), member: b"m".to_vec() },
            Command::Pop { key: b"missing".to_vec(), right: false },
        ]
    }

    #[test]
    fn test_harness_tracks_every_type() {
        let test_db = TestDatabase::memory();
        let mut harness = ModelHarness::new(&test_db);
        harness.apply_all(&sample());
        harness.verify_all();

        assert_eq!(harness.applied(), 10);
        assert_eq!(harness.model().key_count(DataType::Set), 0);
        assert_eq!(harness.model().key_count(DataType::List), 1);
    }

    #[test]
    fn test_model_survives_reopen() {
        let test_db = TestDatabase::file();
        let mut harness = ModelHarness::new(&test_db);
        harness.apply_all(&sample());
        let model = harness.into_model();

        let test_db = test_db.reopen();
        verify(&test_db, &model);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn memory_database_matches_model(commands in command_sequence_strategy(1, 200)) {
            let test_db = TestDatabase::memory();
            let mut harness = ModelHarness::new(&test_db);
            harness.apply_all(&commands);
            harness.verify_all();
        }

        #[test]
        fn reopened_and_compacted_database_matches_model(
            commands in command_sequence_strategy(1, 200),
        ) {
            let test_db = TestDatabase::with_config(
                crate::fixtures::test_config().max_segment_size(1024),
            );
            let mut harness = ModelHarness::new(&test_db);
            harness.apply_all(&commands);
            let model = harness.into_model();

            test_db.compact_with_ratio(0.0).unwrap();
            verify(&test_db, &model);

            let test_db = test_db.reopen();
            verify(&test_db, &model);
        }
    }
}
