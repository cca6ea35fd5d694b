//! End-to-end scenarios across every data type, reopen, backup and GC.

use crate::fixtures::{get_key, get_value_128b, get_value_16b, scenarios, test_config, TestDatabase};
use crate::generators::{command_sequence_strategy, PropTestConfig};
use crate::integration::{verify, ModelHarness};
use petal_core::{CoreError, DataType, Database, IndexMode, IoType};
use proptest::prelude::*;
use rand::Rng;
use std::thread::sleep;
use std::time::Duration;

fn expired<T>(result: Result<T, CoreError>) -> bool {
    matches!(result, Err(CoreError::ExpiredKey))
}

fn open(io_type: IoType, index_mode: IndexMode) -> TestDatabase {
    TestDatabase::with_config(test_config().io_type(io_type).index_mode(index_mode))
}

#[test]
fn ttl_of_unknown_key_is_not_found() {
    let db = TestDatabase::file();
    for data_type in DataType::ALL {
        assert!(matches!(
            db.ttl(&get_key(111), data_type),
            Err(CoreError::KeyNotFound)
        ));
        assert!(matches!(
            db.expire(&get_key(31), Duration::from_secs(2), data_type),
            Err(CoreError::KeyNotFound)
        ));
    }
}

fn expire_every_type(db: &Database) {
    let key = get_key(55);
    let zkey = get_key(111);
    let ttl = Duration::from_secs(1);

    db.set(&key, &get_value_16b()).unwrap();
    db.expire(&key, ttl, DataType::String).unwrap();
    db.rpush(&key, &[get_value_16b(), get_value_16b()]).unwrap();
    db.expire(&key, ttl, DataType::List).unwrap();
    db.hset(&key, &key, &get_value_16b()).unwrap();
    db.expire(&key, ttl, DataType::Hash).unwrap();
    db.sadd(&key, &[get_key(55), get_key(555)]).unwrap();
    db.expire(&key, ttl, DataType::Set).unwrap();
    db.zadd(&zkey, 1.2, &get_key(55)).unwrap();
    db.zadd(&zkey, 2.3, &get_key(555)).unwrap();
    db.expire(&zkey, ttl, DataType::ZSet).unwrap();

    sleep(Duration::from_secs(2));

    assert!(expired(db.get(&key)));
    assert!(expired(db.rpop(&key)));
    assert!(expired(db.hget(&key, &key)));
    assert!(!db.sismember(&key, &key).unwrap());
    assert!(expired(db.zrange(&zkey, 0, -1)));
}

fn expire_twice(db: &Database) {
    let key = get_key(55);
    let zkey = get_key(111);
    let long = Duration::from_secs(100);
    let short = Duration::from_secs(1);

    db.set(&get_key(66), &get_value_16b()).unwrap();

    // An expired string is simply overwritten.
    db.set(&key, &get_value_16b()).unwrap();
    db.expire(&key, long, DataType::String).unwrap();
    db.expire(&key, short, DataType::String).unwrap();

    // The list stays expired until it is deleted.
    assert!(expired(db.rpush(&key, &[get_value_16b()])));
    assert!(expired(db.expire(&key, short, DataType::List)));

    // Aggregates that accept writes start over.
    db.hset(&key, &key, &get_value_16b()).unwrap();
    db.expire(&key, long, DataType::Hash).unwrap();
    db.expire(&key, short, DataType::Hash).unwrap();
    db.sadd(&key, &[get_key(55)]).unwrap();
    db.expire(&key, long, DataType::Set).unwrap();
    db.expire(&key, short, DataType::Set).unwrap();
    db.zadd(&zkey, 1.0, &get_key(55)).unwrap();
    db.expire(&zkey, long, DataType::ZSet).unwrap();
    db.expire(&zkey, short, DataType::ZSet).unwrap();

    sleep(Duration::from_millis(1100));

    assert!(expired(db.get(&key)));
    assert!(expired(db.rpop(&key)));
    assert!(expired(db.hget(&key, &key)));
    assert!(!db.sismember(&key, &key).unwrap());
    assert!(expired(db.zrange(&zkey, 0, 2)));
    assert_eq!(db.get(&get_key(66)).unwrap().len(), 16);
}

#[test]
fn expire_fileio_key_only() {
    let db = open(IoType::FileIo, IndexMode::KeyOnly);
    expire_every_type(&db);
    expire_twice(&db);
}

#[test]
fn expire_mmap_key_value() {
    let db = open(IoType::MMap, IndexMode::KeyValue);
    expire_every_type(&db);
    expire_twice(&db);
}

#[test]
fn expired_key_stays_expired_after_reopen() {
    let db = TestDatabase::file();
    scenarios::every_type(&db, b"k");
    for data_type in DataType::ALL {
        db.expire(b"k", Duration::from_millis(300), data_type).unwrap();
    }
    sleep(Duration::from_millis(400));

    let db = db.reopen();
    assert!(expired(db.get(b"k")));
    assert!(expired(db.lrange(b"k", 0, -1)));
    assert!(expired(db.hgetall(b"k")));
    assert!(expired(db.smembers(b"k")));
    assert!(expired(db.zcard(b"k")));
}

#[test]
fn ttl_counts_down() {
    let db = TestDatabase::file();
    let key = get_key(55);
    let zkey = get_key(111);
    let ttl = Duration::from_secs(10);

    db.set(&key, &get_value_16b()).unwrap();
    db.rpush(&key, &[get_value_16b()]).unwrap();
    db.hset(&key, &key, &get_value_16b()).unwrap();
    db.sadd(&key, &[get_key(55)]).unwrap();
    db.zadd(&zkey, 1.0, &get_key(55)).unwrap();
    for data_type in [DataType::String, DataType::List, DataType::Hash, DataType::Set] {
        db.expire(&key, ttl, data_type).unwrap();
    }
    db.expire(&zkey, Duration::from_secs(100), DataType::ZSet).unwrap();
    db.expire(&zkey, ttl, DataType::ZSet).unwrap();

    sleep(Duration::from_secs(2));

    for data_type in DataType::ALL {
        let key = if data_type == DataType::ZSet { &zkey } else { &key };
        assert_eq!(db.ttl(key, data_type).unwrap(), Some(8), "{data_type}");
    }
}

#[test]
fn persist_survives_reopen() {
    let db = TestDatabase::file();
    db.sadd(b"s", &["a"]).unwrap();
    db.expire(b"s", Duration::from_millis(200), DataType::Set).unwrap();
    assert!(db.persist(b"s", DataType::Set).unwrap());

    let db = db.reopen();
    sleep(Duration::from_millis(300));
    assert_eq!(db.ttl(b"s", DataType::Set).unwrap(), None);
    assert!(db.sismember(b"s", b"a").unwrap());
}

#[test]
fn backup_is_independent_of_source() {
    let db = TestDatabase::file();
    for i in 0..10 {
        db.set(&get_key(i), &get_value_128b()).unwrap();
    }
    let expected: Vec<Vec<u8>> = (0..10).map(|i| db.get(&get_key(i)).unwrap()).collect();

    let dest = db.sibling("backup");
    db.backup(&dest).unwrap();
    for i in 0..10 {
        db.delete(&get_key(i)).unwrap();
    }
    db.compact_with_ratio(0.0).unwrap();

    let copy = Database::open_with_config(&dest, test_config()).unwrap();
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(&copy.get(&get_key(i)).unwrap(), value);
    }
    assert!(matches!(db.get(&get_key(4)), Err(CoreError::KeyNotFound)));
}

#[test]
fn background_gc_reclaims_deleted_keys() {
    let db = TestDatabase::with_config(
        test_config()
            .max_segment_size(8 * 1024)
            .gc_interval(Duration::from_millis(100))
            .gc_ratio(0.00001),
    );
    for i in 0..2_000 {
        db.set(&get_key(i), &get_value_16b()).unwrap();
    }
    for i in (0..2_000).step_by(3) {
        db.delete(&get_key(i)).unwrap();
    }

    sleep(Duration::from_millis(800));

    let stats = db.stats();
    assert!(stats.gc_cycles > 0);
    assert!(stats.segments_compacted > 0);
    for i in 0..2_000 {
        let result = db.get(&get_key(i));
        if i % 3 == 0 {
            assert!(matches!(result, Err(CoreError::KeyNotFound)), "key {i}");
        } else {
            assert_eq!(result.unwrap().len(), 16, "key {i}");
        }
    }

    let db = db.reopen();
    assert_eq!(db.key_count(DataType::String).unwrap(), 2_000 - 667);
}

/// Reference workload: 800k writes, 100k random deletes, background GC.
#[test]
#[ignore = "writes 800k keys and sleeps 12s"]
fn gc_reclaims_random_deletes() {
    let db = TestDatabase::with_config(
        test_config()
            .gc_interval(Duration::from_secs(7))
            .gc_ratio(0.00001),
    );

    let write_count = 800_000;
    for i in 0..write_count {
        db.set(&get_key(i), &get_value_16b()).unwrap();
    }

    let mut rng = rand::thread_rng();
    let mut deleted = Vec::with_capacity(100_000);
    for _ in 0..100_000 {
        let key = get_key(rng.gen_range(0..write_count));
        db.delete(&key).unwrap();
        deleted.push(key);
    }

    sleep(Duration::from_secs(12));
    for key in &deleted {
        assert!(matches!(db.get(key), Err(CoreError::KeyNotFound)));
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn mmap_reopen_matches_model(commands in command_sequence_strategy(1, 150)) {
        let db = TestDatabase::with_config(
            test_config()
                .io_type(IoType::MMap)
                .index_mode(IndexMode::KeyValue)
                .max_segment_size(2048),
        );
        let mut harness = ModelHarness::new(&db);
        harness.apply_all(&commands);
        let model = harness.into_model();

        let db = db.reopen();
        verify(&db, &model);
        db.compact_with_ratio(0.0).unwrap();
        let db = db.reopen();
        verify(&db, &model);
    }
}
