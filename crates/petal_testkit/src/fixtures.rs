//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases, the key and
//! value generators of the reference benchmarks, and common test scenarios.

use petal_core::{Config, Database, IndexMode, IoType};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Returns the 32-byte benchmark key for `n`.
pub fn get_key(n: usize) -> Vec<u8> {
    format!("kvstore-bench-key------{n:09}").into_bytes()
}

/// Returns `len` random lowercase alphanumeric bytes.
pub fn get_value(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

/// Returns a random 16-byte value.
pub fn get_value_16b() -> Vec<u8> {
    get_value(16)
}

/// Returns a random 128-byte value.
pub fn get_value_128b() -> Vec<u8> {
    get_value(128)
}

/// Configuration used by file-backed fixtures: no background GC, so tests
/// decide when a cycle runs.
pub fn test_config() -> Config {
    Config::default().gc_interval(Duration::ZERO)
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        let config = test_config();
        Self {
            db: Database::open_in_memory_with_config(config.clone())
                .expect("Failed to open in-memory database"),
            config,
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database using buffered file I/O.
    pub fn file() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a new file-based test database using memory-mapped segments.
    pub fn mmap() -> Self {
        Self::with_config(
            test_config()
                .io_type(IoType::MMap)
                .index_mode(IndexMode::KeyValue)
                .max_segment_size(4 * 1024 * 1024),
        )
    }

    /// Creates a new file-based test database with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(&temp_dir.path().join("db"), config.clone())
            .expect("Failed to open file database");

        Self {
            db,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Returns a path next to the database that does not exist yet, e.g. a
    /// backup destination.
    pub fn sibling(&self, name: &str) -> PathBuf {
        self._temp_dir
            .as_ref()
            .expect("In-memory databases have no directory")
            .path()
            .join(name)
    }

    /// Closes the database and opens it again from disk.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            config,
            _temp_dir,
        } = self;
        let temp_dir = _temp_dir.expect("Only file databases can be reopened");
        db.close().expect("Failed to close database");
        drop(db);

        let db = Database::open_with_config(&temp_dir.path().join("db"), config.clone())
            .expect("Failed to reopen database");
        Self {
            db,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Runs `f` against the database directory with the database closed,
    /// then opens it again. Used to damage files between runs.
    pub fn reopen_after<F>(self, f: F) -> Self
    where
        F: FnOnce(&Path),
    {
        let path = self.path().expect("Only file databases can be reopened");
        self.db.close().expect("Failed to close database");
        f(&path);
        self.reopen()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use petal_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.rpush(b"queue", &["a", "b"]).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database with `count` benchmark keys holding 16-byte values.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::file();
        for i in 0..count {
            test_db
                .set(&get_key(i), &get_value_16b())
                .expect("Failed to set key");
        }
        test_db
    }

    /// Writes `key` under every data type: a string, a two-element list, a
    /// hash field, a set member and a sorted-set member.
    pub fn every_type(db: &Database, key: &[u8]) {
        db.set(key, &get_value_16b()).expect("Failed to set");
        db.rpush(key, &[get_value_16b(), get_value_16b()])
            .expect("Failed to rpush");
        db.hset(key, key, &get_value_16b()).expect("Failed to hset");
        db.sadd(key, &[key]).expect("Failed to sadd");
        db.zadd(key, 1.0, key).expect("Failed to zadd");
    }
}
