//! Database facade: commands for every data type.

use crate::backup::{self, BackupInfo};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::entry::Entry;
use crate::error::{CoreError, CoreResult};
use crate::gc::{self, GcReport, GcWorker};
use crate::index::{encode_position, encode_score, normalize_index, normalize_range};
use crate::recovery::recover;
use crate::segment::SegmentFactory;
use crate::stats::{DatabaseStats, SegmentStats, StatsSnapshot};
use crate::store::{SequenceAllocator, TypeStore, ValueRef};
use crate::types::{unix_millis, DataType, SequenceNumber};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// State shared between the handle and the GC thread.
pub(crate) struct Shared {
    pub(crate) config: Config,
    /// Database directory (holds the lock). None for in-memory databases.
    dir: Option<DatabaseDir>,
    /// One store per data type, indexed by [`DataType::slot`].
    stores: Vec<RwLock<TypeStore>>,
    pub(crate) sequences: SequenceAllocator,
    pub(crate) stats: DatabaseStats,
    closed: AtomicBool,
    /// Serializes GC cycles.
    pub(crate) gc_lock: Mutex<()>,
}

impl Shared {
    pub(crate) fn store(&self, data_type: DataType) -> &RwLock<TypeStore> {
        &self.stores[data_type.slot()]
    }

    pub(crate) fn dir(&self) -> Option<&DatabaseDir> {
        self.dir.as_ref()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The main database handle.
///
/// `Database` is the entry point of PetalDB. It provides:
/// - String, list, hash, set and sorted-set commands
/// - Per-key TTLs for every data type
/// - Background garbage collection of log segments
/// - Recovery from crashes on open
/// - Online backup
///
/// Every data type has its own key space: `b"k"` as a string and `b"k"` as
/// a hash are unrelated keys. Commands take `&self`; the handle is
/// `Send + Sync` and can be shared across threads in an `Arc`.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use petal_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// db.set(b"greeting", b"hello")?;
/// db.rpush(b"queue", &["job-1", "job-2"])?;
/// assert_eq!(db.get(b"greeting")?, b"hello");
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`:
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// ```
pub struct Database {
    shared: Arc<Shared>,
    /// Background GC thread, if enabled.
    gc: Mutex<Option<GcWorker>>,
}

impl Database {
    /// Opens a database from a directory path with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - A segment is damaged somewhere other than its tail (`RecoveryFailure`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use petal_core::{Config, Database, IoType};
    /// use std::path::Path;
    ///
    /// let config = Config::default()
    ///     .io_type(IoType::MMap)
    ///     .sync_writes(true);
    ///
    /// let db = Database::open_with_config(Path::new("my_database"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let factory = SegmentFactory::on_disk(path, config.io_type, config.max_segment_size);
        let recovered = recover(&dir, &factory, config.index_mode, config.sync_writes)?;
        let last = recovered.report.last_sequence;

        info!(
            path = %path.display(),
            io_type = ?config.io_type,
            index_mode = ?config.index_mode,
            last_sequence = %last,
            "database opened"
        );
        Self::start(
            config,
            Some(dir),
            recovered.stores,
            SequenceAllocator::starting_after(last),
        )
    }

    /// Opens an in-memory database with the default configuration.
    ///
    /// Nothing is persisted; the data is gone when the handle is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens an in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        config.validate()?;
        let factory = SegmentFactory::in_memory(config.max_segment_size);
        let stores = DataType::ALL
            .iter()
            .map(|t| {
                let mut store =
                    TypeStore::new(*t, factory.clone(), config.index_mode, config.sync_writes);
                store.ensure_active()?;
                Ok(store)
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Self::start(
            config,
            None,
            stores,
            SequenceAllocator::starting_after(SequenceNumber::default()),
        )
    }

    fn start(
        config: Config,
        dir: Option<DatabaseDir>,
        stores: Vec<TypeStore>,
        sequences: SequenceAllocator,
    ) -> CoreResult<Self> {
        let gc_enabled = !config.gc_interval.is_zero();
        let shared = Arc::new(Shared {
            config,
            dir,
            stores: stores.into_iter().map(RwLock::new).collect(),
            sequences,
            stats: DatabaseStats::new(),
            closed: AtomicBool::new(false),
            gc_lock: Mutex::new(()),
        });
        let worker = if gc_enabled {
            Some(GcWorker::spawn(Arc::clone(&shared))?)
        } else {
            None
        };

        Ok(Self {
            shared,
            gc: Mutex::new(worker),
        })
    }

    // ========================================================================
    // Strings
    // ========================================================================

    /// Sets a string value, clearing any TTL the key had.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.put_string(key, value, 0)
    }

    /// Sets a string value that expires after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a zero `ttl`.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> CoreResult<()> {
        if ttl.is_zero() {
            return Err(CoreError::invalid_operation("set_ex needs a non-zero ttl"));
        }
        self.put_string(key, value, deadline(ttl))
    }

    fn put_string(&self, key: &[u8], value: &[u8], expire_at: u64) -> CoreResult<()> {
        check_key(key)?;
        self.mutate(DataType::String, key, |store| {
            let entry = Entry::put(DataType::String, key, &[], value).with_expire_at(expire_at);
            self.commit(store, vec![entry])
        })
    }

    /// Returns a string value.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key does not exist, `ExpiredKey` if its TTL has
    /// passed.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        let value = self.read(DataType::String, key, |store| {
            store.check_live(key)?;
            let entry = strings(store)?.get(key).ok_or(CoreError::KeyNotFound)?;
            store.value_ref(entry)
        })?;
        self.resolve(value)
    }

    /// Deletes a string key. Deleting a missing key succeeds.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.delete_key(key, DataType::String)
    }

    /// Returns true if the string key exists and has not expired.
    pub fn exists(&self, key: &[u8]) -> CoreResult<bool> {
        self.read(DataType::String, key, |store| {
            Ok(store.index.contains_key(key) && !store.is_expired(key))
        })
    }

    // ========================================================================
    // Lists
    // ========================================================================

    /// Prepends values, one at a time, so the last value ends up first.
    /// Returns the new length.
    pub fn lpush<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> CoreResult<usize> {
        self.push(key, values, true)
    }

    /// Appends values. Returns the new length.
    pub fn rpush<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V]) -> CoreResult<usize> {
        self.push(key, values, false)
    }

    fn push<V: AsRef<[u8]>>(&self, key: &[u8], values: &[V], left: bool) -> CoreResult<usize> {
        check_key(key)?;
        if values.is_empty() {
            return Err(CoreError::invalid_operation("push needs at least one value"));
        }
        self.mutate(DataType::List, key, |store| {
            if store.is_expired(key) {
                return Err(CoreError::ExpiredKey);
            }
            let list = lists(store)?;
            let mut position = if left {
                list.next_left(key)
            } else {
                list.next_right(key)
            };
            let entries = values
                .iter()
                .map(|value| {
                    let entry = Entry::put(
                        DataType::List,
                        key,
                        &encode_position(position),
                        value.as_ref(),
                    );
                    position += if left { -1 } else { 1 };
                    entry
                })
                .collect();
            self.commit(store, entries)?;
            Ok(lists(store)?.len(key))
        })
    }

    /// Removes and returns the first element.
    pub fn lpop(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.pop(key, true)
    }

    /// Removes and returns the last element.
    pub fn rpop(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.pop(key, false)
    }

    fn pop(&self, key: &[u8], left: bool) -> CoreResult<Vec<u8>> {
        let value = self.mutate(DataType::List, key, |store| {
            store.check_live(key)?;
            let list = lists(store)?;
            let end = if left { list.first(key) } else { list.last(key) };
            let (position, entry) = end.ok_or(CoreError::KeyNotFound)?;
            let emptied = list.len(key) == 1;
            let value = store.read_value(entry)?;

            let tombstone = if emptied {
                Entry::clear(DataType::List, key)
            } else {
                Entry::remove(DataType::List, key, &encode_position(position))
            };
            self.commit(store, vec![tombstone])?;
            Ok(value)
        })?;
        self.shared.stats.record_delete(1);
        Ok(value)
    }

    /// Number of elements.
    pub fn llen(&self, key: &[u8]) -> CoreResult<usize> {
        self.read(DataType::List, key, |store| {
            store.check_live(key)?;
            Ok(lists(store)?.len(key))
        })
    }

    /// Element at `index`; negative indices count from the end.
    pub fn lindex(&self, key: &[u8], index: i64) -> CoreResult<Vec<u8>> {
        let value = self.read(DataType::List, key, |store| {
            store.check_live(key)?;
            let list = lists(store)?;
            let rank = normalize_index(index, list.len(key)).ok_or(CoreError::KeyNotFound)?;
            let (_, entry) = list.nth(key, rank).ok_or(CoreError::KeyNotFound)?;
            store.value_ref(entry)
        })?;
        self.resolve(value)
    }

    /// Elements from `start` to `stop` inclusive; negative indices count from
    /// the end. An out-of-range window is empty.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        let refs = self.read(DataType::List, key, |store| {
            store.check_live(key)?;
            let list = lists(store)?;
            let Some((start, stop)) = normalize_range(start, stop, list.len(key)) else {
                return Ok(Vec::new());
            };
            list.range(key, start, stop)
                .into_iter()
                .map(|(_, entry)| store.value_ref(entry))
                .collect::<CoreResult<Vec<ValueRef>>>()
        })?;
        refs.into_iter().map(|r| self.resolve(r)).collect()
    }

    // ========================================================================
    // Hashes
    // ========================================================================

    /// Sets a field. Returns true if the field is new.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> CoreResult<bool> {
        check_key(key)?;
        self.mutate(DataType::Hash, key, |store| {
            let expired = store.is_expired(key);
            let is_new = expired || hashes(store)?.get(key, field).is_none();
            let mut entry = Entry::put(DataType::Hash, key, field, value);
            if expired {
                entry = entry.with_reset();
            }
            self.commit(store, vec![entry])?;
            Ok(is_new)
        })
    }

    /// Returns a field value.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> CoreResult<Vec<u8>> {
        let value = self.read(DataType::Hash, key, |store| {
            store.check_live(key)?;
            let entry = hashes(store)?
                .get(key, field)
                .ok_or(CoreError::KeyNotFound)?;
            store.value_ref(entry)
        })?;
        self.resolve(value)
    }

    /// Removes a field. Returns true if it existed. Removing the last field
    /// deletes the key.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> CoreResult<bool> {
        self.mutate(DataType::Hash, key, |store| {
            if !store.index.contains_key(key) {
                return Ok(false);
            }
            if store.is_expired(key) {
                return Err(CoreError::ExpiredKey);
            }
            let hash = hashes(store)?;
            if hash.get(key, field).is_none() {
                return Ok(false);
            }
            let tombstone = if hash.len(key) == 1 {
                Entry::clear(DataType::Hash, key)
            } else {
                Entry::remove(DataType::Hash, key, field)
            };
            self.commit(store, vec![tombstone])?;
            self.shared.stats.record_delete(1);
            Ok(true)
        })
    }

    /// Returns true if the field exists on a live key.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> CoreResult<bool> {
        self.read(DataType::Hash, key, |store| {
            Ok(!store.is_expired(key) && hashes(store)?.get(key, field).is_some())
        })
    }

    /// Number of fields.
    pub fn hlen(&self, key: &[u8]) -> CoreResult<usize> {
        self.read(DataType::Hash, key, |store| {
            store.check_live(key)?;
            Ok(hashes(store)?.len(key))
        })
    }

    /// All fields and values, sorted by field.
    pub fn hgetall(&self, key: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let refs = self.read(DataType::Hash, key, |store| {
            store.check_live(key)?;
            let mut fields: Vec<_> = hashes(store)?.fields(key).collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            fields
                .into_iter()
                .map(|(field, entry)| Ok((field.clone(), store.value_ref(entry)?)))
                .collect::<CoreResult<Vec<_>>>()
        })?;
        refs.into_iter()
            .map(|(field, r)| Ok((field, self.resolve(r)?)))
            .collect()
    }

    // ========================================================================
    // Sets
    // ========================================================================

    /// Adds members. Returns how many were not already present.
    pub fn sadd<M: AsRef<[u8]>>(&self, key: &[u8], members: &[M]) -> CoreResult<usize> {
        check_key(key)?;
        if members.is_empty() {
            return Err(CoreError::invalid_operation("sadd needs at least one member"));
        }
        self.mutate(DataType::Set, key, |store| {
            let expired = store.is_expired(key);
            let set = sets(store)?;
            let mut seen = BTreeSet::new();
            let mut entries = Vec::new();
            for member in members.iter().map(AsRef::as_ref) {
                if !seen.insert(member) || (!expired && set.contains(key, member)) {
                    continue;
                }
                let mut entry = Entry::put(DataType::Set, key, member, &[]);
                if expired && entries.is_empty() {
                    entry = entry.with_reset();
                }
                entries.push(entry);
            }
            let added = entries.len();
            if added > 0 {
                self.commit(store, entries)?;
            }
            Ok(added)
        })
    }

    /// Removes members. Returns how many were present. Removing the last
    /// member deletes the key.
    pub fn srem<M: AsRef<[u8]>>(&self, key: &[u8], members: &[M]) -> CoreResult<usize> {
        let removed = self.mutate(DataType::Set, key, |store| {
            if !store.index.contains_key(key) {
                return Ok(0);
            }
            if store.is_expired(key) {
                return Err(CoreError::ExpiredKey);
            }
            let set = sets(store)?;
            let present: BTreeSet<&[u8]> = members
                .iter()
                .map(AsRef::as_ref)
                .filter(|m| set.contains(key, m))
                .collect();
            if present.is_empty() {
                return Ok(0);
            }

            let entries = if present.len() == set.len(key) {
                vec![Entry::clear(DataType::Set, key)]
            } else {
                present
                    .iter()
                    .map(|m| Entry::remove(DataType::Set, key, m))
                    .collect()
            };
            let count = present.len();
            self.commit(store, entries)?;
            Ok(count)
        })?;
        self.shared.stats.record_delete(removed as u64);
        Ok(removed)
    }

    /// Returns true if `member` belongs to the live set at `key`.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> CoreResult<bool> {
        self.read(DataType::Set, key, |store| {
            Ok(!store.is_expired(key) && sets(store)?.contains(key, member))
        })
    }

    /// All members, sorted.
    pub fn smembers(&self, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        self.read(DataType::Set, key, |store| {
            store.check_live(key)?;
            let mut members: Vec<Vec<u8>> = sets(store)?.members(key).cloned().collect();
            members.sort();
            Ok(members)
        })
    }

    /// Number of members.
    pub fn scard(&self, key: &[u8]) -> CoreResult<usize> {
        self.read(DataType::Set, key, |store| {
            store.check_live(key)?;
            Ok(sets(store)?.len(key))
        })
    }

    // ========================================================================
    // Sorted sets
    // ========================================================================

    /// Adds a member or updates its score. Returns true if the member is new.
    ///
    /// Re-adding a member with its current score writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a NaN score.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> CoreResult<bool> {
        check_key(key)?;
        if score.is_nan() {
            return Err(CoreError::invalid_operation("zadd score is NaN"));
        }
        self.mutate(DataType::ZSet, key, |store| {
            let expired = store.is_expired(key);
            let current = if expired {
                None
            } else {
                zsets(store)?.score(key, member)
            };
            if current == Some(score) {
                return Ok(false);
            }

            let mut entry = Entry::put(DataType::ZSet, key, member, &encode_score(score));
            if expired {
                entry = entry.with_reset();
            }
            self.commit(store, vec![entry])?;
            Ok(current.is_none())
        })
    }

    /// Score of a member.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> CoreResult<f64> {
        let score = self.read(DataType::ZSet, key, |store| {
            store.check_live(key)?;
            zsets(store)?
                .score(key, member)
                .ok_or(CoreError::KeyNotFound)
        })?;
        self.shared.stats.record_read(8);
        Ok(score)
    }

    /// Removes a member. Returns true if it existed. Removing the last member
    /// deletes the key.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> CoreResult<bool> {
        self.mutate(DataType::ZSet, key, |store| {
            if !store.index.contains_key(key) {
                return Ok(false);
            }
            if store.is_expired(key) {
                return Err(CoreError::ExpiredKey);
            }
            let zset = zsets(store)?;
            if zset.get(key, member).is_none() {
                return Ok(false);
            }
            let tombstone = if zset.len(key) == 1 {
                Entry::clear(DataType::ZSet, key)
            } else {
                Entry::remove(DataType::ZSet, key, member)
            };
            self.commit(store, vec![tombstone])?;
            self.shared.stats.record_delete(1);
            Ok(true)
        })
    }

    /// Number of members.
    pub fn zcard(&self, key: &[u8]) -> CoreResult<usize> {
        self.read(DataType::ZSet, key, |store| {
            store.check_live(key)?;
            Ok(zsets(store)?.len(key))
        })
    }

    /// Members ranked `start..=stop` by ascending score (ties by member).
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        self.zrange_by(key, start, stop, false)
    }

    /// Members ranked `start..=stop` by descending score.
    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        self.zrange_by(key, start, stop, true)
    }

    fn zrange_by(&self, key: &[u8], start: i64, stop: i64, rev: bool) -> CoreResult<Vec<Vec<u8>>> {
        self.read(DataType::ZSet, key, |store| {
            store.check_live(key)?;
            let zset = zsets(store)?;
            let Some((start, stop)) = normalize_range(start, stop, zset.len(key)) else {
                return Ok(Vec::new());
            };
            let ranked = if rev {
                zset.rev_range(key, start, stop)
            } else {
                zset.range(key, start, stop)
            };
            Ok(ranked.into_iter().map(|(member, _)| member).collect())
        })
    }

    // ========================================================================
    // Keys of any type
    // ========================================================================

    /// Sets a key's TTL, replacing any previous one.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for a missing key, `ExpiredKey` if it already expired.
    pub fn expire(&self, key: &[u8], ttl: Duration, data_type: DataType) -> CoreResult<()> {
        self.mutate(data_type, key, |store| {
            store.check_live(key)?;
            self.commit(store, vec![Entry::expire(data_type, key, deadline(ttl))])
        })
    }

    /// Removes a key's TTL. Returns true if it had one.
    pub fn persist(&self, key: &[u8], data_type: DataType) -> CoreResult<bool> {
        self.mutate(data_type, key, |store| {
            store.check_live(key)?;
            if store.expires.get(key).is_none() {
                return Ok(false);
            }
            self.commit(store, vec![Entry::expire(data_type, key, 0)])?;
            Ok(true)
        })
    }

    /// Remaining TTL in whole seconds (rounded), or `None` without a TTL.
    pub fn ttl(&self, key: &[u8], data_type: DataType) -> CoreResult<Option<u64>> {
        self.read(data_type, key, |store| {
            store.check_live(key)?;
            let now = unix_millis();
            Ok(store
                .expires
                .get(key)
                .map(|record| (record.expire_at.saturating_sub(now) + 500) / 1000))
        })
    }

    /// Deletes a key of any type, including an expired one. Deleting a
    /// missing key succeeds without writing.
    pub fn delete_key(&self, key: &[u8], data_type: DataType) -> CoreResult<()> {
        let deleted = self.mutate(data_type, key, |store| {
            if !store.index.contains_key(key) && store.expires.get(key).is_none() {
                return Ok(false);
            }
            self.commit(store, vec![Entry::clear(data_type, key)])?;
            Ok(true)
        })?;
        if deleted {
            self.shared.stats.record_delete(1);
        }
        Ok(())
    }

    /// Number of keys of one type, expired ones included.
    pub fn key_count(&self, data_type: DataType) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.shared.store(data_type).read().index.key_count())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Copies the database into the empty directory `dest`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for an in-memory database or a non-empty `dest`.
    pub fn backup(&self, dest: &Path) -> CoreResult<BackupInfo> {
        self.ensure_open()?;
        self.track(backup::backup(&self.shared, dest))
    }

    /// Makes every appended entry durable.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        for data_type in DataType::ALL {
            self.track(self.shared.store(data_type).read().sync())?;
        }
        Ok(())
    }

    /// Runs one GC cycle now with the configured ratio.
    pub fn compact(&self) -> CoreResult<GcReport> {
        self.compact_with_ratio(self.shared.config.gc_ratio)
    }

    /// Runs one GC cycle now, compacting segments whose discard ratio
    /// exceeds `ratio`.
    pub fn compact_with_ratio(&self, ratio: f64) -> CoreResult<GcReport> {
        self.ensure_open()?;
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(CoreError::invalid_operation(format!(
                "gc ratio must be within [0, 1], got {ratio}"
            )));
        }
        Ok(gc::run_cycle(&self.shared, ratio))
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Discard accounting of every segment, by type and file id.
    pub fn segment_stats(&self) -> CoreResult<Vec<SegmentStats>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        for data_type in DataType::ALL {
            let store = self.shared.store(data_type).read();
            for segment in store.segments() {
                let fid = segment.file_id();
                let stat = store.discard.stat(fid);
                out.push(SegmentStats {
                    data_type,
                    file_id: fid,
                    size: segment.size()?,
                    discarded: stat.map_or(0, |s| s.discarded),
                    ratio: stat.map_or(0.0, |s| s.ratio()),
                    active: fid == store.active_file_id(),
                });
            }
        }
        Ok(out)
    }

    /// Sequence number of the most recent write.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.shared.sequences.last_allocated()
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Directory of the database, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.shared.dir().map(DatabaseDir::path)
    }

    /// Returns true until [`Database::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.is_closed()
    }

    /// Stops the GC thread and syncs every segment. Later commands fail with
    /// `DatabaseClosed`. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(worker) = self.gc.lock().take() {
            worker.stop();
        }

        let mut result = Ok(());
        for data_type in DataType::ALL {
            if let Err(err) = self.shared.store(data_type).read().sync() {
                error!(data_type = %data_type, error = %err, "sync on close failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        info!("database closed");
        result
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn ensure_open(&self) -> CoreResult<()> {
        if self.shared.is_closed() {
            return Err(CoreError::DatabaseClosed);
        }
        Ok(())
    }

    /// Runs a command on `key` under the type's read lock.
    ///
    /// A command that finds `key` expired takes the write lock afterwards to
    /// count the key's bytes as discarded.
    fn read<T>(
        &self,
        data_type: DataType,
        key: &[u8],
        f: impl FnOnce(&TypeStore) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        let lock = self.shared.store(data_type);
        let result = f(&lock.read());
        if matches!(result, Err(CoreError::ExpiredKey)) && !lock.read().expiry_accounted(key) {
            lock.write().account_expired(key);
        }
        self.track(result)
    }

    fn mutate<T>(
        &self,
        data_type: DataType,
        key: &[u8],
        f: impl FnOnce(&mut TypeStore) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        let mut store = self.shared.store(data_type).write();
        let result = f(&mut store);
        if matches!(result, Err(CoreError::ExpiredKey)) {
            store.account_expired(key);
        }
        drop(store);
        self.track(result)
    }

    fn commit(&self, store: &mut TypeStore, entries: Vec<Entry>) -> CoreResult<()> {
        let count = entries.len() as u64;
        let bytes = store.write(entries, &self.shared.sequences)?;
        self.shared.stats.record_write(count, bytes);
        Ok(())
    }

    fn resolve(&self, value: ValueRef) -> CoreResult<Vec<u8>> {
        let value = self.track(value.resolve())?;
        self.shared.stats.record_read(value.len() as u64);
        Ok(value)
    }

    fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        match &result {
            Err(CoreError::ExpiredKey) => self.shared.stats.record_expired_hit(),
            Err(CoreError::KeyNotFound) | Ok(_) => {}
            Err(_) => self.shared.stats.record_error(),
        }
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(error = %err, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn check_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::EmptyKey);
    }
    Ok(())
}

/// Absolute expiry time in unix milliseconds, never 0 (which means no TTL).
fn deadline(ttl: Duration) -> u64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    unix_millis().saturating_add(ttl_ms).max(1)
}

fn shape_mismatch(data_type: DataType) -> CoreError {
    CoreError::invalid_operation(format!("{data_type} store holds another index shape"))
}

fn strings(store: &TypeStore) -> CoreResult<&crate::index::StringIndex> {
    store
        .index
        .as_string()
        .ok_or_else(|| shape_mismatch(store.data_type))
}

fn lists(store: &TypeStore) -> CoreResult<&crate::index::ListIndex> {
    store
        .index
        .as_list()
        .ok_or_else(|| shape_mismatch(store.data_type))
}

fn hashes(store: &TypeStore) -> CoreResult<&crate::index::HashIndex> {
    store
        .index
        .as_hash()
        .ok_or_else(|| shape_mismatch(store.data_type))
}

fn sets(store: &TypeStore) -> CoreResult<&crate::index::SetIndex> {
    store
        .index
        .as_set()
        .ok_or_else(|| shape_mismatch(store.data_type))
}

fn zsets(store: &TypeStore) -> CoreResult<&crate::index::ZSetIndex> {
    store
        .index
        .as_zset()
        .ok_or_else(|| shape_mismatch(store.data_type))
}
