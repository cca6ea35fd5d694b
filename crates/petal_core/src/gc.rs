//! Garbage collection of log segments.
//!
//! A segment whose discard ratio passes the configured threshold is
//! rewritten: its live entries are copied into a fresh segment, the index is
//! repointed, and the old file is deleted.
//!
//! ## Invariants
//!
//! - GC **MUST NOT** change logical state: a read before and after a cycle
//!   returns the same value
//! - Live entries keep their sequence numbers when they move
//! - The index is repointed only for entries whose location is still the
//!   one that was copied; anything superseded meanwhile stays superseded
//! - A tombstone is kept while an older segment with obsolete bytes may hold
//!   a version it shadows. A kept tombstone counts as live in its new segment
//!   until a later cycle finds nothing left for it to shadow
//! - Expired keys are reclaimed by a durable `Clear` before the segment
//!   holding their data is deleted
//!
//! ## Phases
//!
//! ```text
//! plan     type write lock: count expired keys and released tombstones as
//!          discarded, pick candidates
//! scan     short read locks, in batches: classify every entry
//! copy     no lock: append live bytes to <type>_<fid>.seg.tmp, sync, rename
//! repoint  type write lock: reclaim expired keys, repoint, swap segments
//! delete   no lock: remove the old file
//! ```

use crate::database::Shared;
use crate::entry::{Entry, EntryOp};
use crate::error::CoreResult;
use crate::index::Location;
use crate::segment::{LogSegment, ScannedEntry, SegmentFactory};
use crate::store::TypeStore;
use crate::types::{unix_millis, DataType, FileId, SequenceNumber};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Entries classified per read-lock acquisition.
const SCAN_BATCH: usize = 1024;

/// Result of one GC cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Segments rewritten and deleted.
    pub segments_compacted: usize,
    /// Live entries copied into new segments.
    pub entries_moved: usize,
    /// Bytes freed (old size minus new size).
    pub bytes_reclaimed: u64,
    /// Expired keys cleared during the cycle.
    pub expired_keys_reclaimed: usize,
    /// Segments left for the next cycle after an error.
    pub failures: usize,
}

struct SegmentOutcome {
    entries_moved: usize,
    bytes_reclaimed: u64,
    expired_keys: usize,
}

enum Liveness {
    Live,
    Dead,
    Expired,
}

/// Runs one cycle over every data type and returns what it did.
///
/// Cycles are serialized; a cycle started while another runs waits for it.
pub(crate) fn run_cycle(shared: &Shared, ratio: f64) -> GcReport {
    let _cycle = shared.gc_lock.lock();
    let mut report = GcReport::default();

    for data_type in DataType::ALL {
        let candidates = {
            let mut store = shared.store(data_type).write();
            let expired = store.account_expired_keys();
            let released = store.release_tombstones();
            if expired > 0 || released > 0 {
                debug!(data_type = %data_type, expired, released, "updated discard stats");
            }
            store.discard.candidates(ratio, store.active_file_id())
        };

        for fid in candidates {
            if shared.is_closed() {
                break;
            }
            let segment = format!("{data_type}_{fid}");
            match compact_segment(shared, data_type, fid) {
                Ok(outcome) => {
                    debug!(
                        segment = %segment,
                        moved = outcome.entries_moved,
                        reclaimed = outcome.bytes_reclaimed,
                        "compacted segment"
                    );
                    report.segments_compacted += 1;
                    report.entries_moved += outcome.entries_moved;
                    report.bytes_reclaimed += outcome.bytes_reclaimed;
                    report.expired_keys_reclaimed += outcome.expired_keys;
                }
                Err(err) => {
                    warn!(
                        segment = %segment,
                        error = %err,
                        "gc failed, segment kept for next cycle"
                    );
                    report.failures += 1;
                    shared.stats.record_error();
                }
            }
        }
    }

    shared
        .stats
        .record_gc_cycle(report.segments_compacted as u64, report.bytes_reclaimed);
    if report.segments_compacted > 0 || report.failures > 0 {
        info!(
            segments = report.segments_compacted,
            moved = report.entries_moved,
            reclaimed = report.bytes_reclaimed,
            expired = report.expired_keys_reclaimed,
            failures = report.failures,
            "gc cycle finished"
        );
    } else {
        debug!("gc cycle found nothing to compact");
    }
    report
}

fn compact_segment(shared: &Shared, data_type: DataType, fid: FileId) -> CoreResult<SegmentOutcome> {
    let lock = shared.store(data_type);
    let (segment, factory, new_fid) = {
        let store = lock.read();
        (
            store.segment(fid)?,
            store.factory().clone(),
            store.allocate_file_id(),
        )
    };
    let old_size = segment.size()?;

    let (live, expired) = scan(lock, &segment)?;
    let output = if live.is_empty() {
        None
    } else {
        Some(copy_live(&factory, &segment, new_fid, &live)?)
    };
    let new_size = match &output {
        Some(seg) => seg.size()?,
        None => 0,
    };

    let mut store = lock.write();
    let expired_keys = match reclaim_expired(&mut store, shared, &expired) {
        Ok(count) => count,
        Err(err) => {
            drop(store);
            if let Some(seg) = output {
                if let Err(remove_err) = factory.remove(&seg) {
                    warn!(segment = %seg, error = %remove_err, "could not remove unused gc output");
                }
            }
            return Err(err);
        }
    };

    store.forget_retained(fid);
    let mut offset = 0;
    for scanned in &live {
        let size = scanned.size as u32;
        let from = Location {
            file_id: fid,
            offset: scanned.offset,
            size,
        };
        let to = Location {
            file_id: new_fid,
            offset,
            size,
        };
        offset += u64::from(size);

        store
            .discard
            .record_append(new_fid, u64::from(size), scanned.entry.sequence);
        let entry = &scanned.entry;
        if entry.is_tombstone() {
            store.retain_tombstone(to, entry.sequence);
        } else if !repoint(&mut store, entry, from, to) || store.expiry_accounted(&entry.key) {
            store.discard_at(to);
        }
    }
    let old = store.replace_segment(fid, output);
    drop(store);

    if let Some(old) = old {
        if let Err(err) = factory.remove(&old) {
            // Replay ignores the stale copies by sequence.
            warn!(segment = %old, error = %err, "could not delete compacted segment");
        }
    }

    Ok(SegmentOutcome {
        entries_moved: live.len(),
        bytes_reclaimed: old_size.saturating_sub(new_size),
        expired_keys,
    })
}

/// Classifies every entry of `segment`, taking the read lock once per batch.
fn scan(
    lock: &RwLock<TypeStore>,
    segment: &LogSegment,
) -> CoreResult<(Vec<ScannedEntry>, BTreeSet<Vec<u8>>)> {
    let fid = segment.file_id();
    let mut live = Vec::new();
    let mut expired = BTreeSet::new();
    let mut iter = segment.iter()?;

    loop {
        let batch = iter
            .by_ref()
            .take(SCAN_BATCH)
            .collect::<CoreResult<Vec<_>>>()?;
        if batch.is_empty() {
            break;
        }

        let store = lock.read();
        let now = unix_millis();
        let tombstone_floor = store.discard.shadow_floor(fid);
        for scanned in batch {
            let location = Location {
                file_id: fid,
                offset: scanned.offset,
                size: scanned.size as u32,
            };
            match liveness(&store, &scanned.entry, location, now, tombstone_floor) {
                Liveness::Live => live.push(scanned),
                Liveness::Expired => {
                    expired.insert(scanned.entry.key);
                }
                Liveness::Dead => {}
            }
        }
    }
    Ok((live, expired))
}

fn liveness(
    store: &TypeStore,
    entry: &Entry,
    location: Location,
    now: u64,
    tombstone_floor: Option<SequenceNumber>,
) -> Liveness {
    match entry.op {
        EntryOp::Put => {
            let current = store
                .index
                .get(&entry.key, &entry.sub_key)
                .is_some_and(|indexed| indexed.location == location);
            if !current {
                Liveness::Dead
            } else if store.expires.is_expired(&entry.key, now) {
                Liveness::Expired
            } else {
                Liveness::Live
            }
        }
        EntryOp::Expire if entry.expire_at != 0 => match store.expires.get(&entry.key) {
            Some(record) if record.origin == Some(location) => {
                if record.is_expired(now) {
                    Liveness::Expired
                } else {
                    Liveness::Live
                }
            }
            _ => Liveness::Dead,
        },
        // Tombstones: an older segment with obsolete bytes may still hold
        // what they shadow.
        _ => {
            if tombstone_floor.is_some_and(|min| min < entry.sequence) {
                Liveness::Live
            } else {
                Liveness::Dead
            }
        }
    }
}

/// Writes the raw bytes of `live` into a new segment under a temporary name,
/// then publishes it.
fn copy_live(
    factory: &SegmentFactory,
    source: &LogSegment,
    file_id: FileId,
    live: &[ScannedEntry],
) -> CoreResult<LogSegment> {
    let total: usize = live.iter().map(|s| s.size).sum();
    let mut buf = Vec::with_capacity(total);
    for scanned in live {
        buf.extend_from_slice(&source.read_at(scanned.offset, scanned.size)?);
    }

    let temp = factory.create_temp(source.data_type(), file_id, total as u64)?;
    let temp_path = temp.path().map(Path::to_path_buf);
    if let Err(err) = temp.append(&buf) {
        factory.discard_temp(temp);
        return Err(err);
    }
    factory.promote(temp).map_err(|err| {
        if let Some(path) = temp_path {
            let _ = std::fs::remove_file(path);
        }
        err
    })
}

/// Appends a durable `Clear` for every key in `keys` that is still expired.
fn reclaim_expired(
    store: &mut TypeStore,
    shared: &Shared,
    keys: &BTreeSet<Vec<u8>>,
) -> CoreResult<usize> {
    let now = unix_millis();
    let clears: Vec<Entry> = keys
        .iter()
        .filter(|key| store.expires.is_expired(key, now) && store.index.contains_key(key))
        .map(|key| Entry::clear(store.data_type, key))
        .collect();
    if clears.is_empty() {
        return Ok(0);
    }

    let count = clears.len();
    let bytes = store.write(clears, &shared.sequences)?;
    store.sync()?;
    shared.stats.record_write(count as u64, bytes);
    shared.stats.record_delete(count as u64);
    Ok(count)
}

/// Moves the index reference of a copied entry to its new location.
/// Returns false when the copy is already superseded.
fn repoint(store: &mut TypeStore, entry: &Entry, from: Location, to: Location) -> bool {
    match entry.op {
        EntryOp::Put => match store.index.get_mut(&entry.key, &entry.sub_key) {
            Some(indexed) if indexed.location == from => {
                indexed.location = to;
                true
            }
            _ => false,
        },
        EntryOp::Expire => match store.expires.get_mut(&entry.key) {
            Some(record) if record.origin == Some(from) => {
                record.origin = Some(to);
                true
            }
            _ => false,
        },
        EntryOp::Remove | EntryOp::Clear => false,
    }
}

/// Background thread running a GC cycle every `gc_interval`.
pub(crate) struct GcWorker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl GcWorker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> CoreResult<Self> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let interval = shared.config.gc_interval;
        let ratio = shared.config.gc_ratio;

        let handle = thread::Builder::new()
            .name("petal-gc".to_string())
            .spawn(move || {
                debug!(?interval, ratio, "gc thread started");
                loop {
                    match signal.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            run_cycle(&shared, ratio);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("gc thread stopped");
            })?;

        Ok(Self { shutdown, handle })
    }

    /// Signals the thread and waits for a running cycle to finish.
    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(());
        if self.handle.join().is_err() {
            error!("gc thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::Database;
    use crate::types::IoType;
    use std::time::Duration;
    use tempfile::tempdir;

    fn small_segments() -> Config {
        Config::default()
            .max_segment_size(512)
            .gc_interval(Duration::ZERO)
            .gc_ratio(0.3)
    }

    #[test]
    fn compaction_keeps_values_and_frees_space() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(temp.path(), small_segments()).unwrap();
        for round in 0..10 {
            for i in 0..8 {
                let key = format!("key-{i}");
                db.set(key.as_bytes(), format!("value-{round}-{i}").as_bytes())
                    .unwrap();
            }
        }

        let report = db.compact().unwrap();
        assert!(report.segments_compacted > 0);
        assert!(report.bytes_reclaimed > 0);
        assert_eq!(report.failures, 0);
        for i in 0..8 {
            let key = format!("key-{i}");
            assert_eq!(
                db.get(key.as_bytes()).unwrap(),
                format!("value-9-{i}").into_bytes()
            );
        }
    }

    #[test]
    fn compacted_state_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open_with_config(temp.path(), small_segments()).unwrap();
            for i in 0..40 {
                db.hset(b"h", format!("f{}", i % 5).as_bytes(), format!("v{i}").as_bytes())
                    .unwrap();
            }
            db.hdel(b"h", b"f0").unwrap();
            db.compact().unwrap();
            db.close().unwrap();
        }

        let db = Database::open_with_config(temp.path(), small_segments()).unwrap();
        assert_eq!(db.hlen(b"h").unwrap(), 4);
        assert!(!db.hexists(b"h", b"f0").unwrap());
        assert_eq!(db.hget(b"h", b"f4").unwrap(), b"v39");
    }

    #[test]
    fn expired_keys_are_reclaimed() {
        let db = Database::open_in_memory_with_config(small_segments()).unwrap();
        for i in 0..20 {
            db.sadd(format!("s{i}").as_bytes(), &["a", "b"]).unwrap();
            db.srem(format!("s{i}").as_bytes(), &["b"]).unwrap();
            db.expire(format!("s{i}").as_bytes(), Duration::from_millis(1), DataType::Set)
                .unwrap();
        }
        // Fill more segments so the expired ones are not active.
        for i in 0..20 {
            db.sadd(b"live", &[format!("m{i}")]).unwrap();
        }
        thread::sleep(Duration::from_millis(5));

        let report = db.compact().unwrap();
        assert!(report.expired_keys_reclaimed > 0);
        assert!(matches!(
            db.smembers(b"s0"),
            Err(crate::CoreError::KeyNotFound) | Err(crate::CoreError::ExpiredKey)
        ));
        assert_eq!(db.scard(b"live").unwrap(), 20);
    }

    #[test]
    fn expired_keys_make_their_segments_candidates() {
        let db = Database::open_in_memory_with_config(small_segments()).unwrap();
        for i in 0..10 {
            let key = format!("h{i}");
            db.hset(key.as_bytes(), b"f", b"v").unwrap();
            db.expire(key.as_bytes(), Duration::from_millis(20), DataType::Hash)
                .unwrap();
        }
        for i in 0..20 {
            db.hset(b"live", format!("f{i}").as_bytes(), b"v").unwrap();
        }
        thread::sleep(Duration::from_millis(60));

        // Nothing reads the expired keys before the cycle.
        let report = db.compact_with_ratio(0.5).unwrap();
        assert!(report.segments_compacted > 0);
        assert!(report.expired_keys_reclaimed > 0);
        assert!(matches!(db.hlen(b"h0"), Err(crate::CoreError::KeyNotFound)));
        assert_eq!(db.hlen(b"live").unwrap(), 20);
    }

    #[test]
    fn kept_tombstones_are_not_rewritten_every_cycle() {
        let temp = tempdir().unwrap();
        let key = |i: usize| format!("k{i:02}");
        {
            let db = Database::open_with_config(temp.path(), small_segments()).unwrap();
            for i in 0..30 {
                db.set(key(i).as_bytes(), b"value").unwrap();
            }
            for i in 0..10 {
                db.delete(key(i).as_bytes()).unwrap();
            }
            for i in 30..40 {
                db.set(key(i).as_bytes(), b"value").unwrap();
            }

            assert!(db.compact_with_ratio(0.3).unwrap().segments_compacted > 0);
            let later: Vec<GcReport> = (0..4)
                .map(|_| db.compact_with_ratio(0.3).unwrap())
                .collect();
            for report in &later {
                assert!(
                    report.entries_moved == 0 || report.bytes_reclaimed > 0,
                    "cycle rewrote a segment without reclaiming anything: {report:?}"
                );
            }
            assert_eq!(later[3].segments_compacted, 0);
        }

        let db = Database::open_with_config(temp.path(), small_segments()).unwrap();
        for i in 0..10 {
            assert!(matches!(db.get(key(i).as_bytes()), Err(crate::CoreError::KeyNotFound)));
        }
        for i in 10..40 {
            assert_eq!(db.get(key(i).as_bytes()).unwrap(), b"value");
        }
    }

    #[test]
    fn removed_keys_stay_removed_after_compaction_and_reopen() {
        let temp = tempdir().unwrap();
        let config = small_segments().io_type(IoType::MMap);
        {
            let db = Database::open_with_config(temp.path(), config.clone()).unwrap();
            db.set(b"gone", b"first").unwrap();
            for i in 0..30 {
                db.set(format!("filler-{i}").as_bytes(), &[7u8; 24]).unwrap();
            }
            db.delete(b"gone").unwrap();
            for i in 0..30 {
                db.delete(format!("filler-{i}").as_bytes()).unwrap();
            }
            db.compact().unwrap();
        }

        let db = Database::open_with_config(temp.path(), config).unwrap();
        assert!(matches!(db.get(b"gone"), Err(crate::CoreError::KeyNotFound)));
        assert!(!db.exists(b"filler-0").unwrap());
    }

    #[test]
    fn active_segment_is_never_collected() {
        let db = Database::open_in_memory_with_config(small_segments()).unwrap();
        db.set(b"k", b"1").unwrap();
        db.set(b"k", b"2").unwrap();

        let report = db.compact().unwrap();
        assert_eq!(report.segments_compacted, 0);
        assert_eq!(db.get(b"k").unwrap(), b"2");
    }
}
