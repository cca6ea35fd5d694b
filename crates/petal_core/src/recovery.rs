//! Rebuilding in-memory state from the segments on disk.
//!
//! Every segment of every type is scanned in file order and each entry is
//! fed through [`TypeStore::apply`] with a [`ReplayMemo`], so entries moved
//! by GC into newer files cannot resurrect older state.
//!
//! A damaged entry is tolerated only at the tail of a segment, where it can
//! be the remains of an interrupted append. The segment is truncated to its
//! last intact entry. Damage followed by intact data fails the open with
//! `RecoveryFailure`.
//!
//! The segment with the highest file id becomes active again. GC output can
//! carry a higher id than the segment that was active before the crash, so
//! a torn tail is accepted in any segment, not only the newest.

use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::index::Location;
use crate::segment::{LogSegment, SegmentFactory};
use crate::store::{ReplayMemo, TypeStore};
use crate::types::{DataType, FileId, IndexMode, SequenceNumber};
use tracing::{debug, info, warn};

/// Summary of a recovery, logged on open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments scanned.
    pub segments: usize,
    /// Entries decoded.
    pub entries: u64,
    /// Entries skipped because newer state was already applied.
    pub superseded: u64,
    /// Bytes cut from incomplete tails.
    pub truncated_bytes: u64,
    /// Temporary GC files removed.
    pub temp_files_removed: usize,
    /// Highest sequence number seen.
    pub last_sequence: SequenceNumber,
}

/// Stores rebuilt by [`recover`].
pub(crate) struct Recovered {
    pub(crate) stores: Vec<TypeStore>,
    pub(crate) report: RecoveryReport,
}

/// Replays every segment under `dir`.
///
/// Types without segments get a fresh active segment.
pub(crate) fn recover(
    dir: &DatabaseDir,
    factory: &SegmentFactory,
    index_mode: IndexMode,
    sync_writes: bool,
) -> CoreResult<Recovered> {
    let mut report = RecoveryReport {
        temp_files_removed: dir.remove_temp_files()?,
        ..RecoveryReport::default()
    };
    if report.temp_files_removed > 0 {
        warn!(
            count = report.temp_files_removed,
            "removed leftover GC output"
        );
    }

    let files = dir.segment_files()?;
    let mut stores = Vec::with_capacity(DataType::ALL.len());
    for data_type in DataType::ALL {
        let file_ids: Vec<FileId> = files
            .iter()
            .filter(|(t, _)| *t == data_type)
            .map(|(_, fid)| *fid)
            .collect();

        let mut store = TypeStore::new(data_type, factory.clone(), index_mode, sync_writes);
        replay_type(&mut store, factory, &file_ids, &mut report)?;
        store.ensure_active()?;

        debug!(
            data_type = %data_type,
            segments = file_ids.len(),
            keys = store.index.key_count(),
            ttls = store.expires.len(),
            "recovered data type"
        );
        stores.push(store);
    }

    info!(
        segments = report.segments,
        entries = report.entries,
        superseded = report.superseded,
        truncated_bytes = report.truncated_bytes,
        "recovery complete"
    );
    Ok(Recovered { stores, report })
}

fn replay_type(
    store: &mut TypeStore,
    factory: &SegmentFactory,
    file_ids: &[FileId],
    report: &mut RecoveryReport,
) -> CoreResult<()> {
    let data_type = store.data_type;
    let mut memo = ReplayMemo::default();

    for (i, &fid) in file_ids.iter().enumerate() {
        let is_last = i + 1 == file_ids.len();
        let segment = if is_last {
            factory.open_writable(data_type, fid, 0)?
        } else {
            factory.open_sealed(data_type, fid)?
        };
        store.attach_segment(segment);
        let segment = store.segment(fid)?;

        let end = replay_segment(store, &segment, &mut memo, report)?;
        let end = match end {
            Ok(end) => end,
            Err((offset, err)) => {
                if !segment.is_incomplete_tail(offset)? {
                    return Err(CoreError::recovery_failure(format!(
                        "segment {segment} is damaged at offset {offset}: {err}"
                    )));
                }
                let size = segment.size()?;
                warn!(
                    segment = %segment,
                    offset,
                    dropped = size - offset,
                    error = %err,
                    "truncating incomplete tail"
                );
                report.truncated_bytes += size - offset;
                offset
            }
        };

        // Memory-mapped segments carry zero padding past the last entry.
        if end < segment.size()? {
            segment.truncate(end)?;
        }
        report.segments += 1;
    }

    drop_orphan_ttls(store);
    Ok(())
}

/// Applies the entries of one segment. The outer error is fatal; the inner
/// one reports the offset of an undecodable entry.
fn replay_segment(
    store: &mut TypeStore,
    segment: &LogSegment,
    memo: &mut ReplayMemo,
    report: &mut RecoveryReport,
) -> CoreResult<Result<u64, (u64, CoreError)>> {
    let fid = segment.file_id();
    let mut iter = segment.iter()?;
    while let Some(item) = iter.next() {
        let scanned = match item {
            Ok(scanned) => scanned,
            Err(err) if err.is_corruption() => return Ok(Err((iter.offset(), err))),
            Err(err) => return Err(err),
        };

        let entry = &scanned.entry;
        if entry.data_type != store.data_type {
            return Err(CoreError::recovery_failure(format!(
                "segment {segment} holds a {} entry at offset {}",
                entry.data_type, scanned.offset
            )));
        }

        store
            .discard
            .record_append(fid, scanned.size as u64, entry.sequence);
        let location = Location {
            file_id: fid,
            offset: scanned.offset,
            size: scanned.size as u32,
        };
        if !store.apply(entry, location, Some(memo))? {
            report.superseded += 1;
        }
        report.entries += 1;
        report.last_sequence = report.last_sequence.max(entry.sequence);
    }
    Ok(Ok(iter.offset()))
}

/// An expire entry can outlive the key it belongs to when the key's clear
/// was replayed before it. Such records have nothing to expire.
fn drop_orphan_ttls(store: &mut TypeStore) {
    let orphans: Vec<Vec<u8>> = store
        .expires
        .iter()
        .filter(|(key, _)| !store.index.contains_key(key))
        .map(|(key, _)| key.clone())
        .collect();
    for key in orphans {
        if let Some(origin) = store.expires.remove(&key).and_then(|r| r.origin) {
            store.discard_at(origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::index::encode_position;
    use crate::store::SequenceAllocator;
    use crate::types::{unix_millis, IoType};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_entries(dir: &std::path::Path, io: IoType, entries: Vec<Entry>) -> SequenceNumber {
        let factory = SegmentFactory::on_disk(dir, io, 1 << 20);
        let seqs = SequenceAllocator::starting_after(SequenceNumber::default());
        let data_type = entries[0].data_type;
        let mut store = TypeStore::new(data_type, factory, IndexMode::KeyOnly, false);
        store.ensure_active().unwrap();
        store.write(entries, &seqs).unwrap();
        store.sync().unwrap();
        seqs.last_allocated()
    }

    fn recover_dir(path: &std::path::Path, io: IoType) -> CoreResult<Recovered> {
        let dir = DatabaseDir::open(path, true)?;
        let factory = SegmentFactory::on_disk(path, io, 1 << 20);
        recover(&dir, &factory, IndexMode::KeyOnly, false)
    }

    #[test]
    fn empty_directory_gets_fresh_segments() {
        let temp = tempdir().unwrap();
        let recovered = recover_dir(temp.path(), IoType::FileIo).unwrap();

        assert_eq!(recovered.stores.len(), 5);
        assert_eq!(recovered.report.segments, 0);
        for t in DataType::ALL {
            assert!(temp.path().join(format!("{t}_000000001.seg")).exists());
        }
    }

    #[test]
    fn replay_rebuilds_index_and_sequence() {
        let temp = tempdir().unwrap();
        let last = write_entries(
            temp.path(),
            IoType::FileIo,
            vec![
                Entry::put(DataType::List, b"l", &encode_position(0), b"a"),
                Entry::put(DataType::List, b"l", &encode_position(1), b"b"),
                Entry::remove(DataType::List, b"l", &encode_position(0)),
            ],
        );

        let recovered = recover_dir(temp.path(), IoType::FileIo).unwrap();
        let list = &recovered.stores[DataType::List.slot()];
        assert_eq!(list.index.as_list().unwrap().len(b"l"), 1);
        assert_eq!(recovered.report.last_sequence, last);
        assert_eq!(recovered.report.entries, 3);
    }

    #[test]
    fn mmap_padding_is_not_replayed() {
        let temp = tempdir().unwrap();
        write_entries(
            temp.path(),
            IoType::MMap,
            vec![Entry::put(DataType::Hash, b"h", b"f", b"v")],
        );

        let recovered = recover_dir(temp.path(), IoType::MMap).unwrap();
        let hash = &recovered.stores[DataType::Hash.slot()];
        assert!(hash.index.get(b"h", b"f").is_some());
        assert_eq!(recovered.report.truncated_bytes, 0);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let temp = tempdir().unwrap();
        write_entries(
            temp.path(),
            IoType::FileIo,
            vec![Entry::put(DataType::String, b"k", b"", b"value")],
        );

        let path = temp.path().join("string_000000001.seg");
        let good = std::fs::metadata(&path).unwrap().len();
        let torn = Entry::put(DataType::String, b"k2", b"", b"value2").encode();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn[..torn.len() - 3]).unwrap();
        drop(file);

        let recovered = recover_dir(temp.path(), IoType::FileIo).unwrap();
        let strings = &recovered.stores[DataType::String.slot()];
        assert!(strings.index.get(b"k", b"").is_some());
        assert!(strings.index.get(b"k2", b"").is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good);
    }

    #[test]
    fn damage_before_valid_entries_fails() {
        let temp = tempdir().unwrap();
        write_entries(
            temp.path(),
            IoType::FileIo,
            vec![
                Entry::put(DataType::Set, b"s", b"a", b""),
                Entry::put(DataType::Set, b"s", b"b", b""),
            ],
        );

        let path = temp.path().join("set_000000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[Entry::HEADER_SIZE] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = recover_dir(temp.path(), IoType::FileIo);
        assert!(matches!(result, Err(CoreError::RecoveryFailure { .. })));
    }

    #[test]
    fn inflated_length_before_valid_entries_fails() {
        let temp = tempdir().unwrap();
        write_entries(
            temp.path(),
            IoType::FileIo,
            vec![
                Entry::put(DataType::String, b"a", b"", b"1"),
                Entry::put(DataType::String, b"b", b"", b"2"),
                Entry::put(DataType::String, b"c", b"", b"3"),
            ],
        );

        let path = temp.path().join("string_000000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len() as u64;
        bytes[26] = 0x7F;
        std::fs::write(&path, bytes).unwrap();

        let result = recover_dir(temp.path(), IoType::FileIo);
        assert!(matches!(result, Err(CoreError::RecoveryFailure { .. })));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn cleared_key_keeps_no_ttl() {
        let temp = tempdir().unwrap();
        write_entries(
            temp.path(),
            IoType::FileIo,
            vec![
                Entry::put(DataType::ZSet, b"z", b"m", &crate::index::encode_score(1.0)),
                Entry::expire(DataType::ZSet, b"z", unix_millis() + 60_000),
                Entry::clear(DataType::ZSet, b"z"),
            ],
        );

        let recovered = recover_dir(temp.path(), IoType::FileIo).unwrap();
        let zset = &recovered.stores[DataType::ZSet.slot()];
        assert!(zset.expires.is_empty());
        let stat = zset.discard.stat(FileId::new(1)).unwrap();
        assert_eq!(stat.discarded, stat.total);
    }

    #[test]
    fn leftover_temp_files_are_removed() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("hash_000000009.seg.tmp"), b"partial").unwrap();

        let recovered = recover_dir(temp.path(), IoType::FileIo).unwrap();
        assert_eq!(recovered.report.temp_files_removed, 1);
        assert!(!temp.path().join("hash_000000009.seg.tmp").exists());
    }
}
