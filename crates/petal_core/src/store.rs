//! Per-data-type state: segments, index, expire table and discard stats.
//!
//! Every effect an entry has on derived state goes through
//! [`TypeStore::apply`], whether the entry was just appended by a command or
//! is being replayed at startup.

use crate::discard::DiscardTracker;
use crate::entry::{Entry, EntryOp};
use crate::error::{CoreError, CoreResult};
use crate::expire::{ExpireRecord, ExpireTable};
use crate::index::{IndexEntry, Location, TypeIndex};
use crate::segment::{LogSegment, SegmentFactory};
use crate::types::{unix_millis, DataType, FileId, IndexMode, SequenceNumber};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Hands out database-wide entry sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct SequenceAllocator {
    next: AtomicU64,
}

impl SequenceAllocator {
    /// Starts after the highest sequence found on disk.
    pub(crate) fn starting_after(last: SequenceNumber) -> Self {
        Self {
            next: AtomicU64::new(last.as_u64() + 1),
        }
    }

    pub(crate) fn allocate(&self) -> SequenceNumber {
        SequenceNumber::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn last_allocated(&self) -> SequenceNumber {
        SequenceNumber::new(self.next.load(Ordering::SeqCst).saturating_sub(1))
    }
}

/// What replay has seen of entries that left no trace in the index.
///
/// Segments may be replayed out of sequence order once GC has rewritten
/// entries into newer files, so an entry is only applied when it is newer
/// than everything already applied to the same slot, TTL or key.
#[derive(Debug, Default)]
pub(crate) struct ReplayMemo {
    removed: HashMap<(Vec<u8>, Vec<u8>), SequenceNumber>,
    cleared: HashMap<Vec<u8>, SequenceNumber>,
    ttl_dropped: HashMap<Vec<u8>, SequenceNumber>,
}

impl ReplayMemo {
    fn admits(&self, store: &TypeStore, entry: &Entry) -> bool {
        let seq = entry.sequence;
        if self.cleared.get(&entry.key).is_some_and(|c| *c >= seq) {
            return false;
        }
        match entry.op {
            EntryOp::Put | EntryOp::Remove => {
                let in_index = store
                    .index
                    .get(&entry.key, &entry.sub_key)
                    .map(|e| e.sequence);
                let removed = self
                    .removed
                    .get(&(entry.key.clone(), entry.sub_key.clone()))
                    .copied();
                in_index.max(removed).map_or(true, |latest| latest < seq)
            }
            EntryOp::Expire => self.ttl_floor(store, &entry.key).map_or(true, |f| f < seq),
            EntryOp::Clear => true,
        }
    }

    fn ttl_floor(&self, store: &TypeStore, key: &[u8]) -> Option<SequenceNumber> {
        let current = store.expires.get(key).map(|r| r.sequence);
        current.max(self.ttl_dropped.get(key).copied())
    }

    fn note(&mut self, entry: &Entry) {
        let bump = |map: &mut HashMap<Vec<u8>, SequenceNumber>, key: &[u8]| {
            let slot = map.entry(key.to_vec()).or_default();
            *slot = (*slot).max(entry.sequence);
        };
        match entry.op {
            EntryOp::Remove => {
                let slot = self
                    .removed
                    .entry((entry.key.clone(), entry.sub_key.clone()))
                    .or_default();
                *slot = (*slot).max(entry.sequence);
            }
            EntryOp::Clear => bump(&mut self.cleared, &entry.key),
            EntryOp::Put if entry.flags.is_reset() => bump(&mut self.cleared, &entry.key),
            EntryOp::Expire if entry.expire_at == 0 => bump(&mut self.ttl_dropped, &entry.key),
            EntryOp::Put if entry.data_type == DataType::String && entry.expire_at == 0 => {
                bump(&mut self.ttl_dropped, &entry.key)
            }
            _ => {}
        }
    }
}

/// A value to resolve once the type lock is released.
#[derive(Debug)]
pub(crate) enum ValueRef {
    Cached(Vec<u8>),
    Stored(Arc<LogSegment>, Location),
}

impl ValueRef {
    pub(crate) fn resolve(self) -> CoreResult<Vec<u8>> {
        match self {
            Self::Cached(value) => Ok(value),
            Self::Stored(segment, location) => {
                let (entry, size) = segment.read_entry(location.offset)?;
                if size != location.size as usize {
                    return Err(CoreError::corrupt_record(format!(
                        "entry at {segment}:{} is {size} bytes, index says {}",
                        location.offset, location.size
                    )));
                }
                Ok(entry.value)
            }
        }
    }
}

/// All state of one data type, guarded by one lock in the database.
#[derive(Debug)]
pub(crate) struct TypeStore {
    pub(crate) data_type: DataType,
    pub(crate) index: TypeIndex,
    pub(crate) expires: ExpireTable,
    pub(crate) discard: DiscardTracker,
    /// Tombstones GC copied forward and counts as live, by location.
    retained: HashMap<Location, SequenceNumber>,
    segments: BTreeMap<FileId, Arc<LogSegment>>,
    active: FileId,
    next_file_id: AtomicU32,
    factory: SegmentFactory,
    index_mode: IndexMode,
    sync_writes: bool,
}

impl TypeStore {
    /// Creates a store without segments; recovery or
    /// [`TypeStore::ensure_active`] adds them.
    pub(crate) fn new(
        data_type: DataType,
        factory: SegmentFactory,
        index_mode: IndexMode,
        sync_writes: bool,
    ) -> Self {
        Self {
            data_type,
            index: TypeIndex::new(data_type),
            expires: ExpireTable::new(),
            discard: DiscardTracker::new(),
            retained: HashMap::new(),
            segments: BTreeMap::new(),
            active: FileId::new(0),
            next_file_id: AtomicU32::new(1),
            factory,
            index_mode,
            sync_writes,
        }
    }

    // ========================================================================
    // Segments
    // ========================================================================

    /// Adds a recovered segment. The highest file id added becomes active.
    pub(crate) fn attach_segment(&mut self, segment: LogSegment) {
        let fid = segment.file_id();
        self.discard.register(fid);
        self.segments.insert(fid, Arc::new(segment));
        if fid >= self.active {
            self.active = fid;
        }
        self.next_file_id
            .fetch_max(fid.as_u32() + 1, Ordering::SeqCst);
    }

    /// Creates the first segment of a fresh data type.
    pub(crate) fn ensure_active(&mut self) -> CoreResult<()> {
        if self.segments.contains_key(&self.active) {
            return Ok(());
        }
        let fid = self.allocate_file_id();
        let segment = self.factory.open_writable(self.data_type, fid, 0)?;
        self.attach_segment(segment);
        Ok(())
    }

    pub(crate) fn allocate_file_id(&self) -> FileId {
        FileId::new(self.next_file_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn factory(&self) -> &SegmentFactory {
        &self.factory
    }

    pub(crate) fn active_file_id(&self) -> FileId {
        self.active
    }

    pub(crate) fn segment(&self, file_id: FileId) -> CoreResult<Arc<LogSegment>> {
        self.segments.get(&file_id).cloned().ok_or_else(|| {
            CoreError::corrupt_record(format!(
                "index points at missing segment {}_{file_id}",
                self.data_type
            ))
        })
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &Arc<LogSegment>> {
        self.segments.values()
    }

    /// Swaps a compacted segment for its replacement.
    pub(crate) fn replace_segment(
        &mut self,
        old: FileId,
        new: Option<LogSegment>,
    ) -> Option<Arc<LogSegment>> {
        if let Some(segment) = new {
            let fid = segment.file_id();
            self.segments.insert(fid, Arc::new(segment));
        }
        self.discard.remove(old);
        self.segments.remove(&old)
    }

    /// Seals the active segment if `len` more bytes would push it past the
    /// rotation threshold. An oversized entry goes into an empty segment
    /// unless the segment has a fixed capacity.
    fn rotate_for(&mut self, len: u64) -> CoreResult<()> {
        let active = self.segment(self.active)?;
        let size = active.size()?;
        if size + len <= self.factory.max_segment_size()
            || (size == 0 && !self.factory.is_fixed_capacity())
        {
            return Ok(());
        }

        active.sync()?;
        let fid = self.allocate_file_id();
        let segment = self.factory.open_writable(self.data_type, fid, len)?;
        debug!(data_type = %self.data_type, sealed = %active.file_id(), active = %fid, "rotated segment");
        self.discard.register(fid);
        self.segments.insert(fid, Arc::new(segment));
        self.active = fid;

        if size == 0 {
            self.replace_segment(active.file_id(), None);
            self.factory.remove(&active)?;
        }
        Ok(())
    }

    /// Syncs the active segment.
    pub(crate) fn sync(&self) -> CoreResult<()> {
        self.segment(self.active)?.sync()
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Assigns sequences to `entries` and appends them to the active segment
    /// in one write, rotating first if they would not fit.
    pub(crate) fn append(
        &mut self,
        entries: &mut [Entry],
        sequences: &SequenceAllocator,
    ) -> CoreResult<Vec<Location>> {
        let mut buf = Vec::new();
        let mut sizes = Vec::with_capacity(entries.len());
        for entry in entries.iter_mut() {
            entry.sequence = sequences.allocate();
            let bytes = entry.encode();
            sizes.push(bytes.len() as u32);
            buf.extend_from_slice(&bytes);
        }

        self.rotate_for(buf.len() as u64)?;
        let segment = self.segment(self.active)?;
        let mut offset = segment.append(&buf)?;
        if self.sync_writes {
            segment.sync()?;
        }

        let file_id = segment.file_id();
        let mut locations = Vec::with_capacity(sizes.len());
        for (entry, size) in entries.iter().zip(sizes) {
            self.discard
                .record_append(file_id, u64::from(size), entry.sequence);
            locations.push(Location {
                file_id,
                offset,
                size,
            });
            offset += u64::from(size);
        }
        Ok(locations)
    }

    /// Appends and applies entries, the whole write path of a command.
    pub(crate) fn write(
        &mut self,
        mut entries: Vec<Entry>,
        sequences: &SequenceAllocator,
    ) -> CoreResult<u64> {
        let locations = self.append(&mut entries, sequences)?;
        let mut bytes = 0;
        for (entry, location) in entries.iter().zip(locations) {
            bytes += u64::from(location.size);
            self.apply(entry, location, None)?;
        }
        Ok(bytes)
    }

    /// Applies an entry stored at `location` to the index, the expire table
    /// and the discard stats.
    ///
    /// During replay `memo` filters out entries superseded by something
    /// already applied; returns false for such entries.
    pub(crate) fn apply(
        &mut self,
        entry: &Entry,
        location: Location,
        memo: Option<&mut ReplayMemo>,
    ) -> CoreResult<bool> {
        if let Some(memo) = memo {
            if !memo.admits(self, entry) {
                self.discard_at(location);
                return Ok(false);
            }
            memo.note(entry);
            let ttl_floor = memo.ttl_floor(self, &entry.key);
            self.apply_admitted(entry, location, ttl_floor)?;
        } else {
            self.apply_admitted(entry, location, None)?;
        }
        Ok(true)
    }

    fn apply_admitted(
        &mut self,
        entry: &Entry,
        location: Location,
        ttl_floor: Option<SequenceNumber>,
    ) -> CoreResult<()> {
        let seq = entry.sequence;
        let accounted = self.expiry_accounted(&entry.key);
        match entry.op {
            EntryOp::Put => {
                if entry.flags.is_reset() {
                    self.clear_key_before(&entry.key, seq);
                }
                let indexed = IndexEntry {
                    location,
                    sequence: seq,
                    value: (self.index_mode == IndexMode::KeyValue).then(|| entry.value.clone()),
                };
                let replaced = self
                    .index
                    .insert(&entry.key, &entry.sub_key, &entry.value, indexed)?;
                if let Some(old) = replaced.filter(|_| !accounted) {
                    self.discard_at(old.location);
                }
                if self.data_type == DataType::String && ttl_floor.map_or(true, |f| f <= seq) {
                    let ttl = (entry.expire_at != 0).then_some(ExpireRecord {
                        expire_at: entry.expire_at,
                        sequence: seq,
                        origin: None,
                        accounted: false,
                    });
                    self.replace_ttl(&entry.key, seq, ttl);
                }
            }
            EntryOp::Remove => {
                let removed = self.index.remove(&entry.key, &entry.sub_key);
                if let Some(old) = removed.filter(|_| !accounted) {
                    self.discard_at(old.location);
                }
                self.discard_at(location);
            }
            EntryOp::Clear => {
                self.clear_key_before(&entry.key, seq);
                self.discard_at(location);
            }
            EntryOp::Expire if entry.expire_at == 0 => {
                self.replace_ttl(&entry.key, seq, None);
                self.discard_at(location);
            }
            EntryOp::Expire => {
                let ttl = ExpireRecord {
                    expire_at: entry.expire_at,
                    sequence: seq,
                    origin: Some(location),
                    accounted: false,
                };
                self.replace_ttl(&entry.key, seq, Some(ttl));
            }
        }
        Ok(())
    }

    fn clear_key_before(&mut self, key: &[u8], seq: SequenceNumber) {
        let accounted = self.expiry_accounted(key);
        for old in self.index.clear_before(key, seq) {
            if !accounted {
                self.discard_at(old.location);
            }
        }
        if self.expires.get(key).is_some_and(|r| r.sequence < seq) {
            self.drop_ttl(key);
        }
    }

    fn replace_ttl(&mut self, key: &[u8], seq: SequenceNumber, ttl: Option<ExpireRecord>) {
        if self.expires.get(key).is_some_and(|r| r.sequence > seq) {
            if let Some(origin) = ttl.and_then(|r| r.origin) {
                self.discard_at(origin);
            }
            return;
        }
        self.drop_ttl(key);
        if let Some(record) = ttl {
            self.expires.set(key, record);
        }
    }

    fn drop_ttl(&mut self, key: &[u8]) {
        let origin = self
            .expires
            .remove(key)
            .filter(|r| !r.accounted)
            .and_then(|r| r.origin);
        if let Some(origin) = origin {
            self.discard_at(origin);
        }
    }

    pub(crate) fn discard_at(&mut self, location: Location) {
        self.discard
            .record_discard(location.file_id, u64::from(location.size));
    }

    /// Counts the slots and TTL entry of an expired key as discarded.
    ///
    /// Expired keys keep their index slots until GC reclaims them, so this is
    /// what makes their segments GC candidates. Each key is counted once;
    /// later overwrites and clears skip the bytes counted here. Returns true
    /// if the key was counted now.
    pub(crate) fn account_expired(&mut self, key: &[u8]) -> bool {
        let origin = match self.expires.get_mut(key) {
            Some(record) if !record.accounted && record.is_expired(unix_millis()) => {
                record.accounted = true;
                record.origin
            }
            _ => return false,
        };
        for location in self.index.locations(key) {
            self.discard_at(location);
        }
        if let Some(origin) = origin {
            self.discard_at(origin);
        }
        true
    }

    /// Counts every expired key not counted yet. Returns how many were.
    pub(crate) fn account_expired_keys(&mut self) -> usize {
        let keys = self.expires.expired_keys(unix_millis());
        keys.iter()
            .filter(|key| self.account_expired(key.as_slice()))
            .count()
    }

    /// Keeps a tombstone GC copied to `location` counted as live.
    pub(crate) fn retain_tombstone(&mut self, location: Location, sequence: SequenceNumber) {
        self.retained.insert(location, sequence);
    }

    /// Forgets the retained tombstones of a segment GC is replacing.
    pub(crate) fn forget_retained(&mut self, file_id: FileId) {
        self.retained.retain(|location, _| location.file_id != file_id);
    }

    /// Discards retained tombstones that no longer shadow anything. Returns
    /// how many were released.
    pub(crate) fn release_tombstones(&mut self) -> usize {
        let released: Vec<Location> = self
            .retained
            .iter()
            .filter(|(location, seq)| {
                self.discard
                    .shadow_floor(location.file_id)
                    .map_or(true, |floor| floor >= **seq)
            })
            .map(|(location, _)| *location)
            .collect();
        for location in &released {
            self.retained.remove(location);
            self.discard_at(*location);
        }
        released.len()
    }

    /// Returns true if `key` expired and its bytes were already counted.
    pub(crate) fn expiry_accounted(&self, key: &[u8]) -> bool {
        self.expires.get(key).is_some_and(|r| r.accounted)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Fails with `KeyNotFound` or `ExpiredKey` unless `key` is live.
    pub(crate) fn check_live(&self, key: &[u8]) -> CoreResult<()> {
        if !self.index.contains_key(key) {
            return Err(CoreError::KeyNotFound);
        }
        if self.expires.is_expired(key, unix_millis()) {
            return Err(CoreError::ExpiredKey);
        }
        Ok(())
    }

    /// Returns true if `key` has slots but its TTL has passed.
    pub(crate) fn is_expired(&self, key: &[u8]) -> bool {
        self.expires.is_expired(key, unix_millis())
    }

    /// Locates the value of an index entry.
    pub(crate) fn value_ref(&self, entry: &IndexEntry) -> CoreResult<ValueRef> {
        match &entry.value {
            Some(value) => Ok(ValueRef::Cached(value.clone())),
            None => Ok(ValueRef::Stored(
                self.segment(entry.location.file_id)?,
                entry.location,
            )),
        }
    }

    /// Reads a value while holding the lock, for read-modify-write commands.
    pub(crate) fn read_value(&self, entry: &IndexEntry) -> CoreResult<Vec<u8>> {
        self.value_ref(entry)?.resolve()
    }
}
