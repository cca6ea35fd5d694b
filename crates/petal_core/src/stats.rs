//! Database statistics and telemetry.
//!
//! Provides counters for monitoring a running database and a per-segment
//! report of discard accounting.
//!
//! # Usage
//!
//! ```rust,ignore
//! use petal_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! db.set(b"k", b"v")?;
//!
//! let stats = db.stats();
//! println!("Writes: {}", stats.writes);
//! println!("GC cycles: {}", stats.gc_cycles);
//! ```

use crate::types::{DataType, FileId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Database statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values only ever increase.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Command counters
    /// Read commands served.
    reads: AtomicU64,
    /// Entries appended by commands.
    writes: AtomicU64,
    /// Keys, fields, members or elements removed.
    deletes: AtomicU64,
    /// Commands that hit an expired key.
    expired_hits: AtomicU64,

    // Bytes counters
    /// Bytes appended by commands.
    bytes_written: AtomicU64,
    /// Value bytes returned by reads.
    bytes_read: AtomicU64,

    // GC counters
    /// Completed GC cycles.
    gc_cycles: AtomicU64,
    /// Segments rewritten and deleted by GC.
    segments_compacted: AtomicU64,
    /// Bytes freed by deleting compacted segments.
    bytes_reclaimed: AtomicU64,

    /// Errors returned to callers or logged by GC.
    errors: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, entries: u64, bytes: u64) {
        self.writes.fetch_add(entries, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_hit(&self) {
        self.expired_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_cycle(&self, segments: u64, bytes: u64) {
        self.gc_cycles.fetch_add(1, Ordering::Relaxed);
        self.segments_compacted.fetch_add(segments, Ordering::Relaxed);
        self.bytes_reclaimed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            reads: load(&self.reads),
            writes: load(&self.writes),
            deletes: load(&self.deletes),
            expired_hits: load(&self.expired_hits),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            gc_cycles: load(&self.gc_cycles),
            segments_compacted: load(&self.segments_compacted),
            bytes_reclaimed: load(&self.bytes_reclaimed),
            errors: load(&self.errors),
        }
    }
}

/// A point-in-time snapshot of database statistics.
///
/// Unlike `DatabaseStats`, this is a simple struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Read commands served.
    pub reads: u64,
    /// Entries appended by commands.
    pub writes: u64,
    /// Keys, fields, members or elements removed.
    pub deletes: u64,
    /// Commands that hit an expired key.
    pub expired_hits: u64,
    /// Bytes appended by commands.
    pub bytes_written: u64,
    /// Value bytes returned by reads.
    pub bytes_read: u64,
    /// Completed GC cycles.
    pub gc_cycles: u64,
    /// Segments rewritten and deleted by GC.
    pub segments_compacted: u64,
    /// Bytes freed by deleting compacted segments.
    pub bytes_reclaimed: u64,
    /// Errors returned to callers or logged by GC.
    pub errors: u64,
}

/// Discard accounting of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    /// Data type of the segment.
    pub data_type: DataType,
    /// File id of the segment.
    pub file_id: FileId,
    /// Bytes in the segment.
    pub size: u64,
    /// Obsolete bytes.
    pub discarded: u64,
    /// `discarded / size`.
    pub ratio: f64,
    /// Whether the segment accepts appends.
    pub active: bool,
}
