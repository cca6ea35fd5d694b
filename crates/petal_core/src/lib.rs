//! # PetalDB Core
//!
//! Core database engine for PetalDB, an embedded key-value store with
//! Redis-like data types over log-structured storage.
//!
//! This crate provides:
//! - String, list, hash, set and sorted-set commands on [`Database`]
//! - Append-only log segments, one chain per data type
//! - In-memory indexes rebuilt from the log on open
//! - Per-key TTLs for every data type
//! - Background garbage collection driven by per-segment discard ratios
//! - Online backup to a directory
//!
//! ## Example
//!
//! ```rust,ignore
//! use petal_core::{Database, DataType};
//! use std::time::Duration;
//!
//! let db = Database::open_in_memory()?;
//! db.hset(b"user:1", b"name", b"ada")?;
//! db.expire(b"user:1", Duration::from_secs(60), DataType::Hash)?;
//! assert_eq!(db.hget(b"user:1", b"name")?, b"ada");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod database;
mod dir;
mod discard;
mod entry;
mod error;
mod expire;
mod gc;
mod index;
mod recovery;
mod segment;
mod stats;
mod store;
mod types;

pub use backup::BackupInfo;
pub use config::Config;
pub use database::Database;
pub use dir::{list_segment_files, sync_directory, DatabaseDir, LOCK_FILE};
pub use discard::{DiscardStat, DiscardTracker};
pub use entry::{Entry, EntryFlags, EntryHeader, EntryOp};
pub use error::{CoreError, CoreResult};
pub use expire::{ExpireRecord, ExpireTable};
pub use gc::GcReport;
pub use index::{
    decode_position, decode_score, encode_position, encode_score, normalize_index,
    normalize_range, HashIndex, IndexEntry, ListIndex, Location, SetIndex, StringIndex,
    TypeIndex, ZSetIndex,
};
pub use recovery::RecoveryReport;
pub use segment::{
    parse_segment_file_name, segment_file_name, EntryIterator, LogSegment, ScannedEntry,
    SegmentFactory, SEGMENT_SUFFIX, TEMP_SUFFIX,
};
pub use stats::{DatabaseStats, SegmentStats, StatsSnapshot};
pub use types::{DataType, FileId, IndexMode, IoType, SequenceNumber};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
