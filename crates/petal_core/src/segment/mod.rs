//! Log segments.
//!
//! Each data type owns a chain of append-only segment files. Exactly one of
//! them, the one with the highest file id, accepts appends; the rest are
//! sealed and only ever read until GC rewrites their live entries and
//! deletes them.
//!
//! Segment files live directly in the database directory and are named
//! `<type>_<file id, 9 digits>.seg`, e.g. `hash_000000003.seg`.

mod factory;
mod iter;
mod log;

pub use factory::SegmentFactory;
pub use iter::{EntryIterator, ScannedEntry};
pub use log::LogSegment;

use crate::types::{DataType, FileId};

/// Extension of segment files.
pub const SEGMENT_SUFFIX: &str = ".seg";

/// Extension of GC output that has not been promoted yet.
pub const TEMP_SUFFIX: &str = ".seg.tmp";

/// File name of a segment.
#[must_use]
pub fn segment_file_name(data_type: DataType, file_id: FileId) -> String {
    format!("{}_{}{SEGMENT_SUFFIX}", data_type.name(), file_id)
}

/// Parses a segment file name; temporary and foreign files yield `None`.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<(DataType, FileId)> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    let (type_name, id) = stem.split_once('_')?;
    if id.len() != 9 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let data_type = DataType::from_name(type_name)?;
    let file_id = id.parse().ok()?;
    Some((data_type, FileId::new(file_id)))
}
