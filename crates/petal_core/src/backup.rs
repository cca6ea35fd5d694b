//! Online backup to a directory.
//!
//! A backup is a plain copy of the segment files, so the destination is
//! itself a database that [`Database::open`](crate::Database::open) can
//! recover.
//!
//! ## Consistency
//!
//! Every type's read lock is held, in data-type order, for the whole copy.
//! Writers and GC repointing need the write lock, so they wait, and the set of
//! files and their contents match one point in time. Readers keep going. Only the logical bytes of each
//! segment are copied, which drops the zero padding of memory-mapped files.

use crate::database::Shared;
use crate::dir::sync_directory;
use crate::error::{CoreError, CoreResult};
use crate::segment::{segment_file_name, LogSegment};
use crate::types::DataType;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Bytes copied per read.
const COPY_CHUNK: u64 = 1 << 20;

/// What a backup copied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupInfo {
    /// Segment files written.
    pub segments: usize,
    /// Bytes written.
    pub bytes: u64,
}

pub(crate) fn backup(shared: &Shared, dest: &Path) -> CoreResult<BackupInfo> {
    if shared.dir().is_none() {
        return Err(CoreError::invalid_operation(
            "in-memory databases cannot be backed up",
        ));
    }
    prepare_destination(dest)?;

    let guards: Vec<_> = DataType::ALL
        .iter()
        .map(|t| shared.store(*t).read())
        .collect();

    let mut info = BackupInfo::default();
    for store in &guards {
        store.sync()?;
        for segment in store.segments() {
            info.bytes += copy_segment(segment, dest)?;
            info.segments += 1;
        }
    }
    sync_directory(dest)?;
    drop(guards);

    info!(
        dest = %dest.display(),
        segments = info.segments,
        bytes = info.bytes,
        "backup complete"
    );
    Ok(info)
}

fn prepare_destination(dest: &Path) -> CoreResult<()> {
    if dest.exists() {
        if !dest.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "backup destination is not a directory: {}",
                dest.display()
            )));
        }
        if fs::read_dir(dest)?.next().is_some() {
            return Err(CoreError::invalid_operation(format!(
                "backup destination is not empty: {}",
                dest.display()
            )));
        }
    }
    fs::create_dir_all(dest)?;
    Ok(())
}

fn copy_segment(segment: &LogSegment, dest: &Path) -> CoreResult<u64> {
    let size = segment.size()?;
    let name = segment_file_name(segment.data_type(), segment.file_id());
    let mut out = File::create(dest.join(name))?;

    let mut offset = 0;
    while offset < size {
        let len = COPY_CHUNK.min(size - offset);
        out.write_all(&segment.read_at(offset, len as usize)?)?;
        offset += len;
    }
    out.sync_all()?;
    Ok(size)
}
