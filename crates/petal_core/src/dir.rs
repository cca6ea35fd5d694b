//! Database directory management.
//!
//! This module handles the file system layout for PetalDB:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                  # Advisory lock for single-process access
//! ├─ string_000000001.seg  # Segments, one chain per data type
//! ├─ list_000000001.seg
//! ├─ hash_000000002.seg
//! ├─ set_000000001.seg
//! └─ zset_000000001.seg
//! ```
//!
//! The LOCK file ensures only one process opens the database at a time.
//! There is no other metadata: everything else is rebuilt from the segments.

use crate::error::{CoreError, CoreResult};
use crate::segment::{parse_segment_file_name, TEMP_SUFFIX};
use crate::types::{DataType, FileId};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file.
pub const LOCK_FILE: &str = "LOCK";

/// Manages the database directory and its lock.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        // Non-blocking: a second opener fails instead of waiting
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists segment files, grouped by type and sorted by file id.
    pub fn segment_files(&self) -> CoreResult<Vec<(DataType, FileId)>> {
        list_segment_files(&self.path)
    }

    /// Deletes GC output left behind by an interrupted cycle.
    ///
    /// Returns the number of files removed.
    pub fn remove_temp_files(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            sync_directory(&self.path)?;
        }
        Ok(removed)
    }
}

/// Lists the segment files of a database directory without locking it.
///
/// Foreign files are ignored.
pub fn list_segment_files(path: &Path) -> CoreResult<Vec<(DataType, FileId)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if let Some(parsed) = parse_segment_file_name(&entry.file_name().to_string_lossy()) {
            files.push(parsed);
        }
    }
    files.sort();
    Ok(files)
}

/// Syncs a directory so that file creations, renames and deletions in it
/// are durable.
///
/// On Windows, directory fsync is not supported in the same way as Unix;
/// NTFS journaling covers metadata durability there.
#[cfg(unix)]
pub fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

/// Syncs a directory (no-op on this platform).
#[cfg(not(unix))]
pub fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
