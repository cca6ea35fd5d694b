//! Creating, opening and retiring segment files.

use crate::dir::sync_directory;
use crate::error::CoreResult;
use crate::segment::log::LogSegment;
use crate::segment::{segment_file_name, TEMP_SUFFIX};
use crate::types::{DataType, FileId, IoType};
use petal_storage::{FileBackend, InMemoryBackend, MmapBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Builds segments with the database's I/O strategy.
///
/// A factory without a directory produces in-memory segments.
#[derive(Debug, Clone)]
pub struct SegmentFactory {
    dir: Option<PathBuf>,
    io_type: IoType,
    max_segment_size: u64,
}

impl SegmentFactory {
    /// Factory for segments under `dir`.
    pub fn on_disk(dir: &Path, io_type: IoType, max_segment_size: u64) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            io_type,
            max_segment_size,
        }
    }

    /// Factory for in-memory segments.
    pub fn in_memory(max_segment_size: u64) -> Self {
        Self {
            dir: None,
            io_type: IoType::FileIo,
            max_segment_size,
        }
    }

    /// Rotation threshold.
    #[must_use]
    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    /// Returns true when segments cannot grow past their initial capacity.
    #[must_use]
    pub fn is_fixed_capacity(&self) -> bool {
        self.dir.is_some() && self.io_type == IoType::MMap
    }

    /// Returns true for in-memory databases.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.dir.is_none()
    }

    /// Opens a segment that will accept appends. Memory-mapped segments are
    /// pre-sized to the rotation threshold, or to `min_capacity` if larger.
    pub fn open_writable(
        &self,
        data_type: DataType,
        file_id: FileId,
        min_capacity: u64,
    ) -> CoreResult<LogSegment> {
        let capacity = self.max_segment_size.max(min_capacity);
        self.open_at(data_type, file_id, segment_file_name(data_type, file_id), capacity)
    }

    /// Opens a sealed segment for reading.
    pub fn open_sealed(&self, data_type: DataType, file_id: FileId) -> CoreResult<LogSegment> {
        self.open_at(data_type, file_id, segment_file_name(data_type, file_id), 0)
    }

    /// Creates a GC output segment under its temporary name.
    pub fn create_temp(
        &self,
        data_type: DataType,
        file_id: FileId,
        capacity: u64,
    ) -> CoreResult<LogSegment> {
        let name = format!("{}{TEMP_SUFFIX}", segment_file_name(data_type, file_id));
        if let Some(path) = self.dir.as_ref().map(|d| d.join(&name)) {
            // Leftover from an interrupted cycle.
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        self.open_at(data_type, file_id, name, capacity)
    }

    /// Syncs a temporary segment and moves it to its final name.
    pub fn promote(&self, temp: LogSegment) -> CoreResult<LogSegment> {
        temp.sync()?;
        let Some(temp_path) = temp.path().map(Path::to_path_buf) else {
            return Ok(temp);
        };

        let data_type = temp.data_type();
        let file_id = temp.file_id();
        drop(temp);

        let final_path = temp_path.with_file_name(segment_file_name(data_type, file_id));
        fs::rename(&temp_path, &final_path)?;
        if let Some(dir) = &self.dir {
            sync_directory(dir)?;
        }
        self.open_sealed(data_type, file_id)
    }

    /// Deletes a segment's file, if it has one.
    pub fn remove(&self, segment: &LogSegment) -> CoreResult<()> {
        if let Some(path) = segment.path() {
            fs::remove_file(path)?;
            debug!(segment = %segment, "removed segment file");
        }
        Ok(())
    }

    /// Deletes a temporary segment's file, ignoring a file that is already gone.
    pub fn discard_temp(&self, segment: LogSegment) {
        let path = segment.path().map(Path::to_path_buf);
        drop(segment);
        if let Some(path) = path {
            let _ = fs::remove_file(path);
        }
    }

    fn open_at(
        &self,
        data_type: DataType,
        file_id: FileId,
        name: String,
        capacity: u64,
    ) -> CoreResult<LogSegment> {
        let Some(dir) = &self.dir else {
            return Ok(LogSegment::new(
                data_type,
                file_id,
                None,
                Box::new(InMemoryBackend::new()),
            ));
        };

        let path = dir.join(name);
        let backend: Box<dyn StorageBackend> = match self.io_type {
            IoType::FileIo => Box::new(FileBackend::open(&path)?),
            IoType::MMap => Box::new(MmapBackend::open(&path, capacity)?),
        };
        Ok(LogSegment::new(data_type, file_id, Some(path), backend))
    }
}
