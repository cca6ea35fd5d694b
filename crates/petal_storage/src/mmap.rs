//! Memory-mapped storage backend.
//!
//! The file is pre-sized to a fixed capacity and mapped read-write once.
//! Appends copy into the mapping; `sync` flushes the dirty pages. The logical
//! size lives in memory only: a reopened file reports its full on-disk length
//! until the caller truncates it to the end of valid data.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A memory-mapped storage backend with fixed capacity.
///
/// # Example
///
/// ```no_run
/// use petal_storage::{StorageBackend, MmapBackend};
/// use std::path::Path;
///
/// let mut backend = MmapBackend::open(Path::new("hash_000000001.seg"), 1 << 20).unwrap();
/// backend.append(b"mapped").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct MmapBackend {
    path: PathBuf,
    file: File,
    map: MmapMut,
    size: u64,
    capacity: u64,
}

impl MmapBackend {
    /// Opens or creates a mapped file of at least `capacity` bytes.
    ///
    /// An existing file larger than `capacity` keeps its length and is mapped
    /// whole. The logical size starts at the file's length before any
    /// pre-sizing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, resized or mapped.
    pub fn open(path: &Path, capacity: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();
        let capacity = capacity.max(size).max(1);
        if size < capacity {
            file.set_len(capacity)?;
        }

        let map = Self::map(&file)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            size,
            capacity,
        })
    }

    #[allow(unsafe_code)]
    fn map(file: &File) -> StorageResult<MmapMut> {
        // SAFETY: the database directory is held under an exclusive lock, so no
        // other process resizes or writes the file while it is mapped.
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(map)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the fixed capacity of the mapping.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl StorageBackend for MmapBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(self.map[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        let end = offset + data.len() as u64;

        if end > self.capacity {
            return Err(StorageError::CapacityExceeded {
                needed: end,
                capacity: self.capacity,
            });
        }

        self.map[offset as usize..end as usize].copy_from_slice(data);
        self.size = end;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.map.flush_async()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::truncate_past_end(new_size, self.size));
        }

        // Zero the dropped tail so a later reopen never sees stale bytes.
        self.map[new_size as usize..self.size as usize].fill(0);
        self.map.flush()?;
        self.size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mmap_presizes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let backend = MmapBackend::open(&path, 4096).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.capacity(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn mmap_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = MmapBackend::open(&path, 4096).unwrap();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);

        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn mmap_capacity_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = MmapBackend::open(&path, 8).unwrap();
        backend.append(b"12345678").unwrap();

        let result = backend.append(b"9");
        assert!(matches!(
            result,
            Err(StorageError::CapacityExceeded { needed: 9, capacity: 8 })
        ));
    }

    #[test]
    fn mmap_read_past_logical_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = MmapBackend::open(&path, 4096).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn mmap_reopen_reports_full_length_until_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = MmapBackend::open(&path, 1024).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = MmapBackend::open(&path, 1024).unwrap();
        assert_eq!(backend.size().unwrap(), 1024);
        assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");

        backend.truncate(7).unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 7);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"durable!");
    }

    #[test]
    fn mmap_truncate_zeroes_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = MmapBackend::open(&path, 64).unwrap();
            backend.append(b"keepdrop").unwrap();
            backend.truncate(4).unwrap();
            backend.sync().unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"keep");
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mmap_opens_file_written_by_file_backend() {
        use crate::FileBackend;

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"portable").unwrap();
            backend.sync().unwrap();
        }

        let backend = MmapBackend::open(&path, 256).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"portable");
    }
}
