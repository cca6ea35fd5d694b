//! Buffered file I/O storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Capacity of the in-process write buffer.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A file-based storage backend using buffered OS file I/O.
///
/// Appends go through a [`BufWriter`] on an append-mode handle; reads use a
/// second, independent handle so that seeking for a read never moves the
/// write position. A read that touches bytes still sitting in the write
/// buffer drains the buffer first, so `read_at` always observes every
/// completed `append`.
///
/// # Durability
///
/// - `flush()` drains the write buffer into the OS
/// - `sync()` additionally calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use petal_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("string_000000001.seg")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    reader: Mutex<File>,
    /// Logical size, buffered bytes included.
    size: u64,
    /// Bytes already handed to the OS.
    flushed: AtomicU64,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// Existing contents are kept; new appends go after them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let write_handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let read_handle = OpenOptions::new().read(true).open(path)?;

        let size = write_handle.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, write_handle)),
            reader: Mutex::new(read_handle),
            size,
            flushed: AtomicU64::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn drain_writer(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        self.flushed.store(self.size, Ordering::Release);
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        if end > self.flushed.load(Ordering::Acquire) {
            self.drain_writer()?;
        }

        let mut file = self.reader.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(self.size);
        }

        let offset = self.size;
        self.writer.get_mut().write_all(data)?;
        self.size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.drain_writer()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.drain_writer()?;
        self.writer.get_mut().get_ref().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::truncate_past_end(new_size, self.size));
        }

        self.drain_writer()?;
        let writer = self.writer.get_mut();
        writer.get_ref().set_len(new_size)?;
        writer.get_ref().sync_all()?;
        self.size = new_size;
        self.flushed.store(new_size, Ordering::Release);

        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_sees_buffered_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"abc").unwrap();

        // Nothing flushed yet: the bytes only exist in the write buffer
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(backend.read_at(1, 2).unwrap(), b"bc");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3);
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let mut backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);
            assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");

            let offset = backend.append(b"!").unwrap();
            assert_eq!(offset, 15);
            assert_eq!(backend.read_at(11, 5).unwrap(), b"data!");
        }
    }

    #[test]
    fn file_drop_flushes_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"unsynced").unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"unsynced");
    }

    #[test]
    fn file_empty_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"x").unwrap();

        let offset = backend.append(b"").unwrap();
        assert_eq!(offset, 1);
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn file_truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);

        backend.append(b"!").unwrap();
        assert_eq!(backend.read_at(0, 6).unwrap(), b"hello!");
    }

    #[test]
    fn file_truncate_to_larger_size_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();
        assert!(backend.truncate(100).is_err());
    }
}
