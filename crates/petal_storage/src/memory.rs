//! In-memory storage backend for tests and ephemeral databases.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Besides backing `Database::open_in_memory()`, it can carry a shared fault
/// switch: while the switch is on, `append` and `sync` fail with an I/O error.
/// Tests use it to exercise error propagation without touching a disk.
///
/// # Example
///
/// ```rust
/// use petal_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    fault: Option<Arc<AtomicBool>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing data, e.g. a crafted segment image.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            fault: None,
        }
    }

    /// Attaches a fault switch shared with the test driving this backend.
    #[must_use]
    pub fn with_fault_switch(mut self, switch: Arc<AtomicBool>) -> Self {
        self.fault = Some(switch);
        self
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn check_fault(&self, op: &str) -> StorageResult<()> {
        match &self.fault {
            Some(switch) if switch.load(Ordering::SeqCst) => Err(StorageError::Io(
                io::Error::new(io::ErrorKind::Other, format!("injected {op} failure")),
            )),
            _ => Ok(()),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_fault("append")?;
        let data = self.data.get_mut();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_fault("sync")
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let data = self.data.get_mut();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::truncate_past_end(new_size, size));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_append_returns_offsets() {
        let mut backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { offset: 3, len: 10, size: 5 })
        ));
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"preloaded");
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");
        assert!(backend.truncate(6).is_err());
    }

    #[test]
    fn memory_fault_switch_fails_writes_only() {
        let switch = Arc::new(AtomicBool::new(false));
        let mut backend = InMemoryBackend::new().with_fault_switch(Arc::clone(&switch));

        backend.append(b"ok").unwrap();
        switch.store(true, Ordering::SeqCst);

        assert!(matches!(backend.append(b"x"), Err(StorageError::Io(_))));
        assert!(matches!(backend.sync(), Err(StorageError::Io(_))));
        assert_eq!(backend.read_at(0, 2).unwrap(), b"ok");

        switch.store(false, Ordering::SeqCst);
        assert_eq!(backend.append(b"!").unwrap(), 2);
    }

    proptest! {
        #[test]
        fn appended_chunks_read_back(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(backend.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
