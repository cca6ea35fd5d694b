//! A single append-only segment file.

use crate::entry::{Entry, EntryHeader};
use crate::error::{CoreError, CoreResult};
use crate::segment::iter::EntryIterator;
use crate::types::{DataType, FileId};
use parking_lot::RwLock;
use petal_storage::{StorageBackend, StorageError};
use std::fmt;
use std::path::{Path, PathBuf};

/// An append-only container of entries for one data type.
///
/// The backend sits behind its own lock, so holders of an `Arc<LogSegment>`
/// can read without holding the data type's index lock.
pub struct LogSegment {
    data_type: DataType,
    file_id: FileId,
    path: Option<PathBuf>,
    backend: RwLock<Box<dyn StorageBackend>>,
}

impl LogSegment {
    /// Wraps a backend. `path` is `None` for in-memory segments.
    pub fn new(
        data_type: DataType,
        file_id: FileId,
        path: Option<PathBuf>,
        backend: Box<dyn StorageBackend>,
    ) -> Self {
        Self {
            data_type,
            file_id,
            path,
            backend: RwLock::new(backend),
        }
    }

    /// Data type of the entries in this segment.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// File id of this segment.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// On-disk path, if the segment is file backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends encoded entry bytes and returns their offset.
    pub fn append(&self, bytes: &[u8]) -> CoreResult<u64> {
        Ok(self.backend.write().append(bytes)?)
    }

    /// Reads raw bytes.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read().read_at(offset, len)?)
    }

    /// Reads and verifies the entry starting at `offset`.
    ///
    /// Returns the entry and its encoded size.
    pub fn read_entry(&self, offset: u64) -> CoreResult<(Entry, usize)> {
        let backend = self.backend.read();
        let header = backend
            .read_at(offset, Entry::HEADER_SIZE)
            .map_err(|e| self.short_read(offset, e))?;
        let size = EntryHeader::parse(&header)?.entry_size();
        let data = backend
            .read_at(offset, size)
            .map_err(|e| self.short_read(offset, e))?;
        let entry = Entry::decode(&data)?;
        Ok((entry, size))
    }

    fn short_read(&self, offset: u64, err: StorageError) -> CoreError {
        match err {
            StorageError::ReadPastEnd { .. } => CoreError::corrupt_record(format!(
                "entry at {}:{offset} runs past the end of the segment",
                self
            )),
            other => other.into(),
        }
    }

    /// Current size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Pushes buffered writes to the OS.
    pub fn flush(&self) -> CoreResult<()> {
        Ok(self.backend.write().flush()?)
    }

    /// Makes all appended bytes durable.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.backend.write().sync()?)
    }

    /// Drops everything past `len`.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        Ok(self.backend.write().truncate(len)?)
    }

    /// Iterates the entries in file order.
    pub fn iter(&self) -> CoreResult<EntryIterator<'_>> {
        EntryIterator::new(self)
    }

    /// Decides whether an unreadable entry at `offset` is an incomplete
    /// final write rather than damage in the middle of the log.
    ///
    /// A torn write leaves a prefix of the last append. So it is one when
    /// less than a header remains, or when only zero bytes follow the entry.
    /// An entry claiming to run past the end of the segment is one only if
    /// its header is plausible and no intact entry starts after it; a
    /// damaged length field earlier in the log fails that test.
    pub fn is_incomplete_tail(&self, offset: u64) -> CoreResult<bool> {
        let size = self.size()?;
        if size.saturating_sub(offset) < Entry::HEADER_SIZE as u64 {
            return Ok(true);
        }

        let header = self.read_at(offset, Entry::HEADER_SIZE)?;
        let end = offset.saturating_add(EntryHeader::parse(&header)?.entry_size() as u64);
        if end >= size {
            if !EntryHeader::is_plausible(&header) {
                return Ok(false);
            }
            let rest = self.read_at(offset, (size - offset) as usize)?;
            return Ok(!holds_intact_entry(&rest[1..]));
        }

        const CHUNK: u64 = 64 * 1024;
        let mut pos = end;
        while pos < size {
            let len = CHUNK.min(size - pos) as usize;
            if self.read_at(pos, len)?.iter().any(|&b| b != 0) {
                return Ok(false);
            }
            pos += len as u64;
        }
        Ok(true)
    }
}

/// Returns true if an entry with a valid checksum starts anywhere in `data`.
fn holds_intact_entry(data: &[u8]) -> bool {
    let last_start = data.len().saturating_sub(Entry::HEADER_SIZE - 1);
    (0..last_start).any(|pos| {
        let candidate = &data[pos..];
        EntryHeader::is_plausible(candidate) && Entry::decode(candidate).is_ok()
    })
}

impl fmt::Display for LogSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.data_type, self.file_id)
    }
}

impl fmt::Debug for LogSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSegment")
            .field("data_type", &self.data_type)
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("size", &self.size().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;
    use petal_storage::InMemoryBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn segment() -> LogSegment {
        LogSegment::new(
            DataType::String,
            FileId::new(1),
            None,
            Box::new(InMemoryBackend::new()),
        )
    }

    fn entry(key: &[u8], value: &[u8], seq: u64) -> Entry {
        let mut entry = Entry::put(DataType::String, key, b"", value);
        entry.sequence = SequenceNumber::new(seq);
        entry
    }

    #[test]
    fn append_and_read_entry() {
        let seg = segment();
        let first = entry(b"a", b"1", 1);
        let second = entry(b"b", b"22", 2);

        let off1 = seg.append(&first.encode()).unwrap();
        let off2 = seg.append(&second.encode()).unwrap();

        assert_eq!(off1, 0);
        assert_eq!(off2, first.encoded_size() as u64);

        let (read, size) = seg.read_entry(off2).unwrap();
        assert_eq!(read, second);
        assert_eq!(size, second.encoded_size());
    }

    #[test]
    fn read_entry_past_end_is_corrupt() {
        let seg = segment();
        let bytes = entry(b"a", b"value", 1).encode();
        seg.append(&bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(
            seg.read_entry(0),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn append_failure_surfaces_io_error() {
        let switch = Arc::new(AtomicBool::new(true));
        let backend = InMemoryBackend::new().with_fault_switch(Arc::clone(&switch));
        let seg = LogSegment::new(DataType::Set, FileId::new(3), None, Box::new(backend));

        let err = seg.append(&entry(b"k", b"v", 1).encode()).unwrap_err();
        assert!(matches!(err, CoreError::Storage(StorageError::Io(_))));
        assert_eq!(seg.size().unwrap(), 0);
    }

    #[test]
    fn incomplete_tail_detection() {
        let seg = segment();
        let good = entry(b"a", b"1", 1).encode();
        let next = entry(b"b", b"2", 2).encode();
        seg.append(&good).unwrap();
        seg.append(&next[..next.len() - 3]).unwrap();
        assert!(seg.is_incomplete_tail(good.len() as u64).unwrap());

        // Damaged entry followed by more data is not a tail.
        let seg = segment();
        let mut damaged = next.clone();
        damaged[Entry::HEADER_SIZE] ^= 0xFF;
        seg.append(&damaged).unwrap();
        seg.append(&good).unwrap();
        assert!(!seg.is_incomplete_tail(0).unwrap());

        // Damaged entry followed by zero padding is a tail.
        let seg = segment();
        seg.append(&damaged).unwrap();
        seg.append(&[0u8; 100]).unwrap();
        assert!(seg.is_incomplete_tail(0).unwrap());
    }

    #[test]
    fn inflated_length_before_intact_entries_is_not_a_tail() {
        let entries: Vec<Vec<u8>> = (1..=3)
            .map(|i| entry(&[b'a' + i as u8], b"v", i).encode())
            .collect();
        let seg = segment();
        let mut first = entries[0].clone();
        first[26] = 0x7F;
        seg.append(&first).unwrap();
        seg.append(&entries[1]).unwrap();
        seg.append(&entries[2]).unwrap();
        assert!(seg.read_entry(0).is_err());
        assert!(!seg.is_incomplete_tail(0).unwrap());

        // The same damage on the final entry cannot be told from a torn write.
        let seg = segment();
        let mut last = entries[2].clone();
        last[26] = 0x7F;
        seg.append(&entries[0]).unwrap();
        seg.append(&last).unwrap();
        assert!(seg.is_incomplete_tail(entries[0].len() as u64).unwrap());

        // A header with an unknown op tag is never a torn write.
        let seg = segment();
        let mut garbled = entries[2].clone();
        garbled[5] = 0xEE;
        garbled[26] = 0x7F;
        seg.append(&entries[0]).unwrap();
        seg.append(&garbled).unwrap();
        assert!(!seg.is_incomplete_tail(entries[0].len() as u64).unwrap());
    }

    #[test]
    fn display_names_type_and_file() {
        assert_eq!(segment().to_string(), "string_000000001");
    }

    #[test]
    fn fault_switch_can_be_cleared() {
        let switch = Arc::new(AtomicBool::new(false));
        let backend = InMemoryBackend::new().with_fault_switch(Arc::clone(&switch));
        let seg = LogSegment::new(DataType::Hash, FileId::new(1), None, Box::new(backend));

        switch.store(true, Ordering::SeqCst);
        assert!(seg.sync().is_err());
        switch.store(false, Ordering::SeqCst);
        assert!(seg.sync().is_ok());
    }
}
