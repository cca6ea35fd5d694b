//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store holding one segment.
///
/// Backends know nothing about entries, data types or indexes; the core
/// crate owns the format. Offsets handed out by `append` stay valid until
/// the store is truncated below them.
///
/// Implementors: [`super::FileBackend`] (OS file I/O),
/// [`super::MmapBackend`] (memory-mapped, fixed capacity) and
/// [`super::InMemoryBackend`] (tests and ephemeral databases).
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `ReadPastEnd` when the range ends beyond [`size`](Self::size), or an
    /// I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// An I/O error, or `CapacityExceeded` from a fixed-capacity backend.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered appends to the OS without waiting for the device.
    fn flush(&mut self) -> StorageResult<()>;

    /// Logical size: the offset of the next append.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything past `new_size`. Recovery uses it to cut a partially
    /// written final entry.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
