//! Core type definitions for PetalDB.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The five value shapes a key can hold.
///
/// Every data type has its own key space, its own segments and its own index:
/// the string `"k"` and the hash `"k"` are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Plain byte-string values.
    String = 1,
    /// Double-ended lists.
    List = 2,
    /// Field to value maps.
    Hash = 3,
    /// Unordered member sets.
    Set = 4,
    /// Score-ordered member sets.
    ZSet = 5,
}

impl DataType {
    /// All data types in lock order.
    pub const ALL: [DataType; 5] = [
        DataType::String,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    /// Returns the tag stored in entry headers.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses an entry header tag.
    pub fn from_byte(byte: u8) -> CoreResult<Self> {
        match byte {
            1 => Ok(Self::String),
            2 => Ok(Self::List),
            3 => Ok(Self::Hash),
            4 => Ok(Self::Set),
            5 => Ok(Self::ZSet),
            other => Err(CoreError::corrupt_record(format!(
                "unknown data type tag {other}"
            ))),
        }
    }

    /// Position of this type in [`DataType::ALL`].
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize - 1
    }

    /// Name used in segment file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Hash => "hash",
            Self::Set => "set",
            Self::ZSet => "zset",
        }
    }

    /// Parses a segment file name prefix.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a segment file within one data type.
///
/// File ids are strictly increasing per data type and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a new file ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:09}", self.0)
    }
}

/// Database-wide ordering of entries.
///
/// Sequence numbers are allocated for every appended entry and survive GC
/// rewrites unchanged, so a higher number always means a later write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// I/O strategy for segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoType {
    /// Buffered writes through an OS file handle.
    #[default]
    FileIo,
    /// Writes through a memory-mapped, pre-sized file.
    MMap,
}

/// What the in-memory index keeps per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Only the position; values are read from the segment.
    #[default]
    KeyOnly,
    /// Position plus a cached copy of the value.
    KeyValue,
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
