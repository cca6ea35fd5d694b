//! Entry codec.
//!
//! Every mutation is persisted as one entry appended to a segment of its data
//! type. The layout is little endian:
//!
//! ```text
//! | crc32 (4) | data_type (1) | op (1) | flags (1) | sequence (8) | expire_at (8) |
//! | key_len (4) | sub_key_len (4) | value_len (4) | key | sub_key | value |
//! ```
//!
//! The CRC covers every byte after the CRC field. Keys are never empty, so an
//! all-zero header can only be padding and marks the end of the data.

use crate::error::{CoreError, CoreResult};
use crate::types::{DataType, SequenceNumber};

/// What an entry does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryOp {
    /// Insert or overwrite one slot (the string value, a field, a member, an element).
    Put = 1,
    /// Remove one slot.
    Remove = 2,
    /// Remove the whole key, including its TTL.
    Clear = 3,
    /// Set (`expire_at > 0`) or drop (`expire_at == 0`) the key's TTL.
    Expire = 4,
}

impl EntryOp {
    fn from_byte(byte: u8) -> CoreResult<Self> {
        match byte {
            1 => Ok(Self::Put),
            2 => Ok(Self::Remove),
            3 => Ok(Self::Clear),
            4 => Ok(Self::Expire),
            other => Err(CoreError::corrupt_record(format!("unknown op tag {other}"))),
        }
    }
}

/// Flags for entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Clear the whole key before applying the put.
    pub const RESET: Self = Self(0x01);

    /// Creates new flags from raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if the reset flag is set.
    #[must_use]
    pub const fn is_reset(self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Data type whose key space the entry belongs to.
    pub data_type: DataType,
    /// Operation.
    pub op: EntryOp,
    /// Entry flags.
    pub flags: EntryFlags,
    /// Sequence number assigned when the entry was first appended.
    pub sequence: SequenceNumber,
    /// Unix milliseconds, 0 = no TTL.
    pub expire_at: u64,
    /// User key.
    pub key: Vec<u8>,
    /// Field, member or element position; empty for strings.
    pub sub_key: Vec<u8>,
    /// Payload.
    pub value: Vec<u8>,
}

impl Entry {
    /// Fixed header size.
    pub const HEADER_SIZE: usize = 35;
    const CRC_SIZE: usize = 4;

    /// Creates a put entry. The sequence is assigned at append time.
    #[must_use]
    pub fn put(data_type: DataType, key: &[u8], sub_key: &[u8], value: &[u8]) -> Self {
        Self::new(data_type, EntryOp::Put, key, sub_key, value)
    }

    /// Creates a remove entry for one slot.
    #[must_use]
    pub fn remove(data_type: DataType, key: &[u8], sub_key: &[u8]) -> Self {
        Self::new(data_type, EntryOp::Remove, key, sub_key, &[])
    }

    /// Creates a clear entry for a whole key.
    #[must_use]
    pub fn clear(data_type: DataType, key: &[u8]) -> Self {
        Self::new(data_type, EntryOp::Clear, key, &[], &[])
    }

    /// Creates an expire entry; `expire_at == 0` drops the TTL.
    #[must_use]
    pub fn expire(data_type: DataType, key: &[u8], expire_at: u64) -> Self {
        Self::new(data_type, EntryOp::Expire, key, &[], &[]).with_expire_at(expire_at)
    }

    fn new(data_type: DataType, op: EntryOp, key: &[u8], sub_key: &[u8], value: &[u8]) -> Self {
        Self {
            data_type,
            op,
            flags: EntryFlags::NONE,
            sequence: SequenceNumber::default(),
            expire_at: 0,
            key: key.to_vec(),
            sub_key: sub_key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Sets the expiration timestamp.
    #[must_use]
    pub fn with_expire_at(mut self, expire_at: u64) -> Self {
        self.expire_at = expire_at;
        self
    }

    /// Marks a put as resetting the whole key first.
    #[must_use]
    pub fn with_reset(mut self) -> Self {
        self.flags = EntryFlags::RESET;
        self
    }

    /// Returns true for entries whose bytes are obsolete as soon as they are
    /// applied: removals, clears and TTL drops.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        match self.op {
            EntryOp::Remove | EntryOp::Clear => true,
            EntryOp::Expire => self.expire_at == 0,
            EntryOp::Put => false,
        }
    }

    /// Returns the encoded size of this entry.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len() + self.sub_key.len() + self.value.len()
    }

    /// Encodes the entry to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());

        // CRC placeholder, patched below
        buf.extend_from_slice(&[0; Self::CRC_SIZE]);
        buf.push(self.data_type.as_byte());
        buf.push(self.op as u8);
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.expire_at.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.sub_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.sub_key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[Self::CRC_SIZE..]);
        buf[..Self::CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes a complete entry.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` for a short buffer or unknown tags and
    /// `ChecksumMismatch` when the CRC does not match.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let header = EntryHeader::parse(data)?;
        let total = header.entry_size();
        if data.len() < total {
            return Err(CoreError::corrupt_record(format!(
                "incomplete entry: need {total} bytes, have {}",
                data.len()
            )));
        }

        let actual = crc32fast::hash(&data[Self::CRC_SIZE..total]);
        if actual != header.crc {
            return Err(CoreError::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }

        let data_type = DataType::from_byte(data[4])?;
        let op = EntryOp::from_byte(data[5])?;
        let flags = EntryFlags::from_byte(data[6]);
        let sequence = SequenceNumber::new(read_u64(data, 7));
        let expire_at = read_u64(data, 15);

        if header.key_len == 0 {
            return Err(CoreError::corrupt_record("entry with empty key"));
        }

        let key_end = Self::HEADER_SIZE + header.key_len;
        let sub_end = key_end + header.sub_key_len;

        Ok(Self {
            data_type,
            op,
            flags,
            sequence,
            expire_at,
            key: data[Self::HEADER_SIZE..key_end].to_vec(),
            sub_key: data[key_end..sub_end].to_vec(),
            value: data[sub_end..total].to_vec(),
        })
    }
}

/// The length fields of an entry header, enough to size the full read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Stored checksum.
    pub crc: u32,
    /// Key length.
    pub key_len: usize,
    /// Sub-key length.
    pub sub_key_len: usize,
    /// Value length.
    pub value_len: usize,
}

impl EntryHeader {
    /// Parses the header at the start of `data`.
    pub fn parse(data: &[u8]) -> CoreResult<Self> {
        if data.len() < Entry::HEADER_SIZE {
            return Err(CoreError::corrupt_record(format!(
                "short header: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            crc: read_u32(data, 0),
            key_len: read_u32(data, 23) as usize,
            sub_key_len: read_u32(data, 27) as usize,
            value_len: read_u32(data, 31) as usize,
        })
    }

    /// Returns true when the header is padding rather than an entry.
    #[must_use]
    pub fn is_end_marker(data: &[u8]) -> bool {
        data.iter().take(Entry::HEADER_SIZE).all(|&b| b == 0)
    }

    /// Returns true when the tags and key length at the start of `data`
    /// could belong to an entry. The checksum is not looked at.
    #[must_use]
    pub fn is_plausible(data: &[u8]) -> bool {
        data.len() >= Entry::HEADER_SIZE
            && DataType::from_byte(data[4]).is_ok()
            && EntryOp::from_byte(data[5]).is_ok()
            && read_u32(data, 23) != 0
    }

    /// Total encoded size of the entry this header starts.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        Entry::HEADER_SIZE + self.key_len + self.sub_key_len + self.value_len
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
