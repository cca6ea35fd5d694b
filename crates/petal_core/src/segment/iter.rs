//! Sequential entry scanning.

use crate::entry::{Entry, EntryHeader};
use crate::error::CoreResult;
use crate::segment::log::LogSegment;

/// An entry together with its location in the segment.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    /// Offset of the first byte of the entry.
    pub offset: u64,
    /// Encoded size.
    pub size: usize,
    /// The decoded entry.
    pub entry: Entry,
}

/// Iterator over the entries of a segment in file order.
///
/// Stops at the end of the segment or at zero padding. After an error the
/// iterator is exhausted and [`EntryIterator::offset`] points at the entry
/// that failed to decode.
pub struct EntryIterator<'a> {
    segment: &'a LogSegment,
    offset: u64,
    size: u64,
    done: bool,
}

impl<'a> EntryIterator<'a> {
    pub(crate) fn new(segment: &'a LogSegment) -> CoreResult<Self> {
        Ok(Self {
            segment,
            offset: 0,
            size: segment.size()?,
            done: false,
        })
    }

    /// Offset just past the last entry returned, or of the failing entry.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn at_padding(&self) -> CoreResult<bool> {
        let len = (self.size - self.offset).min(Entry::HEADER_SIZE as u64) as usize;
        let header = self.segment.read_at(self.offset, len)?;
        Ok(EntryHeader::is_end_marker(&header))
    }
}

impl Iterator for EntryIterator<'_> {
    type Item = CoreResult<ScannedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.size {
            return None;
        }

        match self.at_padding() {
            Ok(true) => {
                self.done = true;
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        }

        match self.segment.read_entry(self.offset) {
            Ok((entry, size)) => {
                let scanned = ScannedEntry {
                    offset: self.offset,
                    size,
                    entry,
                };
                self.offset += size as u64;
                Some(Ok(scanned))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
