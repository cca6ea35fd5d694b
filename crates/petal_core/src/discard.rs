//! Per-segment accounting of obsolete bytes.
//!
//! The tracker is derived state: the live write path, GC and recovery replay
//! all feed it through the same two calls, and nothing of it is persisted.

use crate::types::{FileId, SequenceNumber};
use std::collections::BTreeMap;

/// Live/obsolete byte counts of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiscardStat {
    /// Bytes appended to the segment.
    pub total: u64,
    /// Bytes no longer reachable from the index.
    pub discarded: u64,
    /// Lowest entry sequence stored in the segment.
    pub min_sequence: Option<SequenceNumber>,
}

impl DiscardStat {
    /// Fraction of the segment that is obsolete.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.discarded as f64 / self.total as f64
        }
    }
}

/// Discard statistics for every segment of one data type.
#[derive(Debug, Default)]
pub struct DiscardTracker {
    stats: BTreeMap<FileId, DiscardStat>,
}

impl DiscardTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a segment with no entries yet.
    pub fn register(&mut self, file_id: FileId) {
        self.stats.entry(file_id).or_default();
    }

    /// Accounts for an entry appended (or replayed) into a segment.
    pub fn record_append(&mut self, file_id: FileId, bytes: u64, sequence: SequenceNumber) {
        let stat = self.stats.entry(file_id).or_default();
        stat.total += bytes;
        stat.min_sequence = Some(match stat.min_sequence {
            Some(min) => min.min(sequence),
            None => sequence,
        });
    }

    /// Marks bytes of a segment as obsolete.
    ///
    /// The discarded count never exceeds the segment's total.
    pub fn record_discard(&mut self, file_id: FileId, bytes: u64) {
        if let Some(stat) = self.stats.get_mut(&file_id) {
            stat.discarded = (stat.discarded + bytes).min(stat.total);
        }
    }

    /// Discard ratio of a segment (0 for unknown segments).
    #[must_use]
    pub fn ratio(&self, file_id: FileId) -> f64 {
        self.stats.get(&file_id).map_or(0.0, DiscardStat::ratio)
    }

    /// Statistics of one segment.
    #[must_use]
    pub fn stat(&self, file_id: FileId) -> Option<&DiscardStat> {
        self.stats.get(&file_id)
    }

    /// Stops tracking a segment.
    pub fn remove(&mut self, file_id: FileId) -> Option<DiscardStat> {
        self.stats.remove(&file_id)
    }

    /// Sealed segments whose ratio exceeds `threshold`, most obsolete first.
    #[must_use]
    pub fn candidates(&self, threshold: f64, active: FileId) -> Vec<FileId> {
        let mut picked: Vec<(FileId, f64)> = self
            .stats
            .iter()
            .filter(|(fid, stat)| **fid != active && stat.total > 0 && stat.ratio() > threshold)
            .map(|(fid, stat)| (*fid, stat.ratio()))
            .collect();
        picked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        picked.into_iter().map(|(fid, _)| fid).collect()
    }

    /// Lowest sequence held by a segment other than `excluded` that has
    /// obsolete bytes.
    ///
    /// A tombstone newer than this may still shadow an entry on disk; a
    /// segment without discards holds nothing a tombstone shadows.
    #[must_use]
    pub fn shadow_floor(&self, excluded: FileId) -> Option<SequenceNumber> {
        self.stats
            .iter()
            .filter(|(fid, stat)| **fid != excluded && stat.discarded > 0)
            .filter_map(|(_, stat)| stat.min_sequence)
            .min()
    }

    /// Iterates all tracked segments in file id order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &DiscardStat)> {
        self.stats.iter().map(|(fid, stat)| (*fid, stat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    #[test]
    fn ratio_tracks_discards() {
        let mut tracker = DiscardTracker::new();
        let fid = FileId::new(1);
        tracker.record_append(fid, 100, seq(1));
        tracker.record_append(fid, 100, seq(2));
        tracker.record_discard(fid, 50);

        assert!((tracker.ratio(fid) - 0.25).abs() < f64::EPSILON);
        assert_eq!(tracker.ratio(FileId::new(9)), 0.0);
    }

    #[test]
    fn discarded_never_exceeds_total() {
        let mut tracker = DiscardTracker::new();
        let fid = FileId::new(1);
        tracker.record_append(fid, 10, seq(1));
        tracker.record_discard(fid, 25);

        let stat = tracker.stat(fid).unwrap();
        assert_eq!(stat.discarded, stat.total);
        assert_eq!(stat.ratio(), 1.0);
    }

    #[test]
    fn discard_on_unknown_segment_is_ignored() {
        let mut tracker = DiscardTracker::new();
        tracker.record_discard(FileId::new(4), 10);
        assert!(tracker.stat(FileId::new(4)).is_none());
    }

    #[test]
    fn candidates_skip_active_and_sort_by_ratio() {
        let mut tracker = DiscardTracker::new();
        for (id, discarded) in [(1, 30), (2, 90), (3, 100)] {
            let fid = FileId::new(id);
            tracker.record_append(fid, 100, seq(u64::from(id)));
            tracker.record_discard(fid, discarded);
        }
        tracker.register(FileId::new(4));

        assert_eq!(
            tracker.candidates(0.2, FileId::new(3)),
            vec![FileId::new(2), FileId::new(1)]
        );
        assert_eq!(
            tracker.candidates(0.5, FileId::new(4)),
            vec![FileId::new(3), FileId::new(2)]
        );
    }

    #[test]
    fn shadow_floor_ignores_clean_segments() {
        let mut tracker = DiscardTracker::new();
        tracker.record_append(FileId::new(1), 10, seq(5));
        tracker.record_append(FileId::new(1), 10, seq(3));
        tracker.record_append(FileId::new(2), 10, seq(8));
        tracker.record_append(FileId::new(3), 10, seq(1));

        assert_eq!(tracker.stat(FileId::new(1)).unwrap().min_sequence, Some(seq(3)));
        assert_eq!(tracker.shadow_floor(FileId::new(2)), None);

        tracker.record_discard(FileId::new(1), 10);
        tracker.record_discard(FileId::new(2), 10);
        assert_eq!(tracker.shadow_floor(FileId::new(1)), Some(seq(8)));
        assert_eq!(tracker.shadow_floor(FileId::new(2)), Some(seq(3)));

        tracker.remove(FileId::new(1));
        assert_eq!(tracker.shadow_floor(FileId::new(2)), None);
    }
}
