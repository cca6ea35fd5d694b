//! Crash recovery testing for PetalDB.
//!
//! This module damages the segment files of a closed database the way a
//! crash would leave them, reopens it, and checks what recovery kept.
//!
//! ## Crash points
//!
//! 1. **Torn append** - the last entry of a segment was only partly written
//! 2. **Zeroed tail** - a pre-sized file ends in zeros past the last entry
//! 3. **Leftover GC output** - a `.seg.tmp` file never reached the rename
//! 4. **Duplicate segment** - GC output was renamed but the old segment was
//!    not yet deleted
//! 5. **Flipped byte** - damage in the middle of a segment, which must fail
//!    the open rather than lose data silently
//! 6. **Corrupt length** - a key length inflated past the end of the file in
//!    the first entry of a segment, which must also fail the open instead of
//!    passing for a torn write
//!
//! ## Usage
//!
//! ```rust,ignore
//! use petal_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! let result = harness.run(CrashPoint::TornAppend);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::fixtures::{get_key, test_config};
use petal_core::{
    list_segment_files, segment_file_name, Config, CoreError, DataType, Database, Entry, FileId,
};
use petal_storage::{FileBackend, StorageBackend};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// A partial entry at the end of the newest string segment.
    TornAppend,
    /// Zero bytes past the last entry of the newest string segment.
    ZeroedTail,
    /// A temporary GC output file next to the segments.
    LeftoverGcOutput,
    /// The oldest string segment copied under a newer file id.
    DuplicateSegment,
    /// One byte flipped inside the first entry of the oldest string segment.
    FlippedByte,
    /// The key length of the first entry of the oldest string segment
    /// inflated to claim about 2 GB.
    CorruptLength,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 6] = [
        CrashPoint::TornAppend,
        CrashPoint::ZeroedTail,
        CrashPoint::LeftoverGcOutput,
        CrashPoint::DuplicateSegment,
        CrashPoint::FlippedByte,
        CrashPoint::CorruptLength,
    ];

    /// Whether recovery is expected to refuse the database.
    pub fn is_fatal(self) -> bool {
        matches!(self, CrashPoint::FlippedByte | CrashPoint::CorruptLength)
    }

    /// Damages the closed database at `path`.
    pub fn inject(self, path: &Path) -> io::Result<()> {
        match self {
            CrashPoint::TornAppend => {
                let (fid, _) = newest_and_oldest(path, DataType::String)?;
                let entry = Entry::put(DataType::String, b"torn-key", b"", b"torn-value").encode();
                torn_append(&segment_path(path, DataType::String, fid), &entry, entry.len() - 5)
            }
            CrashPoint::ZeroedTail => {
                let (fid, _) = newest_and_oldest(path, DataType::String)?;
                let mut file = OpenOptions::new()
                    .append(true)
                    .open(segment_path(path, DataType::String, fid))?;
                file.write_all(&[0u8; 4096])?;
                file.sync_all()
            }
            CrashPoint::LeftoverGcOutput => {
                let name = format!("{}.tmp", segment_file_name(DataType::Hash, FileId::new(999)));
                fs::write(path.join(name), b"half-written gc output")
            }
            CrashPoint::DuplicateSegment => {
                let (newest, oldest) = newest_and_oldest(path, DataType::String)?;
                fs::copy(
                    segment_path(path, DataType::String, oldest),
                    segment_path(path, DataType::String, FileId::new(newest.as_u32() + 1)),
                )
                .map(|_| ())
            }
            CrashPoint::FlippedByte => {
                let (_, oldest) = newest_and_oldest(path, DataType::String)?;
                let target = segment_path(path, DataType::String, oldest);
                let mut bytes = fs::read(&target)?;
                bytes[Entry::HEADER_SIZE] ^= 0xFF;
                fs::write(target, bytes)
            }
            CrashPoint::CorruptLength => {
                let (_, oldest) = newest_and_oldest(path, DataType::String)?;
                let target = segment_path(path, DataType::String, oldest);
                let mut bytes = fs::read(&target)?;
                // High byte of the little-endian key length.
                bytes[KEY_LEN_OFFSET + 3] = 0x7F;
                fs::write(target, bytes)
            }
        }
    }
}

/// Offset of the key length field in an entry header.
const KEY_LEN_OFFSET: usize = 23;

/// Appends the first `keep` bytes of `entry` to a segment file, as an
/// interrupted write would.
pub fn torn_append(segment: &Path, entry: &[u8], keep: usize) -> io::Result<()> {
    let mut backend = FileBackend::open(segment).map_err(io::Error::other)?;
    backend
        .append(&entry[..keep.min(entry.len())])
        .map_err(io::Error::other)?;
    backend.sync().map_err(io::Error::other)
}

fn segment_path(dir: &Path, data_type: DataType, file_id: FileId) -> PathBuf {
    dir.join(segment_file_name(data_type, file_id))
}

fn newest_and_oldest(dir: &Path, data_type: DataType) -> io::Result<(FileId, FileId)> {
    let fids: Vec<FileId> = list_segment_files(dir)
        .map_err(io::Error::other)?
        .into_iter()
        .filter(|(t, _)| *t == data_type)
        .map(|(_, fid)| fid)
        .collect();
    match (fids.iter().max(), fids.iter().min()) {
        (Some(newest), Some(oldest)) => Ok((*newest, *oldest)),
        _ => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {data_type} segments in {}", dir.display()),
        )),
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// The crash that was simulated.
    pub point: CrashPoint,
    /// Keys expected after recovery.
    pub expected_keys: usize,
    /// Keys found after recovery.
    pub actual_keys: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(point: CrashPoint, keys: usize) -> Self {
        Self {
            passed: true,
            point,
            expected_keys: keys,
            actual_keys: keys,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(point: CrashPoint, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            point,
            expected_keys: expected,
            actual_keys: actual,
            error: Some(error.to_string()),
        }
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Path to the test database directory.
    pub db_path: PathBuf,
    /// Configuration used for every open.
    pub config: Config,
    /// Keys written before each simulated crash.
    pub keys: usize,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness. Small segments make sure every
    /// run spans several files.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            config: test_config().max_segment_size(4 * 1024),
            keys: 200,
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a new harness with a temporary directory.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut harness = Self::new(temp_dir.path().join("db"));
        harness._temp_dir = Some(temp_dir);
        Ok(harness)
    }

    fn value(i: usize) -> Vec<u8> {
        format!("value-{i}").into_bytes()
    }

    /// Writes `keys` string keys into a fresh database and closes it.
    fn write_fresh(&self) -> Result<(), CoreError> {
        let _ = fs::remove_dir_all(&self.db_path);
        let db = Database::open_with_config(&self.db_path, self.config.clone())?;
        for i in 0..self.keys {
            db.set(&get_key(i), &Self::value(i))?;
        }
        db.close()
    }

    /// Counts the keys that came back with their original value.
    fn count_intact(&self, db: &Database) -> Result<usize, CoreError> {
        let mut found = 0;
        for i in 0..self.keys {
            match db.get(&get_key(i)) {
                Ok(value) if value == Self::value(i) => found += 1,
                Ok(_) | Err(CoreError::KeyNotFound) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(found)
    }

    /// Writes, crashes at `point`, reopens and checks the outcome.
    pub fn run(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let result = self.run_inner(point).unwrap_or_else(|e| {
            CrashRecoveryResult::fail(point, self.keys, 0, &e.to_string())
        });
        self.results.push(result.clone());
        result
    }

    fn run_inner(&self, point: CrashPoint) -> Result<CrashRecoveryResult, CoreError> {
        self.write_fresh()?;
        point.inject(&self.db_path)?;

        let db = match Database::open_with_config(&self.db_path, self.config.clone()) {
            Err(CoreError::RecoveryFailure { .. }) if point.is_fatal() => {
                return Ok(CrashRecoveryResult::pass(point, 0));
            }
            Err(err) => return Err(err),
            Ok(_) if point.is_fatal() => {
                return Ok(CrashRecoveryResult::fail(
                    point,
                    0,
                    self.keys,
                    "damaged database opened",
                ));
            }
            Ok(db) => db,
        };

        let found = self.count_intact(&db)?;
        let torn_visible = db.exists(b"torn-key")?;
        let count = db.key_count(DataType::String)?;
        db.close()?;

        let result = if found != self.keys {
            CrashRecoveryResult::fail(point, self.keys, found, "keys lost or changed")
        } else if torn_visible || count != self.keys {
            CrashRecoveryResult::fail(point, self.keys, count, "unexpected keys after recovery")
        } else {
            CrashRecoveryResult::pass(point, found)
        };
        Ok(result)
    }

    /// Runs every crash point.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        for point in CrashPoint::ALL {
            self.run(point);
        }
        &self.results
    }

    /// Returns true if every recorded run passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(point: CrashPoint) -> CrashRecoveryResult {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run(point)
    }

    #[test]
    fn test_torn_append_is_dropped() {
        let result = run(CrashPoint::TornAppend);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_zeroed_tail_is_dropped() {
        let result = run(CrashPoint::ZeroedTail);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_leftover_gc_output_is_removed() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        let result = harness.run(CrashPoint::LeftoverGcOutput);
        assert!(result.passed, "{:?}", result.error);
        assert!(!harness.db_path.join("hash_000000999.seg.tmp").exists());
    }

    #[test]
    fn test_duplicate_segment_is_harmless() {
        let result = run(CrashPoint::DuplicateSegment);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_flipped_byte_fails_open() {
        let result = run(CrashPoint::FlippedByte);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_corrupt_length_fails_open_and_keeps_file() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.write_fresh().unwrap();
        let (_, oldest) = newest_and_oldest(&harness.db_path, DataType::String).unwrap();
        let path = segment_path(&harness.db_path, DataType::String, oldest);
        let before = fs::metadata(&path).unwrap().len();
        CrashPoint::CorruptLength.inject(&harness.db_path).unwrap();

        assert!(matches!(
            Database::open_with_config(&harness.db_path, harness.config.clone()),
            Err(CoreError::RecoveryFailure { .. })
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), before);

        let result = harness.run(CrashPoint::CorruptLength);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_disk() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run(CrashPoint::TornAppend);

        let (newest, _) = newest_and_oldest(&harness.db_path, DataType::String).unwrap();
        let path = segment_path(&harness.db_path, DataType::String, newest);
        let len = fs::metadata(&path).unwrap().len() as usize;
        let bytes = fs::read(&path).unwrap();
        let mut offset = 0;
        while offset < len {
            let entry = Entry::decode(&bytes[offset..]).unwrap();
            offset += entry.encoded_size();
        }
        assert_eq!(offset, len);
    }

    #[test]
    fn test_run_all() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        let results = harness.run_all();
        assert_eq!(results.len(), CrashPoint::ALL.len());
        assert!(harness.all_passed());
    }
}
