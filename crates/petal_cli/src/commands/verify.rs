//! Verify command implementation.
//!
//! Scans every segment file in place without taking the database lock or
//! writing anything, so it can run against a database another process has
//! open.

use petal_core::{list_segment_files, segment_file_name, DataType, FileId, LogSegment, TEMP_SUFFIX};
use petal_storage::FileBackend;
use std::fs;
use std::path::Path;
use tracing::debug;

/// How a segment scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every byte up to the end or to zero padding decoded.
    Clean,
    /// The last entry is incomplete; recovery truncates it.
    IncompleteTail {
        /// Offset of the incomplete entry.
        offset: u64,
    },
    /// An entry in the middle of the segment failed to decode.
    Corrupt {
        /// Offset of the damaged entry.
        offset: u64,
        /// Decode error.
        error: String,
    },
}

/// Verification result of one segment.
#[derive(Debug, Clone)]
pub struct SegmentReport {
    /// Data type from the file name.
    pub data_type: DataType,
    /// File id from the file name.
    pub file_id: FileId,
    /// File size in bytes.
    pub size: u64,
    /// Entries that decoded.
    pub entries: usize,
    /// Entries whose type tag does not match the file name.
    pub misplaced: usize,
    /// Bytes up to the end of the last good entry.
    pub valid_bytes: u64,
    /// How the scan ended.
    pub end: ScanEnd,
}

impl SegmentReport {
    fn is_ok(&self) -> bool {
        self.misplaced == 0 && !matches!(self.end, ScanEnd::Corrupt { .. })
    }
}

/// Verification result of a database directory.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// One report per segment file, in type and file id order.
    pub segments: Vec<SegmentReport>,
    /// Leftover GC output files, removed at the next open.
    pub temp_files: Vec<String>,
}

impl VerifyResult {
    /// Returns true when no segment holds damaged entries.
    pub fn is_ok(&self) -> bool {
        self.segments.iter().all(SegmentReport::is_ok)
    }

    /// Total entries checked.
    pub fn entries(&self) -> usize {
        self.segments.iter().map(|s| s.entries).sum()
    }
}

/// Scans one segment file.
pub fn verify_segment(
    dir: &Path,
    data_type: DataType,
    file_id: FileId,
) -> Result<SegmentReport, Box<dyn std::error::Error>> {
    let path = dir.join(segment_file_name(data_type, file_id));
    let backend = FileBackend::open(&path)?;
    let segment = LogSegment::new(data_type, file_id, Some(path), Box::new(backend));

    let mut report = SegmentReport {
        data_type,
        file_id,
        size: segment.size()?,
        entries: 0,
        misplaced: 0,
        valid_bytes: 0,
        end: ScanEnd::Clean,
    };

    for scanned in segment.iter()? {
        match scanned {
            Ok(scanned) => {
                report.entries += 1;
                report.valid_bytes = scanned.offset + scanned.size as u64;
                if scanned.entry.data_type != data_type {
                    report.misplaced += 1;
                }
            }
            Err(e) => {
                // Entries are contiguous, so the failing one starts where the last good one ended.
                let offset = report.valid_bytes;
                report.end = if segment.is_incomplete_tail(offset)? {
                    ScanEnd::IncompleteTail { offset }
                } else {
                    ScanEnd::Corrupt {
                        offset,
                        error: e.to_string(),
                    }
                };
                break;
            }
        }
    }

    debug!(segment = %segment, entries = report.entries, "scanned");
    Ok(report)
}

/// Scans every segment file under `path`.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No database found at {}", path.display()).into());
    }

    let mut result = VerifyResult::default();
    for (data_type, file_id) in list_segment_files(path)? {
        result.segments.push(verify_segment(path, data_type, file_id)?);
    }

    for entry in fs::read_dir(path)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(TEMP_SUFFIX) {
            result.temp_files.push(name);
        }
    }
    result.temp_files.sort();

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {}", path.display());
    println!();

    let result = verify(path)?;
    for report in &result.segments {
        print_report(report);
    }
    for name in &result.temp_files {
        println!("  {name}: leftover GC output (removed on next open)");
    }

    println!();
    println!(
        "Checked {} entries in {} segments",
        result.entries(),
        result.segments.len()
    );
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err("Verification failed".into())
    }
}

fn print_report(report: &SegmentReport) {
    let name = segment_file_name(report.data_type, report.file_id);
    match &report.end {
        ScanEnd::Clean => println!("  {name}: {} entries", report.entries),
        ScanEnd::IncompleteTail { offset } => println!(
            "  {name}: {} entries, incomplete tail at offset {offset} ({} bytes)",
            report.entries,
            report.size - offset
        ),
        ScanEnd::Corrupt { offset, error } => println!(
            "  {name}: {} entries, CORRUPT at offset {offset}: {error}",
            report.entries
        ),
    }
    if report.misplaced > 0 {
        println!(
            "  {name}: {} entries carry a different data type",
            report.misplaced
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_core::{Config, Database, Entry};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    fn populate(dir: &Path) {
        let config = Config::default()
            .gc_interval(Duration::ZERO)
            .max_segment_size(512);
        let db = Database::open_with_config(dir, config).unwrap();
        for i in 0..40 {
            db.set(format!("key-{i}").as_bytes(), b"value").unwrap();
        }
        db.hset(b"h", b"f", b"v").unwrap();
    }

    fn string_segments(dir: &Path) -> Vec<FileId> {
        list_segment_files(dir)
            .unwrap()
            .into_iter()
            .filter(|(t, _)| *t == DataType::String)
            .map(|(_, fid)| fid)
            .collect()
    }

    #[test]
    fn test_verify_clean_database() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.entries(), 41);
        assert!(result.segments.len() > 2);
        assert!(result.segments.iter().all(|s| s.end == ScanEnd::Clean));
    }

    #[test]
    fn test_verify_tolerates_incomplete_tail() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let torn = Entry::put(DataType::String, b"torn", b"", b"value").encode();
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(segment_file_name(
                DataType::String,
                *string_segments(dir.path()).last().unwrap(),
            )))
            .unwrap();
        file.write_all(&torn[..torn.len() - 3]).unwrap();

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert!(result
            .segments
            .iter()
            .any(|s| matches!(s.end, ScanEnd::IncompleteTail { .. })));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let oldest = string_segments(dir.path())[0];
        let target = dir.path().join(segment_file_name(DataType::String, oldest));
        let mut bytes = fs::read(&target).unwrap();
        bytes[Entry::HEADER_SIZE] ^= 0xFF;
        fs::write(&target, bytes).unwrap();

        let result = verify(dir.path()).unwrap();
        assert!(!result.is_ok());
        let report = &result.segments[0];
        assert_eq!(report.data_type, DataType::String);
        assert!(matches!(report.end, ScanEnd::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn test_verify_reports_temp_files() {
        let dir = tempdir().unwrap();
        populate(dir.path());
        fs::write(dir.path().join("set_000000007.seg.tmp"), b"partial").unwrap();

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.temp_files, vec!["set_000000007.seg.tmp".to_string()]);
    }
}
