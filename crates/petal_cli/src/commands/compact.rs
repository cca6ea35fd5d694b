//! Compact command implementation.

use super::format_size;
use petal_core::{Config, Database, GcReport};
use std::path::Path;

/// Opens the database at `path` and runs one GC cycle over every segment
/// whose discard ratio reaches `ratio`.
pub fn compact(
    path: &Path,
    config: Config,
    ratio: f64,
) -> Result<GcReport, Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(format!("Ratio must be between 0 and 1, got {ratio}").into());
    }

    let db = Database::open_with_config(path, config)?;
    let report = db.compact_with_ratio(ratio)?;
    db.sync()?;
    db.close()?;
    Ok(report)
}

/// Runs the compact command.
pub fn run(path: &Path, config: Config, ratio: f64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting segments at {} (ratio >= {ratio})", path.display());
    println!();

    let report = compact(path, config, ratio)?;

    println!("Compaction Results:");
    println!("  Segments rewritten: {}", report.segments_compacted);
    println!("  Entries moved:      {}", report.entries_moved);
    println!("  Expired keys:       {}", report.expired_keys_reclaimed);
    println!("  Space reclaimed:    {}", format_size(report.bytes_reclaimed));

    if report.failures > 0 {
        println!();
        println!("✗ {} segments failed and were left in place", report.failures);
        return Err("Compaction incomplete".into());
    }

    println!();
    if report.segments_compacted == 0 {
        println!("No segment reached the ratio - nothing to do");
    } else {
        println!("✓ Compaction complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config() -> Config {
        Config::default()
            .gc_interval(Duration::ZERO)
            .max_segment_size(1024)
    }

    #[test]
    fn test_compact_reclaims_deleted_keys() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open_with_config(dir.path(), config()).unwrap();
            for i in 0..100 {
                db.set(format!("key-{i}").as_bytes(), b"some value").unwrap();
            }
            for i in 0..80 {
                db.delete(format!("key-{i}").as_bytes()).unwrap();
            }
        }

        let report = compact(dir.path(), config().create_if_missing(false), 0.5).unwrap();
        assert!(report.segments_compacted > 0);
        assert!(report.bytes_reclaimed > 0);
        assert_eq!(report.failures, 0);

        let db = Database::open_with_config(dir.path(), config()).unwrap();
        assert_eq!(db.key_count(petal_core::DataType::String).unwrap(), 20);
        assert_eq!(db.get(b"key-99").unwrap(), b"some value");
    }

    #[test]
    fn test_compact_rejects_bad_ratio() {
        let dir = tempdir().unwrap();
        assert!(compact(dir.path(), config(), 1.5).is_err());
        assert!(compact(dir.path(), config(), f64::NAN).is_err());
    }
}
