//! Inspect command implementation.

use super::format_size;
use petal_core::{Config, DataType, Database, SegmentStats};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Highest sequence number assigned so far.
    pub last_sequence: u64,
    /// Bytes across every segment.
    pub total_size: u64,
    /// Obsolete bytes across every segment.
    pub discarded: u64,
    /// One summary per data type.
    pub types: Vec<TypeSummary>,
    /// Per-segment rows (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentRow>>,
}

/// Key and segment totals of one data type.
#[derive(Debug, Serialize)]
pub struct TypeSummary {
    /// Data type name.
    pub data_type: String,
    /// Live keys.
    pub keys: usize,
    /// Segment files.
    pub segments: usize,
    /// Bytes in those segments.
    pub size: u64,
    /// Obsolete bytes in those segments.
    pub discarded: u64,
}

/// Discard accounting of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentRow {
    /// Data type name.
    pub data_type: String,
    /// File id.
    pub file_id: u32,
    /// Bytes in the segment.
    pub size: u64,
    /// Obsolete bytes.
    pub discarded: u64,
    /// `discarded / size`.
    pub ratio: f64,
    /// Whether the segment accepts appends.
    pub active: bool,
}

impl From<&SegmentStats> for SegmentRow {
    fn from(stats: &SegmentStats) -> Self {
        Self {
            data_type: stats.data_type.to_string(),
            file_id: stats.file_id.as_u32(),
            size: stats.size,
            discarded: stats.discarded,
            ratio: stats.ratio,
            active: stats.active,
        }
    }
}

/// Opens the database at `path` and collects its statistics.
pub fn inspect(
    path: &Path,
    config: Config,
    show_segments: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let db = Database::open_with_config(path, config)?;
    let stats = db.segment_stats()?;

    let mut types = Vec::with_capacity(DataType::ALL.len());
    for data_type in DataType::ALL {
        let of_type = stats.iter().filter(|s| s.data_type == data_type);
        types.push(TypeSummary {
            data_type: data_type.to_string(),
            keys: db.key_count(data_type)?,
            segments: of_type.clone().count(),
            size: of_type.clone().map(|s| s.size).sum(),
            discarded: of_type.map(|s| s.discarded).sum(),
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        last_sequence: db.last_sequence().as_u64(),
        total_size: stats.iter().map(|s| s.size).sum(),
        discarded: stats.iter().map(|s| s.discarded).sum(),
        types,
        segments: show_segments.then(|| stats.iter().map(SegmentRow::from).collect()),
    };

    db.close()?;
    Ok(result)
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    config: Config,
    show_segments: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, config, show_segments)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text(&result),
        other => return Err(format!("Unknown format: {other}").into()),
    }

    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("PetalDB Database: {}", result.path);
    println!();
    println!("Last sequence:  {}", result.last_sequence);
    println!("Total size:     {}", format_size(result.total_size));
    println!("Discarded:      {}", format_size(result.discarded));
    println!();
    println!("{:<8} {:>10} {:>9} {:>12} {:>12}", "Type", "Keys", "Segments", "Size", "Discarded");
    for t in &result.types {
        println!(
            "{:<8} {:>10} {:>9} {:>12} {:>12}",
            t.data_type,
            t.keys,
            t.segments,
            format_size(t.size),
            format_size(t.discarded)
        );
    }

    if let Some(segments) = &result.segments {
        println!();
        println!("Segments:");
        for s in segments {
            println!(
                "  {}_{:09}  {:>12}  {:>12}  {:>6.1}%{}",
                s.data_type,
                s.file_id,
                format_size(s.size),
                format_size(s.discarded),
                s.ratio * 100.0,
                if s.active { "  (active)" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn maintenance_config() -> Config {
        Config::default()
            .create_if_missing(false)
            .gc_interval(Duration::ZERO)
    }

    #[test]
    fn test_inspect_counts_keys_per_type() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open_with_config(dir.path(), maintenance_config().create_if_missing(true))
                .unwrap();
            db.set(b"a", b"1").unwrap();
            db.set(b"b", b"2").unwrap();
            db.delete(b"b").unwrap();
            db.rpush(b"q", &["x", "y"]).unwrap();
            db.zadd(b"z", 1.0, b"m").unwrap();
        }

        let result = inspect(dir.path(), maintenance_config(), true).unwrap();
        let keys: Vec<usize> = result.types.iter().map(|t| t.keys).collect();
        assert_eq!(keys, vec![1, 1, 0, 0, 1]);
        assert!(result.total_size > 0);
        assert!(result.discarded > 0);
        assert!(result.last_sequence >= 5);

        let segments = result.segments.unwrap();
        assert!(segments.iter().any(|s| s.data_type == "string" && s.active));
    }

    #[test]
    fn test_inspect_json_has_no_segments_unless_asked() {
        let dir = tempdir().unwrap();
        drop(Database::open_with_config(dir.path(), maintenance_config().create_if_missing(true)).unwrap());

        let result = inspect(dir.path(), maintenance_config(), false).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"types\""));
        assert!(!json.contains("\"segments\":["));
    }

    #[test]
    fn test_inspect_missing_database_fails() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("nope"), maintenance_config(), false).is_err());
    }
}
