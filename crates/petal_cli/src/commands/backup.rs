//! Backup command implementation.

use super::format_size;
use petal_core::{BackupInfo, Config, Database};
use std::path::Path;
use tracing::info;

/// Copies the database at `path` into `dest`.
///
/// The source is opened normally, so the copy reflects a consistent state
/// even if the last run left a torn tail or leftover GC output behind.
pub fn backup(
    path: &Path,
    config: Config,
    dest: &Path,
) -> Result<BackupInfo, Box<dyn std::error::Error>> {
    info!("Creating backup of {}", path.display());

    let db = Database::open_with_config(path, config)?;
    let backup_info = db.backup(dest)?;
    db.close()?;
    Ok(backup_info)
}

/// Runs the backup command.
pub fn run(path: &Path, config: Config, dest: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let backup_info = backup(path, config, dest)?;

    println!("✓ Backup created successfully");
    println!("  Path:     {}", dest.display());
    println!("  Segments: {}", backup_info.segments);
    println!("  Size:     {}", format_size(backup_info.bytes));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config() -> Config {
        Config::default().gc_interval(Duration::ZERO)
    }

    #[test]
    fn test_backup_opens_as_database() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        let dest = dir.path().join("copy");
        {
            let db = Database::open_with_config(&source, config()).unwrap();
            db.set(b"k", b"v").unwrap();
            db.sadd(b"s", &["a", "b"]).unwrap();
        }

        let info = backup(&source, config().create_if_missing(false), &dest).unwrap();
        assert!(info.segments >= 2);
        assert!(info.bytes > 0);

        let copy = Database::open_with_config(&dest, config()).unwrap();
        assert_eq!(copy.get(b"k").unwrap(), b"v");
        assert_eq!(copy.scard(b"s").unwrap(), 2);
    }

    #[test]
    fn test_backup_of_missing_database_fails() {
        let dir = tempdir().unwrap();
        let result = backup(
            &dir.path().join("missing"),
            config().create_if_missing(false),
            &dir.path().join("copy"),
        );
        assert!(result.is_err());
    }
}
