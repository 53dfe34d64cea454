//! Safety checks run before the library file is touched.
//!
//! The database is the user's only copy of their play history, so every
//! path that gets written is checked first.

use anyhow::{bail, Result};
use std::path::Path;

/// Validates that the database path points at an existing regular file.
/// An unusual extension is only worth a warning.
pub fn validate_library_path(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("Safety check failed: library '{}' does not exist", path.display());
    }
    if !path.is_file() {
        bail!("Safety check failed: library '{}' is not a regular file", path.display());
    }
    let is_xml = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("xml"));
    if !is_xml {
        log::warn!(
            "Library '{}' does not have an .xml extension; reading it anyway",
            path.display()
        );
    }
    Ok(())
}

/// Validates that a backup path is safe to create.
///
/// Checks:
/// - Backup filename must contain ".backup-"
/// - Backup cannot be the database itself
/// - Backup must not already exist (an earlier backup is never overwritten)
pub fn validate_backup_path(backup: &Path, library: &Path) -> Result<()> {
    let backup_name = backup.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !backup_name.contains(".backup-") {
        bail!(
            "Safety check failed: backup file '{}' must contain '.backup-' in the name",
            backup.display()
        );
    }

    if backup == library {
        bail!(
            "Safety check failed: backup '{}' cannot be the same as library '{}'",
            backup.display(),
            library.display()
        );
    }

    if backup.exists() {
        bail!(
            "Safety check failed: backup '{}' already exists",
            backup.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_backup() {
        let library = PathBuf::from("/tmp/does-not-exist/rhythmdb.xml");
        let backup = PathBuf::from("/tmp/does-not-exist/rhythmdb.xml.backup-1700000000");
        assert!(validate_backup_path(&backup, &library).is_ok());
    }

    #[test]
    fn test_missing_pattern() {
        let library = PathBuf::from("/tmp/rhythmdb.xml");
        let backup = PathBuf::from("/tmp/rhythmdb.old");
        let result = validate_backup_path(&backup, &library);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must contain '.backup-'"));
    }

    #[test]
    fn test_backup_equals_library() {
        let path = PathBuf::from("/tmp/rhythmdb.xml.backup-1");
        let result = validate_backup_path(&path, &path);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as library"));
    }

    #[test]
    fn test_existing_backup_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("rhythmdb.xml");
        let backup = dir.path().join("rhythmdb.xml.backup-1");
        std::fs::write(&backup, "old").unwrap();
        assert!(validate_backup_path(&backup, &library).is_err());
    }

    #[test]
    fn test_library_must_be_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("rhythmdb.xml");
        assert!(validate_library_path(&missing).is_err());

        let other_name = dir.path().join("rhythmdb.db");
        std::fs::write(&other_name, "").unwrap();
        assert!(validate_library_path(&other_name).is_ok());

        std::fs::write(&missing, "<rhythmdb/>").unwrap();
        assert!(validate_library_path(&missing).is_ok());
        assert!(validate_library_path(dir.path()).is_err());
    }
}
