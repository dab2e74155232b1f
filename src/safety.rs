//! Safety checks to prevent clobbering the catalog database.
//!
//! The export writes a fresh JSON file over whatever is at the target path,
//! so the path is checked before anything is opened for writing.

use anyhow::{bail, Result};
use std::path::Path;

/// Validates that an export path is safe to overwrite.
///
/// Checks:
/// - The file name must end in `.json`
/// - The path must not be the catalog database (or one of its WAL files)
pub fn validate_export_path(output: &Path, database: &Path) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.ends_with(".json") {
        bail!(
            "Safety check failed: export file '{}' must end in '.json'",
            output.display()
        );
    }

    if output == database {
        bail!(
            "Safety check failed: export '{}' cannot be the catalog database",
            output.display()
        );
    }

    // SQLite keeps -wal / -shm siblings next to the database
    let db_name = database.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if !db_name.is_empty()
        && output.parent() == database.parent()
        && output_name.starts_with(db_name)
    {
        bail!(
            "Safety check failed: export '{}' collides with database files of '{}'",
            output.display(),
            database.display()
        );
    }

    Ok(())
}
