use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// File-level administration for the embedded backend.
///
/// There are no logins or users; deleting the database removes its file.
pub struct SqliteAdmin;

impl SqliteAdmin {
    /// Remove the database file and its WAL side files.
    ///
    /// Returns `true` when the file is gone afterwards, including when it
    /// never existed.
    pub fn delete_database(path: &Path) -> bool {
        if !path.exists() {
            debug!(path = %path.display(), "SQLite database file already absent");
            return true;
        }

        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to delete SQLite database");
            return false;
        }

        for suffix in ["-wal", "-shm"] {
            let side = side_file(path, suffix);
            if side.exists()
                && let Err(e) = std::fs::remove_file(&side)
            {
                warn!(path = %side.display(), error = %e, "Failed to delete SQLite side file");
            }
        }

        info!(path = %path.display(), "Deleted SQLite database");
        true
    }
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
