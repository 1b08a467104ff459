use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Data directory of one AVD under the AVD home.
pub fn avd_data_dir(avd_home: &Path, avd_name: &str) -> PathBuf {
    avd_home.join(format!("{avd_name}.avd"))
}

/// Deletes the `*.lock` entries an emulator leaves behind after an unclean
/// exit. Some emulator builds create lock directories rather than files, so
/// both are removed. Individual failures are logged and skipped.
///
/// Returns the removed paths. A missing data directory removes nothing.
pub fn clear_lock_files(avd_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(avd_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("lock") {
            continue;
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "removed stale AVD lock");
                removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove AVD lock"),
        }
    }
    removed.sort();
    Ok(removed)
}
