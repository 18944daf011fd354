//! Idempotent filesystem reset helpers

use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Delete `path` if it exists. Directories need `recursive` to take their
/// contents with them. Returns whether anything was removed.
pub async fn remove_if_exists(path: &Path, recursive: bool) -> Result<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let removed = if metadata.is_dir() {
        if recursive {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_dir(path).await
        }
    } else {
        tokio::fs::remove_file(path).await
    };

    match removed {
        Ok(()) => {
            debug!("Removed {:?}", path);
            Ok(true)
        }
        // Lost a race with something else deleting it; the end state is the same.
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Create `path` and its parents if absent. Returns whether it was created.
pub async fn create_if_missing(path: &Path) -> Result<bool> {
    if tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(false);
    }
    tokio::fs::create_dir_all(path).await?;
    debug!("Created {:?}", path);
    Ok(true)
}
