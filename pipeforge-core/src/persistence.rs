//! Shared persistence utilities: exclusive atomic JSON writes and JSON
//! loading for the local artifact store.

use std::io;
use std::path::{Path, PathBuf};

/// Write JSON to `path` only if no file exists there yet.
///
/// The data is written to a uniquely named `.tmp` sibling first, then
/// hard-linked onto the target. Linking fails when the target exists, so a
/// reader never sees a half-written file and two writers racing for the same
/// path cannot both succeed. Returns `Ok(false)` when the path is taken.
pub fn create_new_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<bool> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    let tmp = write_tmp(path, json.as_bytes())?;
    let linked = std::fs::hard_link(&tmp, path);
    discard_tmp(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort cleanup; a leftover tmp file never changes the outcome.
fn discard_tmp(tmp: &Path) {
    if let Err(e) = std::fs::remove_file(tmp) {
        tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temporary file");
    }
}

fn write_tmp(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, data)?;
    Ok(tmp)
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
