//! Whole-file writes under the airlock root.
//!
//! Reference baselines, `config.yaml` and saved digests are always rewritten
//! in full. Each write goes to a tempfile beside the target, is flushed to
//! disk, then renamed over it, so a crash mid-write leaves the old document.

use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace the contents of `path` with `bytes`, creating parent directories.
pub fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as YAML and replace `path` with it.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let doc = serde_yaml::to_string(value)?;
    replace_file(path, doc.as_bytes())
}

/// Write `value` as YAML only when `path` does not exist yet.
/// Returns whether the file was created.
pub fn seed_yaml<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    if path.try_exists()? {
        return Ok(false);
    }
    write_yaml(path, value)?;
    Ok(true)
}

pub fn ensure_dirs<P: AsRef<Path>>(dirs: impl IntoIterator<Item = P>) -> Result<()> {
    for dir in dirs {
        std::fs::create_dir_all(dir.as_ref())?;
    }
    Ok(())
}
