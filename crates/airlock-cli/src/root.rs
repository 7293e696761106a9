use airlock_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `AIRLOCK_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.airlock/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_airlock_root(&cwd).unwrap_or(cwd)
}

fn find_airlock_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(paths::AIRLOCK_DIR).is_dir())
        .map(Path::to_path_buf)
}
