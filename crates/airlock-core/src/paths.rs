use crate::error::{AirlockError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const AIRLOCK_DIR: &str = ".airlock";
pub const REFERENCE_DIR: &str = ".airlock/reference";
pub const DIGESTS_DIR: &str = ".airlock/digests";

pub const CONFIG_FILE: &str = ".airlock/config.yaml";
pub const DB_FILE: &str = ".airlock/airlock.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn airlock_dir(root: &Path) -> PathBuf {
    root.join(AIRLOCK_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn reference_dir(root: &Path) -> PathBuf {
    root.join(REFERENCE_DIR)
}

pub fn reference_path(root: &Path, state_id: &str) -> PathBuf {
    reference_dir(root).join(format!("{state_id}.yaml"))
}

pub fn digest_path(root: &Path, week_ending: chrono::NaiveDate) -> PathBuf {
    root.join(DIGESTS_DIR)
        .join(format!("{}.yaml", week_ending.format("%Y-%m-%d")))
}

// ---------------------------------------------------------------------------
// State id validation
// ---------------------------------------------------------------------------

static STATE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn state_id_re() -> &'static Regex {
    STATE_ID_RE.get_or_init(|| Regex::new(r"^[A-Z]{2}$").expect("static regex"))
}

/// State ids are postal codes ("CO", "WY"). They double as reference file
/// names, so anything else is rejected before it reaches the filesystem.
pub fn validate_state_id(state_id: &str) -> Result<()> {
    if !state_id_re().is_match(state_id) {
        return Err(AirlockError::InvalidStateId(state_id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_state_ids() {
        for id in ["CO", "WY", "MT", "NM"] {
            validate_state_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_state_ids() {
        for id in ["", "co", "COL", "C", "../etc", "C0"] {
            assert!(validate_state_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.airlock/config.yaml")
        );
        assert_eq!(
            reference_path(root, "CO"),
            PathBuf::from("/tmp/proj/.airlock/reference/CO.yaml")
        );
        let week = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            digest_path(root, week),
            PathBuf::from("/tmp/proj/.airlock/digests/2026-03-01.yaml")
        );
    }
}
