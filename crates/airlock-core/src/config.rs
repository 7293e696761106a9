use crate::error::{AirlockError, Result};
use crate::paths;
use crate::types::DataCategory;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AirlockTolerances
// ---------------------------------------------------------------------------

/// Thresholds beyond which a detected change is blocked or flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirlockTolerances {
    #[serde(default = "default_fee_increase_max_pct")]
    pub fee_increase_max_pct: f64,
    /// Government fee cuts are rare; a drop is more often a scrape error.
    #[serde(default = "default_fee_decrease_max_pct")]
    pub fee_decrease_max_pct: f64,
    #[serde(default = "default_deadline_shift_max_days")]
    pub deadline_shift_max_days: i64,
    #[serde(default = "default_true")]
    pub block_on_rule_mutation: bool,
    #[serde(default = "default_true")]
    pub warn_on_species_added: bool,
    #[serde(default = "default_true")]
    pub block_on_species_removal: bool,
}

fn default_fee_increase_max_pct() -> f64 {
    8.0
}

fn default_fee_decrease_max_pct() -> f64 {
    1.0
}

fn default_deadline_shift_max_days() -> i64 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for AirlockTolerances {
    fn default() -> Self {
        Self {
            fee_increase_max_pct: default_fee_increase_max_pct(),
            fee_decrease_max_pct: default_fee_decrease_max_pct(),
            deadline_shift_max_days: default_deadline_shift_max_days(),
            block_on_rule_mutation: true,
            warn_on_species_added: true,
            block_on_species_removal: true,
        }
    }
}

// ---------------------------------------------------------------------------
// BackoffPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay_minutes")]
    pub base_delay_minutes: i64,
    #[serde(default = "default_max_delay_hours")]
    pub max_delay_hours: i64,
    /// Consecutive failures at which crawling stops until a human intervenes.
    #[serde(default = "default_pause_after_failures")]
    pub pause_after_failures: u32,
}

fn default_base_delay_minutes() -> i64 {
    5
}

fn default_max_delay_hours() -> i64 {
    24
}

fn default_pause_after_failures() -> u32 {
    10
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_minutes: default_base_delay_minutes(),
            max_delay_hours: default_max_delay_hours(),
            pause_after_failures: default_pause_after_failures(),
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_categories")]
    pub categories: Vec<DataCategory>,
    /// Fees and regulations switch from weekly to daily inside this window.
    #[serde(default = "default_deadline_window_days")]
    pub deadline_window_days: i64,
}

fn default_categories() -> Vec<DataCategory> {
    DataCategory::all().to_vec()
}

fn default_deadline_window_days() -> i64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            deadline_window_days: default_deadline_window_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tolerances: AirlockTolerances,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new() -> Self {
        Self {
            version: 1,
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(AirlockError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::new());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        crate::io::write_yaml(&path, self)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let t = &self.tolerances;

        if t.fee_increase_max_pct <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "tolerances.fee_increase_max_pct={} blocks every fee increase",
                    t.fee_increase_max_pct
                ),
            });
        }
        if t.fee_decrease_max_pct < 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "tolerances.fee_decrease_max_pct={} is negative",
                    t.fee_decrease_max_pct
                ),
            });
        }
        if t.fee_increase_max_pct > 50.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "tolerances.fee_increase_max_pct={} (>50 is unusual)",
                    t.fee_increase_max_pct
                ),
            });
        }
        if t.deadline_shift_max_days < 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "tolerances.deadline_shift_max_days={} is negative",
                    t.deadline_shift_max_days
                ),
            });
        }
        if !t.block_on_rule_mutation {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "tolerances.block_on_rule_mutation is off: draw-rule changes \
                          will only warn"
                    .to_string(),
            });
        }

        let b = &self.backoff;
        if b.pause_after_failures == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "backoff.pause_after_failures=0 pauses every crawler immediately"
                    .to_string(),
            });
        }
        if b.base_delay_minutes <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "backoff.base_delay_minutes={} must be positive",
                    b.base_delay_minutes
                ),
            });
        }
        if b.max_delay_hours * 60 < b.base_delay_minutes {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "backoff.max_delay_hours={} is below the base delay of {} minutes",
                    b.max_delay_hours, b.base_delay_minutes
                ),
            });
        }

        if self.scheduler.categories.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "scheduler.categories is empty: nothing will be crawled".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tolerance_defaults() {
        let t = AirlockTolerances::default();
        assert_eq!(t.fee_increase_max_pct, 8.0);
        assert_eq!(t.fee_decrease_max_pct, 1.0);
        assert_eq!(t.deadline_shift_max_days, 3);
        assert!(t.block_on_rule_mutation);
        assert!(t.warn_on_species_added);
        assert!(t.block_on_species_removal);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
tolerances:
  fee_increase_max_pct: 12.5
backoff:
  pause_after_failures: 6
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.tolerances.fee_increase_max_pct, 12.5);
        assert_eq!(cfg.tolerances.fee_decrease_max_pct, 1.0);
        assert_eq!(cfg.backoff.pause_after_failures, 6);
        assert_eq!(cfg.backoff.base_delay_minutes, 5);
        assert_eq!(cfg.scheduler.categories.len(), 4);
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(AirlockError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new();
        cfg.tolerances.deadline_shift_max_days = 5;
        cfg.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.tolerances.deadline_shift_max_days, 5);
        assert_eq!(loaded.backoff, BackoffPolicy::default());
    }

    #[test]
    fn empty_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".airlock")).unwrap();
        std::fs::write(dir.path().join(".airlock/config.yaml"), "").unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.tolerances, AirlockTolerances::default());
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::new().validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_pause_threshold() {
        let mut cfg = Config::new();
        cfg.backoff.pause_after_failures = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("pause_after_failures")));
    }

    #[test]
    fn validate_flags_cap_below_base() {
        let mut cfg = Config::new();
        cfg.backoff.base_delay_minutes = 120;
        cfg.backoff.max_delay_hours = 1;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("below the base delay")));
    }

    #[test]
    fn validate_flags_relaxed_rule_mutation() {
        let mut cfg = Config::new();
        cfg.tolerances.block_on_rule_mutation = false;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("block_on_rule_mutation")));
    }

    #[test]
    fn validate_flags_empty_categories() {
        let mut cfg = Config::new();
        cfg.scheduler.categories.clear();
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("nothing will be crawled")));
    }
}
