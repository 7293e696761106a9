//! Staleness labels for individual verified data points.
//!
//! A stamp is always derived from `last_verified_at`; it is never stored.

use crate::error::AirlockError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessLevel {
    Fresh,
    Aging,
    Stale,
    Critical,
}

impl StalenessLevel {
    pub fn for_age(age: Duration) -> Self {
        if age < Duration::hours(24) {
            StalenessLevel::Fresh
        } else if age < Duration::days(4) {
            StalenessLevel::Aging
        } else if age < Duration::days(14) {
            StalenessLevel::Stale
        } else {
            StalenessLevel::Critical
        }
    }

    pub fn is_stale(self) -> bool {
        matches!(self, StalenessLevel::Stale | StalenessLevel::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Scraper,
    Manual,
    OfficialApi,
}

impl VerificationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationMethod::Scraper => "scraper",
            VerificationMethod::Manual => "manual",
            VerificationMethod::OfficialApi => "official_api",
        }
    }
}

impl std::str::FromStr for VerificationMethod {
    type Err = AirlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scraper" => Ok(VerificationMethod::Scraper),
            "manual" => Ok(VerificationMethod::Manual),
            "official_api" | "api" => Ok(VerificationMethod::OfficialApi),
            _ => Err(AirlockError::InvalidValue {
                kind: "verification method",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessStamp {
    pub state_id: String,
    pub field: String,
    pub last_verified_at: DateTime<Utc>,
    pub verification_method: VerificationMethod,
    pub source_url: String,
    pub freshness_label: String,
    pub is_stale: bool,
    pub staleness_level: StalenessLevel,
}

/// Compute the freshness stamp for one data point as of `now`.
///
/// Timestamps in the future (clock skew between scraper and caller) count
/// as verified just now.
pub fn stamp(
    state_id: &str,
    field: &str,
    last_verified_at: DateTime<Utc>,
    source_url: &str,
    verification_method: VerificationMethod,
    now: DateTime<Utc>,
) -> FreshnessStamp {
    let age = (now - last_verified_at).max(Duration::zero());
    let level = StalenessLevel::for_age(age);

    FreshnessStamp {
        state_id: state_id.to_string(),
        field: field.to_string(),
        last_verified_at,
        verification_method,
        source_url: source_url.to_string(),
        freshness_label: label(level, age),
        is_stale: level.is_stale(),
        staleness_level: level,
    }
}

fn label(level: StalenessLevel, age: Duration) -> String {
    let hours = age.num_hours();
    let days = age.num_days();
    match level {
        StalenessLevel::Fresh if hours < 1 => "Verified just now".to_string(),
        StalenessLevel::Fresh => format!("Verified {hours} {} ago", plural(hours, "hour")),
        StalenessLevel::Aging => format!("Verified {days} {} ago", plural(days, "day")),
        StalenessLevel::Stale => format!("Stale: last verified {days} days ago"),
        StalenessLevel::Critical => format!("CRITICAL: not verified in {days} days"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        unit.to_string()
    } else {
        format!("{unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    fn stamp_aged(age: Duration) -> FreshnessStamp {
        stamp(
            "CO",
            "fees.resident.license",
            now() - age,
            "https://cpw.state.co.us/fees",
            VerificationMethod::Scraper,
            now(),
        )
    }

    #[test]
    fn just_now_and_hours_are_distinct() {
        let recent = stamp_aged(Duration::minutes(20));
        assert_eq!(recent.freshness_label, "Verified just now");
        assert_eq!(recent.staleness_level, StalenessLevel::Fresh);

        let hours = stamp_aged(Duration::hours(5));
        assert_eq!(hours.freshness_label, "Verified 5 hours ago");

        let one = stamp_aged(Duration::minutes(61));
        assert_eq!(one.freshness_label, "Verified 1 hour ago");
    }

    #[test]
    fn exactly_24_hours_is_aging() {
        let s = stamp_aged(Duration::hours(24));
        assert_eq!(s.staleness_level, StalenessLevel::Aging);
        assert!(!s.is_stale);
        assert_eq!(s.freshness_label, "Verified 1 day ago");
    }

    #[test]
    fn just_under_24_hours_is_fresh() {
        let s = stamp_aged(Duration::hours(24) - Duration::seconds(1));
        assert_eq!(s.staleness_level, StalenessLevel::Fresh);
    }

    #[test]
    fn four_days_is_stale() {
        let s = stamp_aged(Duration::days(4));
        assert_eq!(s.staleness_level, StalenessLevel::Stale);
        assert!(s.is_stale);
        assert!(s.freshness_label.starts_with("Stale:"));
    }

    #[test]
    fn exactly_14_days_is_critical() {
        let s = stamp_aged(Duration::days(14));
        assert_eq!(s.staleness_level, StalenessLevel::Critical);
        assert!(s.is_stale);
        assert!(s.freshness_label.starts_with("CRITICAL:"));

        let before = stamp_aged(Duration::days(14) - Duration::seconds(1));
        assert_eq!(before.staleness_level, StalenessLevel::Stale);
    }

    #[test]
    fn future_timestamp_counts_as_fresh() {
        let s = stamp_aged(-Duration::hours(3));
        assert_eq!(s.staleness_level, StalenessLevel::Fresh);
        assert_eq!(s.freshness_label, "Verified just now");
    }
}
