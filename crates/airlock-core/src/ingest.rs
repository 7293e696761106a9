//! Raw scraper rows and their typed form.
//!
//! Scrapers emit loosely shaped JSON. Every string-typed decision (fee
//! classification, residency, deadline type) is made here, once, so the
//! snapshot builder and evaluator only ever see tagged variants.

use crate::error::{AirlockError, Result};
use crate::snapshot::DrawRules;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Species key used for deadline rows that apply to every species.
pub const ALL_SPECIES: &str = "general";

// ---------------------------------------------------------------------------
// Raw rows (scraper output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeeRow {
    pub fee_name: String,
    pub amount: f64,
    pub residency: String,
    #[serde(default)]
    pub species_id: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeadlineRow {
    pub deadline_type: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub species_id: Option<String>,
    pub year: i32,
}

/// One staged row as produced by the scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRow {
    Fee(RawFeeRow),
    Deadline(RawDeadlineRow),
    DrawRules(DrawRules),
    SpeciesList { available: Vec<String> },
}

impl RawRow {
    /// Reject rows that can never be evaluated. Applied before staging so a
    /// malformed row cannot strand its batch.
    pub fn validate(&self) -> Result<()> {
        match self {
            RawRow::Fee(raw) => {
                FeeRow::parse(raw)?;
            }
            RawRow::Deadline(raw) => {
                if raw.deadline_type.trim().is_empty() {
                    return Err(AirlockError::InvalidValue {
                        kind: "deadline type",
                        value: raw.deadline_type.clone(),
                    });
                }
            }
            RawRow::DrawRules(rules) => {
                if let Some(pct) = rules.preference_split_pct {
                    if !(0.0..=100.0).contains(&pct) {
                        return Err(AirlockError::InvalidValue {
                            kind: "preference split percentage",
                            value: pct.to_string(),
                        });
                    }
                }
            }
            RawRow::SpeciesList { .. } => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Residency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Residency {
    Resident,
    Nonresident,
    /// Same fee for both; routed into both maps.
    Both,
}

impl Residency {
    pub fn as_str(self) -> &'static str {
        match self {
            Residency::Resident => "resident",
            Residency::Nonresident => "nonresident",
            Residency::Both => "both",
        }
    }
}

impl std::str::FromStr for Residency {
    type Err = AirlockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "resident" | "res" => Ok(Residency::Resident),
            "nonresident" | "nonres" | "nr" => Ok(Residency::Nonresident),
            "both" | "all" | "any" => Ok(Residency::Both),
            _ => Err(AirlockError::InvalidValue {
                kind: "residency",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Fee classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    License,
    Application,
    /// Preference/bonus point purchase. Per species when the row names one.
    Point,
    Tag,
    /// License-level fee matching no keyword; kept in the fee schedule only.
    Other,
}

static POINT_FEE_RE: OnceLock<Regex> = OnceLock::new();
static POINT_RE: OnceLock<Regex> = OnceLock::new();
static APPLICATION_RE: OnceLock<Regex> = OnceLock::new();
static LICENSE_RE: OnceLock<Regex> = OnceLock::new();

fn point_fee_re() -> &'static Regex {
    POINT_FEE_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(point|preference)\b.*\b(fee|cost)s?\b").expect("static regex")
    })
}

fn point_re() -> &'static Regex {
    POINT_RE.get_or_init(|| Regex::new(r"(?i)\b(points?|preference)\b").expect("static regex"))
}

fn application_re() -> &'static Regex {
    APPLICATION_RE.get_or_init(|| Regex::new(r"(?i)application").expect("static regex"))
}

fn license_re() -> &'static Regex {
    LICENSE_RE.get_or_init(|| {
        Regex::new(r"(?i)license|qualifying|sportsman|conservation|habitat|combo")
            .expect("static regex")
    })
}

pub fn classify_fee(fee_name: &str, species_id: Option<&str>) -> FeeKind {
    if point_fee_re().is_match(fee_name) {
        return FeeKind::Point;
    }
    if species_id.is_some() {
        return FeeKind::Tag;
    }
    if application_re().is_match(fee_name) {
        FeeKind::Application
    } else if point_re().is_match(fee_name) {
        FeeKind::Point
    } else if license_re().is_match(fee_name) {
        FeeKind::License
    } else {
        FeeKind::Other
    }
}

// ---------------------------------------------------------------------------
// Typed rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRow {
    pub name: String,
    pub amount: f64,
    pub residency: Residency,
    pub species_id: Option<String>,
    pub frequency: Option<String>,
    pub kind: FeeKind,
}

impl FeeRow {
    pub fn parse(raw: &RawFeeRow) -> Result<Self> {
        let name = raw.fee_name.trim();
        if name.is_empty() {
            return Err(AirlockError::InvalidValue {
                kind: "fee name",
                value: raw.fee_name.clone(),
            });
        }
        if !raw.amount.is_finite() || raw.amount < 0.0 {
            return Err(AirlockError::InvalidValue {
                kind: "fee amount",
                value: raw.amount.to_string(),
            });
        }
        let species_id = raw
            .species_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase);

        Ok(Self {
            name: name.to_string(),
            amount: raw.amount,
            residency: raw.residency.parse()?,
            kind: classify_fee(name, species_id.as_deref()),
            species_id,
            frequency: raw.frequency.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    ApplicationOpen,
    ApplicationClose,
    DrawResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRow {
    pub kind: DeadlineKind,
    pub date: NaiveDate,
    pub species_id: String,
    pub year: i32,
}

impl DeadlineRow {
    /// `None` for deadline types the airlock does not track.
    pub fn parse(raw: &RawDeadlineRow) -> Option<Self> {
        let kind = match raw.deadline_type.trim() {
            "application_open" => DeadlineKind::ApplicationOpen,
            "application_close" => DeadlineKind::ApplicationClose,
            "draw_results" => DeadlineKind::DrawResults,
            _ => return None,
        };
        let species_id = raw
            .species_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| ALL_SPECIES.to_string());
        Some(Self {
            kind,
            date: raw.date,
            species_id,
            year: raw.year,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_fee(name: &str, species: Option<&str>) -> RawFeeRow {
        RawFeeRow {
            fee_name: name.to_string(),
            amount: 10.0,
            residency: "resident".to_string(),
            species_id: species.map(str::to_string),
            frequency: Some("annual".to_string()),
        }
    }

    #[test]
    fn point_fee_names_win_over_species() {
        assert_eq!(classify_fee("Preference Point Fee", Some("elk")), FeeKind::Point);
        assert_eq!(classify_fee("Bighorn point cost", Some("sheep")), FeeKind::Point);
    }

    #[test]
    fn species_rows_become_tags() {
        assert_eq!(classify_fee("Elk License", Some("elk")), FeeKind::Tag);
        assert_eq!(classify_fee("Application Fee", Some("moose")), FeeKind::Tag);
    }

    #[test]
    fn license_level_keywords() {
        assert_eq!(classify_fee("Application Fee", None), FeeKind::Application);
        assert_eq!(classify_fee("Preference Points", None), FeeKind::Point);
        assert_eq!(classify_fee("Qualifying License", None), FeeKind::License);
        assert_eq!(classify_fee("Habitat Stamp", None), FeeKind::License);
        assert_eq!(classify_fee("Sportsman Combo", None), FeeKind::License);
        assert_eq!(classify_fee("Search and Rescue Card", None), FeeKind::Other);
    }

    #[test]
    fn residency_parsing_is_lenient() {
        assert_eq!("Resident".parse::<Residency>().unwrap(), Residency::Resident);
        assert_eq!("non-resident".parse::<Residency>().unwrap(), Residency::Nonresident);
        assert_eq!("NON_RESIDENT".parse::<Residency>().unwrap(), Residency::Nonresident);
        assert_eq!("both".parse::<Residency>().unwrap(), Residency::Both);
        assert!("alien".parse::<Residency>().is_err());
    }

    #[test]
    fn fee_row_rejects_negative_amount() {
        let mut raw = raw_fee("Qualifying License", None);
        raw.amount = -5.0;
        assert!(matches!(
            FeeRow::parse(&raw),
            Err(AirlockError::InvalidValue { kind: "fee amount", .. })
        ));
    }

    #[test]
    fn fee_row_normalizes_species() {
        let row = FeeRow::parse(&raw_fee("Elk License", Some(" Elk "))).unwrap();
        assert_eq!(row.species_id.as_deref(), Some("elk"));
        assert_eq!(row.kind, FeeKind::Tag);
    }

    #[test]
    fn blank_species_is_license_level() {
        let row = FeeRow::parse(&raw_fee("Qualifying License", Some("  "))).unwrap();
        assert!(row.species_id.is_none());
        assert_eq!(row.kind, FeeKind::License);
    }

    #[test]
    fn deadline_row_kinds() {
        let raw = RawDeadlineRow {
            deadline_type: "application_close".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            species_id: None,
            year: 2026,
        };
        let row = DeadlineRow::parse(&raw).unwrap();
        assert_eq!(row.kind, DeadlineKind::ApplicationClose);
        assert_eq!(row.species_id, ALL_SPECIES);

        let other = RawDeadlineRow {
            deadline_type: "leftover_sale".to_string(),
            ..raw
        };
        assert!(DeadlineRow::parse(&other).is_none());
    }

    #[test]
    fn raw_row_json_is_tagged_by_kind() {
        let json = r#"{"kind":"fee","fee_name":"Elk License","amount":735.0,"residency":"nonresident","species_id":"elk"}"#;
        let row: RawRow = serde_json::from_str(json).unwrap();
        assert!(matches!(row, RawRow::Fee(ref f) if f.amount == 735.0));
        row.validate().unwrap();

        let species = r#"{"kind":"species_list","available":["elk","moose"]}"#;
        let row: RawRow = serde_json::from_str(species).unwrap();
        assert!(matches!(row, RawRow::SpeciesList { ref available } if available.len() == 2));
    }
}
