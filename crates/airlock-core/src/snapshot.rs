//! Immutable, versioned captures of one state's scraped regulatory data.
//!
//! A snapshot is created once per ingestion batch and never edited; a
//! correction is a new batch and therefore a new snapshot.

use crate::ingest::{DeadlineKind, DeadlineRow, FeeKind, FeeRow, RawRow, Residency};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Fee section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ByResidency<T> {
    #[serde(default)]
    pub resident: T,
    #[serde(default)]
    pub nonresident: T,
}

impl<T> ByResidency<T> {
    pub fn get(&self, residency: Residency) -> Option<&T> {
        match residency {
            Residency::Resident => Some(&self.resident),
            Residency::Nonresident => Some(&self.nonresident),
            Residency::Both => None,
        }
    }

    fn get_mut(&mut self, residency: Residency) -> Option<&mut T> {
        match residency {
            Residency::Resident => Some(&mut self.resident),
            Residency::Nonresident => Some(&mut self.nonresident),
            Residency::Both => None,
        }
    }
}

/// Concrete residencies a row with `residency` applies to.
fn applicants(residency: Residency) -> &'static [Residency] {
    match residency {
        Residency::Resident => &[Residency::Resident],
        Residency::Nonresident => &[Residency::Nonresident],
        Residency::Both => &[Residency::Resident, Residency::Nonresident],
    }
}

/// License-level fees that every applicant pays regardless of species.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseFees {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
}

impl LicenseFees {
    /// The slot a license-level row of `kind` fills, with its field name.
    fn slot_mut(&mut self, kind: FeeKind) -> Option<(&'static str, &mut Option<f64>)> {
        match kind {
            FeeKind::License => Some(("license", &mut self.license)),
            FeeKind::Application => Some(("application", &mut self.application)),
            FeeKind::Point => Some(("point", &mut self.point)),
            FeeKind::Tag | FeeKind::Other => None,
        }
    }

    fn overlay(&mut self, other: &LicenseFees) {
        if other.license.is_some() {
            self.license = other.license;
        }
        if other.application.is_some() {
            self.application = other.application;
        }
        if other.point.is_some() {
            self.point = other.point;
        }
    }
}

/// One named line of the published fee schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLineItem {
    pub name: String,
    pub amount: f64,
    pub residency: Residency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    /// Diff field paths of the typed slots this line also filled, e.g.
    /// `fees.license_fees.nonresident.license`. Empty for lines that only
    /// live in the schedule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<String>,
}

impl FeeLineItem {
    /// Identity used to match line items across snapshots.
    pub fn key(&self) -> (String, Residency, Option<String>) {
        (
            self.name.to_ascii_lowercase(),
            self.residency,
            self.species_id.clone(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeSection {
    #[serde(default)]
    pub license_fees: ByResidency<LicenseFees>,
    /// species id → tag cost
    #[serde(default)]
    pub tag_costs: ByResidency<BTreeMap<String, f64>>,
    /// species id → point cost
    #[serde(default)]
    pub point_costs: ByResidency<BTreeMap<String, f64>>,
    #[serde(default)]
    pub fee_schedule: Vec<FeeLineItem>,
}

impl FeeSection {
    pub fn is_empty(&self) -> bool {
        *self == FeeSection::default()
    }

    /// Overlay `other` onto `self`: every value present in `other` replaces
    /// the corresponding value here. Applying the same overlay twice yields
    /// the same result as applying it once.
    pub fn overlay(&mut self, other: &FeeSection) {
        self.license_fees
            .resident
            .overlay(&other.license_fees.resident);
        self.license_fees
            .nonresident
            .overlay(&other.license_fees.nonresident);
        for (species, cost) in &other.tag_costs.resident {
            self.tag_costs.resident.insert(species.clone(), *cost);
        }
        for (species, cost) in &other.tag_costs.nonresident {
            self.tag_costs.nonresident.insert(species.clone(), *cost);
        }
        for (species, cost) in &other.point_costs.resident {
            self.point_costs.resident.insert(species.clone(), *cost);
        }
        for (species, cost) in &other.point_costs.nonresident {
            self.point_costs.nonresident.insert(species.clone(), *cost);
        }
        for item in &other.fee_schedule {
            match self.fee_schedule.iter_mut().find(|i| i.key() == item.key()) {
                Some(existing) => *existing = item.clone(),
                None => self.fee_schedule.push(item.clone()),
            }
        }
    }

    fn add(&mut self, row: &FeeRow) {
        let mut slots = Vec::new();
        for &residency in applicants(row.residency) {
            let res = residency.as_str();
            match (row.kind, row.species_id.as_deref()) {
                (FeeKind::Tag, Some(species)) => {
                    if let Some(costs) = self.tag_costs.get_mut(residency) {
                        if !costs.contains_key(species) {
                            costs.insert(species.to_string(), row.amount);
                            slots.push(format!("fees.tag_costs.{res}.{species}"));
                        }
                    }
                }
                (FeeKind::Point, Some(species)) => {
                    if let Some(costs) = self.point_costs.get_mut(residency) {
                        if !costs.contains_key(species) {
                            costs.insert(species.to_string(), row.amount);
                            slots.push(format!("fees.point_costs.{res}.{species}"));
                        }
                    }
                }
                (FeeKind::Other, _) | (FeeKind::Tag, None) => {}
                (kind, None) => {
                    let Some((name, slot)) = self
                        .license_fees
                        .get_mut(residency)
                        .and_then(|fees| fees.slot_mut(kind))
                    else {
                        continue;
                    };
                    if slot.is_none() {
                        *slot = Some(row.amount);
                        slots.push(format!("fees.license_fees.{res}.{name}"));
                    } else {
                        debug!(
                            fee = %row.name,
                            "license-level slot already filled; keeping first row"
                        );
                    }
                }
                (FeeKind::License | FeeKind::Application, Some(_)) => {}
            }
        }

        self.fee_schedule.push(FeeLineItem {
            name: row.name.clone(),
            amount: row.amount,
            residency: row.residency,
            species_id: row.species_id.clone(),
            frequency: row.frequency.clone(),
            slots,
        });
    }
}

// ---------------------------------------------------------------------------
// Deadline section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadlineSection {
    /// species id → application window
    #[serde(default)]
    pub application_windows: BTreeMap<String, ApplicationWindow>,
    /// species id → draw result announcement date
    #[serde(default)]
    pub draw_results: BTreeMap<String, NaiveDate>,
}

impl DeadlineSection {
    fn add(&mut self, row: &DeadlineRow) {
        match row.kind {
            DeadlineKind::ApplicationOpen => {
                self.application_windows
                    .entry(row.species_id.clone())
                    .or_default()
                    .open = Some(row.date);
            }
            DeadlineKind::ApplicationClose => {
                self.application_windows
                    .entry(row.species_id.clone())
                    .or_default()
                    .close = Some(row.date);
            }
            DeadlineKind::DrawResults => {
                self.draw_results.insert(row.species_id.clone(), row.date);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Quotas, rules, species
// ---------------------------------------------------------------------------

/// Per-hunt tag quotas. No state publishes quota data in a form the
/// scrapers extract yet, so the builder never populates this section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSection {
    /// hunt code → tags available
    #[serde(default)]
    pub tags_by_hunt: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSystem {
    Preference,
    Bonus,
    Hybrid,
    Random,
    None,
}

impl PointSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            PointSystem::Preference => "preference",
            PointSystem::Bonus => "bonus",
            PointSystem::Hybrid => "hybrid",
            PointSystem::Random => "random",
            PointSystem::None => "none",
        }
    }
}

/// Structural rules of how a state's draw works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRules {
    pub point_system: PointSystem,
    /// Share of tags allocated by preference (rest random), when hybrid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_split_pct: Option<f64>,
    #[serde(default)]
    pub squared_bonus: bool,
    #[serde(default)]
    pub application_approach: String,
    #[serde(default)]
    pub once_in_a_lifetime: Vec<String>,
}

// ---------------------------------------------------------------------------
// StagingSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Scraper,
    Manual,
    Api,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingSnapshot {
    pub id: String,
    pub state_id: String,
    pub captured_at: DateTime<Utc>,
    pub source_url: String,
    pub data_version: String,
    pub capture_method: CaptureMethod,
    pub fees: FeeSection,
    pub deadlines: DeadlineSection,
    /// Always `None` until quota extraction exists.
    pub quotas: Option<QuotaSection>,
    pub rules: Option<DrawRules>,
    /// Available species, when the batch carried a species list.
    pub species: Option<Vec<String>>,
    pub captured_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_snapshot_id: Option<String>,
}

/// Provenance for a snapshot, supplied by the caller.
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub batch_id: String,
    pub state_id: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub capture_method: CaptureMethod,
    pub captured_by: String,
    pub notes: Option<String>,
    pub previous_snapshot_id: Option<String>,
}

pub fn snapshot_id(batch_id: &str) -> String {
    format!("snap-{batch_id}")
}

/// Build the typed snapshot for one batch of raw rows.
///
/// Rows that fail to parse are skipped with a warning; staging validation
/// normally keeps them out entirely.
pub fn build_snapshot(meta: SnapshotMeta, rows: &[RawRow]) -> StagingSnapshot {
    let mut fees = FeeSection::default();
    let mut deadlines = DeadlineSection::default();
    let mut rules = None;
    let mut species: Option<BTreeSet<String>> = None;

    for row in rows {
        match row {
            RawRow::Fee(raw) => match FeeRow::parse(raw) {
                Ok(fee) => fees.add(&fee),
                Err(e) => warn!(
                    state_id = %meta.state_id,
                    batch_id = %meta.batch_id,
                    error = %e,
                    "skipping unparseable fee row"
                ),
            },
            RawRow::Deadline(raw) => match DeadlineRow::parse(raw) {
                Some(deadline) => deadlines.add(&deadline),
                None => debug!(
                    deadline_type = %raw.deadline_type,
                    "ignoring untracked deadline type"
                ),
            },
            RawRow::DrawRules(r) => rules = Some(r.clone()),
            RawRow::SpeciesList { available } => {
                species
                    .get_or_insert_with(BTreeSet::new)
                    .extend(available.iter().map(|s| s.trim().to_ascii_lowercase()));
            }
        }
    }

    StagingSnapshot {
        id: snapshot_id(&meta.batch_id),
        data_version: format!(
            "{}-{}",
            meta.state_id,
            meta.captured_at.format("%Y%m%dT%H%M%SZ")
        ),
        state_id: meta.state_id,
        captured_at: meta.captured_at,
        source_url: meta.source_url,
        capture_method: meta.capture_method,
        fees,
        deadlines,
        quotas: None,
        rules,
        species: species.map(|s| s.into_iter().collect()),
        captured_by: meta.captured_by,
        notes: meta.notes,
        previous_snapshot_id: meta.previous_snapshot_id,
    }
}

/// Fee payload derived from `rows` alone.
///
/// Promotion applies this to the production baseline. It is a pure function
/// of the rows, so promoting the same approved rows again is a no-op.
pub fn fee_payload<'a>(rows: impl IntoIterator<Item = &'a RawRow>) -> FeeSection {
    let mut fees = FeeSection::default();
    for row in rows {
        if let RawRow::Fee(raw) = row {
            if let Ok(fee) = FeeRow::parse(raw) {
                fees.add(&fee);
            }
        }
    }
    fees
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
