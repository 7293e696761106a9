//! Diff and tolerance evaluation ("the airlock").
//!
//! `evaluate` is a pure function of a snapshot, a live baseline and the
//! tolerances. Every field present on both sides that differs produces
//! exactly one [`DiffEntry`]; fields missing from the baseline pass
//! silently because there is nothing to compare against.
//!
//! Severity rules:
//!
//! | change                              | severity                         |
//! |-------------------------------------|----------------------------------|
//! | fee increase > `fee_increase_max_pct` | block                          |
//! | fee decrease > `fee_decrease_max_pct` | block                          |
//! | other fee change                    | pass                             |
//! | open/close shift > `deadline_shift_max_days` | block                   |
//! | draw-result shift > threshold       | warn (never block)               |
//! | any draw-rule mutation              | block, or warn if relaxed        |
//! | species added                       | warn, or pass if relaxed         |
//! | species removed                     | block, or warn if relaxed        |

use crate::baseline::LiveBaseline;
use crate::config::AirlockTolerances;
use crate::ingest::Residency;
use crate::snapshot::{DrawRules, FeeSection, LicenseFees, StagingSnapshot};
use crate::types::Severity;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffCategory {
    Fees,
    Deadlines,
    Quotas,
    Rules,
    Species,
}

impl DiffCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffCategory::Fees => "fees",
            DiffCategory::Deadlines => "deadlines",
            DiffCategory::Quotas => "quotas",
            DiffCategory::Rules => "rules",
            DiffCategory::Species => "species",
        }
    }
}

impl std::fmt::Display for DiffCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected change between a snapshot and its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: String,
    pub category: DiffCategory,
    /// Dotted path of the changed field, e.g. `fees.tag_costs.nonresident.elk`.
    pub field: String,
    pub label: String,
    pub severity: Severity,
    pub old_value: Value,
    pub new_value: Value,
    pub change_description: String,
    pub tolerance_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct_change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirlockVerdict {
    pub snapshot_id: String,
    pub state_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub overall_verdict: Severity,
    pub diffs: Vec<DiffEntry>,
    pub block_count: usize,
    pub warn_count: usize,
    pub pass_count: usize,
    pub summary: String,
    pub can_auto_promote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
}

impl AirlockVerdict {
    pub fn blocked(&self) -> impl Iterator<Item = &DiffEntry> {
        self.diffs.iter().filter(|d| d.severity == Severity::Block)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Evaluate `snapshot` against `baseline`.
pub fn evaluate(
    snapshot: &StagingSnapshot,
    baseline: &LiveBaseline,
    tolerances: &AirlockTolerances,
    evaluated_at: DateTime<Utc>,
) -> AirlockVerdict {
    let mut diffs = Diffs::new(&snapshot.id, tolerances);

    diffs.fees(&snapshot.fees, &baseline.fees);
    diffs.deadlines(snapshot, baseline);
    if snapshot.quotas.is_some() {
        // Quota thresholds are undefined until live quota data exists.
        warn!(
            state_id = %snapshot.state_id,
            snapshot_id = %snapshot.id,
            "quota diffing not yet supported; quota section ignored"
        );
    }
    if let (Some(new), Some(old)) = (&snapshot.rules, &baseline.rules) {
        diffs.rules(new, old);
    }
    if let Some(species) = &snapshot.species {
        if !baseline.available_species.is_empty() {
            diffs.species(species, &baseline.available_species);
        }
    }

    let verdict = aggregate(snapshot, diffs.entries, evaluated_at);
    debug!(
        state_id = %verdict.state_id,
        snapshot_id = %verdict.snapshot_id,
        verdict = %verdict.overall_verdict,
        blocks = verdict.block_count,
        warns = verdict.warn_count,
        "snapshot evaluated"
    );
    verdict
}

/// Compare two snapshots of the same state, `older` acting as baseline.
pub fn diff_snapshots(
    older: &StagingSnapshot,
    newer: &StagingSnapshot,
    tolerances: &AirlockTolerances,
    evaluated_at: DateTime<Utc>,
) -> AirlockVerdict {
    evaluate(
        newer,
        &LiveBaseline::from_snapshot(older),
        tolerances,
        evaluated_at,
    )
}

fn aggregate(
    snapshot: &StagingSnapshot,
    diffs: Vec<DiffEntry>,
    evaluated_at: DateTime<Utc>,
) -> AirlockVerdict {
    let count = |s: Severity| diffs.iter().filter(|d| d.severity == s).count();
    let block_count = count(Severity::Block);
    let warn_count = count(Severity::Warn);
    let pass_count = count(Severity::Pass);

    let overall_verdict = if block_count > 0 {
        Severity::Block
    } else if warn_count > 0 {
        Severity::Warn
    } else {
        Severity::Pass
    };

    let summary = match overall_verdict {
        Severity::Pass if diffs.is_empty() => {
            format!("{}: no changes against the live baseline", snapshot.state_id)
        }
        Severity::Pass => format!(
            "{}: {pass_count} change(s), all within tolerance",
            snapshot.state_id
        ),
        Severity::Warn => format!(
            "{}: {warn_count} change(s) flagged for review, {pass_count} within tolerance",
            snapshot.state_id
        ),
        Severity::Block => format!(
            "{}: {block_count} change(s) blocked, {warn_count} flagged, {pass_count} within tolerance",
            snapshot.state_id
        ),
    };

    let required_action = match overall_verdict {
        Severity::Pass => None,
        Severity::Warn => Some(format!(
            "Confirm {warn_count} flagged item(s) before approving this batch."
        )),
        Severity::Block => Some(format!(
            "Review {block_count} blocked item(s) against the official {} source before promotion.",
            snapshot.state_id
        )),
    };

    AirlockVerdict {
        snapshot_id: snapshot.id.clone(),
        state_id: snapshot.state_id.clone(),
        evaluated_at,
        overall_verdict,
        diffs,
        block_count,
        warn_count,
        pass_count,
        summary,
        can_auto_promote: overall_verdict == Severity::Pass,
        required_action,
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Percent change from `old` to `new`, rounded to four decimals.
/// A change from zero counts as +100% (or 0% if still zero).
pub fn pct_change(old: f64, new: f64) -> f64 {
    let raw = if old == 0.0 {
        if new > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (new - old) / old * 100.0
    };
    (raw * 10_000.0).round() / 10_000.0
}

pub fn fee_severity(pct: f64, tolerances: &AirlockTolerances) -> Severity {
    if pct > tolerances.fee_increase_max_pct || -pct > tolerances.fee_decrease_max_pct {
        Severity::Block
    } else {
        Severity::Pass
    }
}

fn amounts_differ(old: f64, new: f64) -> bool {
    (old - new).abs() > 1e-9
}

fn residency_label(residency: Residency) -> &'static str {
    match residency {
        Residency::Resident => "Resident",
        Residency::Nonresident => "Nonresident",
        Residency::Both => "All applicants",
    }
}

// ---------------------------------------------------------------------------
// Diff accumulation
// ---------------------------------------------------------------------------

struct Diffs<'a> {
    snapshot_id: &'a str,
    tolerances: &'a AirlockTolerances,
    entries: Vec<DiffEntry>,
    seen: HashSet<String>,
    /// Fee fields present on both sides, whether or not they changed.
    compared: HashSet<String>,
}

struct Change {
    category: DiffCategory,
    field: String,
    label: String,
    severity: Severity,
    old_value: Value,
    new_value: Value,
    change_description: String,
    tolerance_rule: String,
    pct_change: Option<f64>,
    days_delta: Option<i64>,
    species_id: Option<String>,
}

impl<'a> Diffs<'a> {
    fn new(snapshot_id: &'a str, tolerances: &'a AirlockTolerances) -> Self {
        Self {
            snapshot_id,
            tolerances,
            entries: Vec::new(),
            seen: HashSet::new(),
            compared: HashSet::new(),
        }
    }

    fn push(&mut self, change: Change) {
        if !self.seen.insert(change.field.clone()) {
            return;
        }
        self.entries.push(DiffEntry {
            id: format!("{}:{}", self.snapshot_id, change.field),
            category: change.category,
            field: change.field,
            label: change.label,
            severity: change.severity,
            old_value: change.old_value,
            new_value: change.new_value,
            change_description: change.change_description,
            tolerance_rule: change.tolerance_rule,
            pct_change: change.pct_change,
            days_delta: change.days_delta,
            species_id: change.species_id,
        });
    }

    // -- fees ---------------------------------------------------------------

    fn fee(&mut self, field: String, label: String, old: f64, new: f64, species: Option<&str>) {
        self.compared.insert(field.clone());
        if !amounts_differ(old, new) {
            return;
        }
        let t = self.tolerances;
        let pct = pct_change(old, new);
        let severity = fee_severity(pct, t);
        let tolerance_rule = if pct > t.fee_increase_max_pct {
            format!("increase exceeds {}% limit", t.fee_increase_max_pct)
        } else if -pct > t.fee_decrease_max_pct {
            format!("decrease exceeds {}% limit", t.fee_decrease_max_pct)
        } else {
            format!(
                "within +{}% / -{}% tolerance",
                t.fee_increase_max_pct, t.fee_decrease_max_pct
            )
        };
        self.push(Change {
            category: DiffCategory::Fees,
            change_description: format!("${old:.2} → ${new:.2} ({pct:+.1}%)"),
            field,
            label,
            severity,
            old_value: json!(old),
            new_value: json!(new),
            tolerance_rule,
            pct_change: Some(pct),
            days_delta: None,
            species_id: species.map(str::to_string),
        });
    }

    fn fees(&mut self, new: &FeeSection, old: &FeeSection) {
        for residency in [Residency::Resident, Residency::Nonresident] {
            let res = residency.as_str();
            let who = residency_label(residency);
            if let (Some(n), Some(o)) = (
                new.license_fees.get(residency),
                old.license_fees.get(residency),
            ) {
                self.license_fees(res, who, n, o);
            }

            if let (Some(n), Some(o)) = (new.tag_costs.get(residency), old.tag_costs.get(residency)) {
                self.per_species("tag_costs", "tag", res, who, n, o);
            }
            if let (Some(n), Some(o)) = (
                new.point_costs.get(residency),
                old.point_costs.get(residency),
            ) {
                self.per_species("point_costs", "point", res, who, n, o);
            }
        }

        let baseline_items: BTreeMap<_, _> =
            old.fee_schedule.iter().map(|i| (i.key(), i)).collect();
        for item in &new.fee_schedule {
            // Already compared through the typed slot it filled.
            if item.slots.iter().any(|slot| self.compared.contains(slot)) {
                continue;
            }
            let Some(prev) = baseline_items.get(&item.key()) else {
                continue;
            };
            let mut field = format!(
                "fees.schedule.{}.{}",
                item.name.to_ascii_lowercase().replace(' ', "_"),
                item.residency.as_str()
            );
            if let Some(species) = &item.species_id {
                field.push('.');
                field.push_str(species);
            }
            self.fee(
                field,
                format!("{} ({})", item.name, item.residency.as_str()),
                prev.amount,
                item.amount,
                item.species_id.as_deref(),
            );
        }
    }

    fn license_fees(&mut self, res: &str, who: &str, new: &LicenseFees, old: &LicenseFees) {
        let slots = [
            ("license", "license fee", new.license, old.license),
            ("application", "application fee", new.application, old.application),
            ("point", "point fee", new.point, old.point),
        ];
        for (slot, name, n, o) in slots {
            if let (Some(n), Some(o)) = (n, o) {
                self.fee(
                    format!("fees.license_fees.{res}.{slot}"),
                    format!("{who} {name}"),
                    o,
                    n,
                    None,
                );
            }
        }
    }

    fn per_species(
        &mut self,
        section: &str,
        noun: &str,
        res: &str,
        who: &str,
        new: &BTreeMap<String, f64>,
        old: &BTreeMap<String, f64>,
    ) {
        for (species, &n) in new {
            if let Some(&o) = old.get(species) {
                self.fee(
                    format!("fees.{section}.{res}.{species}"),
                    format!("{who} {species} {noun}"),
                    o,
                    n,
                    Some(species.as_str()),
                );
            }
        }
    }

    // -- deadlines ----------------------------------------------------------

    fn deadlines(&mut self, snapshot: &StagingSnapshot, baseline: &LiveBaseline) {
        let max = self.tolerances.deadline_shift_max_days;
        let new = &snapshot.deadlines;
        let old = &baseline.deadlines;

        for (species, window) in &new.application_windows {
            let Some(prev) = old.application_windows.get(species) else {
                continue;
            };
            for (edge, n, o) in [
                ("open", window.open, prev.open),
                ("close", window.close, prev.close),
            ] {
                if let (Some(n), Some(o)) = (n, o) {
                    self.date_shift(
                        format!("deadlines.{species}.{edge}"),
                        format!("{species} application {edge}"),
                        species,
                        o,
                        n,
                        if (n - o).num_days().abs() > max {
                            Severity::Block
                        } else {
                            Severity::Pass
                        },
                    );
                }
            }
        }

        for (species, &n) in &new.draw_results {
            let Some(&o) = old.draw_results.get(species) else {
                continue;
            };
            self.date_shift(
                format!("deadlines.{species}.draw_results"),
                format!("{species} draw results"),
                species,
                o,
                n,
                if (n - o).num_days().abs() > max {
                    Severity::Warn
                } else {
                    Severity::Pass
                },
            );
        }
    }

    fn date_shift(
        &mut self,
        field: String,
        label: String,
        species: &str,
        old: NaiveDate,
        new: NaiveDate,
        severity: Severity,
    ) {
        if old == new {
            return;
        }
        let days = (new - old).num_days();
        let max = self.tolerances.deadline_shift_max_days;
        let tolerance_rule = match severity {
            Severity::Pass => format!("shift within {max} days"),
            Severity::Warn => format!("result date shift exceeds {max} days (informational)"),
            Severity::Block => format!("shift exceeds {max} days"),
        };
        self.push(Change {
            category: DiffCategory::Deadlines,
            field,
            label,
            severity,
            old_value: json!(old),
            new_value: json!(new),
            change_description: format!("{old} → {new} ({days:+} days)"),
            tolerance_rule,
            pct_change: None,
            days_delta: Some(days),
            species_id: Some(species.to_string()),
        });
    }

    // -- rules --------------------------------------------------------------

    fn rule_severity(&self) -> Severity {
        if self.tolerances.block_on_rule_mutation {
            Severity::Block
        } else {
            Severity::Warn
        }
    }

    fn rule(
        &mut self,
        field: &str,
        label: &str,
        old: Value,
        new: Value,
        description: String,
        species: Option<&str>,
    ) {
        let severity = self.rule_severity();
        self.push(Change {
            category: DiffCategory::Rules,
            field: field.to_string(),
            label: label.to_string(),
            severity,
            old_value: old,
            new_value: new,
            change_description: description,
            tolerance_rule: "draw-rule mutation requires review".to_string(),
            pct_change: None,
            days_delta: None,
            species_id: species.map(str::to_string),
        });
    }

    fn rules(&mut self, new: &DrawRules, old: &DrawRules) {
        if new.point_system != old.point_system {
            self.rule(
                "rules.point_system",
                "Point system",
                json!(old.point_system.as_str()),
                json!(new.point_system.as_str()),
                format!(
                    "point system changed from {} to {}",
                    old.point_system.as_str(),
                    new.point_system.as_str()
                ),
                None,
            );
        }
        if let (Some(n), Some(o)) = (new.preference_split_pct, old.preference_split_pct) {
            if amounts_differ(o, n) {
                self.rule(
                    "rules.preference_split_pct",
                    "Preference/random split",
                    json!(o),
                    json!(n),
                    format!("preference share changed from {o}% to {n}%"),
                    None,
                );
            }
        }
        if new.squared_bonus != old.squared_bonus {
            self.rule(
                "rules.squared_bonus",
                "Squared bonus points",
                json!(old.squared_bonus),
                json!(new.squared_bonus),
                format!(
                    "squared bonus points {}",
                    if new.squared_bonus { "enabled" } else { "disabled" }
                ),
                None,
            );
        }
        if !new.application_approach.is_empty()
            && !old.application_approach.is_empty()
            && new.application_approach != old.application_approach
        {
            self.rule(
                "rules.application_approach",
                "Application approach",
                json!(old.application_approach),
                json!(new.application_approach),
                format!(
                    "application approach changed from {} to {}",
                    old.application_approach, new.application_approach
                ),
                None,
            );
        }

        let (added, removed) = set_changes(&new.once_in_a_lifetime, &old.once_in_a_lifetime);
        for species in added {
            self.rule(
                &format!("rules.once_in_a_lifetime.{species}"),
                "Once-in-a-lifetime species",
                Value::Null,
                json!(species),
                format!("{species} added to the once-in-a-lifetime list"),
                Some(species.as_str()),
            );
        }
        for species in removed {
            self.rule(
                &format!("rules.once_in_a_lifetime.{species}"),
                "Once-in-a-lifetime species",
                json!(species),
                Value::Null,
                format!("{species} removed from the once-in-a-lifetime list"),
                Some(species.as_str()),
            );
        }
    }

    // -- species ------------------------------------------------------------

    fn species(&mut self, new: &[String], old: &[String]) {
        let t = self.tolerances;
        let (added, removed) = set_changes(new, old);
        for species in added {
            self.push(Change {
                category: DiffCategory::Species,
                field: format!("species.{species}"),
                label: format!("Species {species}"),
                severity: if t.warn_on_species_added {
                    Severity::Warn
                } else {
                    Severity::Pass
                },
                old_value: Value::Null,
                new_value: json!(species),
                change_description: format!("{species} newly available"),
                tolerance_rule: "new species require confirmation".to_string(),
                pct_change: None,
                days_delta: None,
                species_id: Some(species),
            });
        }
        for species in removed {
            self.push(Change {
                category: DiffCategory::Species,
                field: format!("species.{species}"),
                label: format!("Species {species}"),
                severity: if t.block_on_species_removal {
                    Severity::Block
                } else {
                    Severity::Warn
                },
                old_value: json!(species),
                new_value: Value::Null,
                change_description: format!("{species} no longer offered"),
                tolerance_rule: "species removal can orphan committed positions".to_string(),
                pct_change: None,
                days_delta: None,
                species_id: Some(species),
            });
        }
    }
}

/// `(added, removed)` between two species lists, case-insensitive, sorted.
fn set_changes(new: &[String], old: &[String]) -> (Vec<String>, Vec<String>) {
    let new: BTreeSet<String> = new.iter().map(|s| s.to_ascii_lowercase()).collect();
    let old: BTreeSet<String> = old.iter().map(|s| s.to_ascii_lowercase()).collect();
    (
        new.difference(&old).cloned().collect(),
        old.difference(&new).cloned().collect(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{
        ApplicationWindow, CaptureMethod, DeadlineSection, FeeLineItem, PointSystem,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot() -> StagingSnapshot {
        StagingSnapshot {
            id: "snap-b1".to_string(),
            state_id: "CO".to_string(),
            captured_at: now(),
            source_url: "https://cpw.state.co.us".to_string(),
            data_version: "CO-1".to_string(),
            capture_method: CaptureMethod::Scraper,
            fees: FeeSection::default(),
            deadlines: DeadlineSection::default(),
            quotas: None,
            rules: None,
            species: None,
            captured_by: "test".to_string(),
            notes: None,
            previous_snapshot_id: None,
        }
    }

    fn rules(oial: &[&str]) -> DrawRules {
        DrawRules {
            point_system: PointSystem::Preference,
            preference_split_pct: Some(80.0),
            squared_bonus: false,
            application_approach: "per_species".to_string(),
            once_in_a_lifetime: oial.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn license_change(old: f64, new: f64) -> AirlockVerdict {
        let mut snap = snapshot();
        snap.fees.license_fees.resident.license = Some(new);
        let mut base = LiveBaseline::new("CO");
        base.fees.license_fees.resident.license = Some(old);
        evaluate(&snap, &base, &AirlockTolerances::default(), now())
    }

    fn close_shift(new_close: NaiveDate) -> AirlockVerdict {
        let mut snap = snapshot();
        snap.deadlines.application_windows.insert(
            "elk".to_string(),
            ApplicationWindow {
                open: None,
                close: Some(new_close),
            },
        );
        let mut base = LiveBaseline::new("CO");
        base.deadlines.application_windows.insert(
            "elk".to_string(),
            ApplicationWindow {
                open: None,
                close: Some(date(2026, 4, 1)),
            },
        );
        evaluate(&snap, &base, &AirlockTolerances::default(), now())
    }

    // -- fees ---------------------------------------------------------------

    #[test]
    fn nine_percent_increase_blocks() {
        let v = license_change(100.0, 109.0);
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].severity, Severity::Block);
        assert_eq!(v.diffs[0].pct_change, Some(9.0));
        assert_eq!(v.overall_verdict, Severity::Block);
        assert!(!v.can_auto_promote);
    }

    #[test]
    fn seven_percent_increase_passes() {
        let v = license_change(100.0, 107.0);
        assert_eq!(v.diffs[0].severity, Severity::Pass);
        assert_eq!(v.overall_verdict, Severity::Pass);
        assert!(v.can_auto_promote);
        assert_eq!(v.pass_count, 1);
    }

    #[test]
    fn exactly_eight_percent_passes() {
        assert_eq!(license_change(100.0, 108.0).diffs[0].severity, Severity::Pass);
        assert_eq!(license_change(25.0, 27.0).diffs[0].severity, Severity::Pass);
    }

    #[test]
    fn two_percent_decrease_blocks() {
        let v = license_change(100.0, 98.0);
        assert_eq!(v.diffs[0].severity, Severity::Block);
        assert!(v.diffs[0].tolerance_rule.contains("decrease"));
    }

    #[test]
    fn half_percent_decrease_passes() {
        assert_eq!(license_change(100.0, 99.5).diffs[0].severity, Severity::Pass);
        assert_eq!(license_change(100.0, 99.0).diffs[0].severity, Severity::Pass);
    }

    #[test]
    fn change_from_zero_counts_as_full_increase() {
        assert_eq!(pct_change(0.0, 15.0), 100.0);
        assert_eq!(pct_change(0.0, 0.0), 0.0);
        assert_eq!(license_change(0.0, 15.0).diffs[0].severity, Severity::Block);
    }

    #[test]
    fn unchanged_fee_emits_nothing() {
        let v = license_change(41.0, 41.0);
        assert!(v.diffs.is_empty());
        assert_eq!(v.overall_verdict, Severity::Pass);
        assert!(v.can_auto_promote);
        assert!(v.summary.contains("no changes"));
    }

    #[test]
    fn fields_absent_from_baseline_are_not_diffed() {
        let mut snap = snapshot();
        snap.fees
            .tag_costs
            .nonresident
            .insert("moose".to_string(), 2_758.0);
        snap.fees.license_fees.resident.point = Some(100.0);
        let v = evaluate(
            &snap,
            &LiveBaseline::new("CO"),
            &AirlockTolerances::default(),
            now(),
        );
        assert!(v.diffs.is_empty());
    }

    #[test]
    fn per_species_tag_and_point_costs() {
        let mut snap = snapshot();
        snap.fees
            .tag_costs
            .nonresident
            .insert("elk".to_string(), 800.0);
        snap.fees.point_costs.resident.insert("moose".to_string(), 10.0);
        let mut base = LiveBaseline::new("CO");
        base.fees.tag_costs.nonresident.insert("elk".to_string(), 735.0);
        base.fees.point_costs.resident.insert("moose".to_string(), 10.0);

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 1);
        let d = &v.diffs[0];
        assert_eq!(d.field, "fees.tag_costs.nonresident.elk");
        assert_eq!(d.species_id.as_deref(), Some("elk"));
        assert_eq!(d.severity, Severity::Block);
        assert_eq!(d.old_value, json!(735.0));
        assert_eq!(d.new_value, json!(800.0));
        assert_eq!(d.id, "snap-b1:fees.tag_costs.nonresident.elk");
    }

    #[test]
    fn fee_schedule_items_match_by_name() {
        let item = |name: &str, amount: f64| FeeLineItem {
            name: name.to_string(),
            amount,
            residency: Residency::Both,
            species_id: None,
            frequency: None,
            slots: Vec::new(),
        };
        let mut snap = snapshot();
        snap.fees.fee_schedule = vec![
            item("Habitat Stamp", 12.5),
            item("habitat stamp", 13.0),
            item("New Card", 3.0),
        ];
        let mut base = LiveBaseline::new("CO");
        base.fees.fee_schedule = vec![item("Habitat Stamp", 12.0)];

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        // duplicate names collapse onto one field; the first row is used
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].field, "fees.schedule.habitat_stamp.both");
        assert_eq!(v.diffs[0].pct_change, Some(4.1667));
        assert_eq!(v.diffs[0].severity, Severity::Pass);
    }

    #[test]
    fn custom_fee_tolerance() {
        let mut snap = snapshot();
        snap.fees.license_fees.nonresident.application = Some(112.0);
        let mut base = LiveBaseline::new("CO");
        base.fees.license_fees.nonresident.application = Some(100.0);
        let relaxed = AirlockTolerances {
            fee_increase_max_pct: 15.0,
            ..AirlockTolerances::default()
        };
        let v = evaluate(&snap, &base, &relaxed, now());
        assert_eq!(v.overall_verdict, Severity::Pass);
    }

    // -- deadlines ----------------------------------------------------------

    #[test]
    fn five_day_close_shift_blocks() {
        let v = close_shift(date(2026, 4, 6));
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].days_delta, Some(5));
        assert_eq!(v.diffs[0].severity, Severity::Block);
        assert_eq!(v.diffs[0].field, "deadlines.elk.close");
    }

    #[test]
    fn two_day_close_shift_passes() {
        let v = close_shift(date(2026, 4, 3));
        assert_eq!(v.diffs[0].days_delta, Some(2));
        assert_eq!(v.diffs[0].severity, Severity::Pass);
    }

    #[test]
    fn backwards_shift_uses_absolute_delta() {
        let v = close_shift(date(2026, 3, 27));
        assert_eq!(v.diffs[0].days_delta, Some(-5));
        assert_eq!(v.diffs[0].severity, Severity::Block);
        assert_eq!(close_shift(date(2026, 3, 29)).overall_verdict, Severity::Pass);
    }

    #[test]
    fn draw_result_shift_caps_at_warn() {
        let mut snap = snapshot();
        snap.deadlines
            .draw_results
            .insert("elk".to_string(), date(2026, 6, 20));
        let mut base = LiveBaseline::new("CO");
        base.deadlines
            .draw_results
            .insert("elk".to_string(), date(2026, 5, 29));

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs[0].severity, Severity::Warn);
        assert_eq!(v.overall_verdict, Severity::Warn);
        assert!(!v.can_auto_promote);
        assert!(v.required_action.is_some());
    }

    // -- rules --------------------------------------------------------------

    #[test]
    fn once_in_a_lifetime_addition_blocks_once() {
        let mut snap = snapshot();
        snap.rules = Some(rules(&["moose", "wolverine"]));
        let mut base = LiveBaseline::new("CO");
        base.rules = Some(rules(&["moose"]));

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 1);
        let d = &v.diffs[0];
        assert_eq!(d.severity, Severity::Block);
        assert_eq!(d.new_value, json!("wolverine"));
        assert_eq!(d.old_value, Value::Null);
        assert_eq!(d.category, DiffCategory::Rules);
    }

    #[test]
    fn once_in_a_lifetime_removal() {
        let mut snap = snapshot();
        snap.rules = Some(rules(&[]));
        let mut base = LiveBaseline::new("CO");
        base.rules = Some(rules(&["bighorn_sheep"]));

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].old_value, json!("bighorn_sheep"));
        assert_eq!(v.diffs[0].new_value, Value::Null);
    }

    #[test]
    fn structural_rule_changes_each_produce_a_diff() {
        let mut changed = rules(&["moose"]);
        changed.point_system = PointSystem::Bonus;
        changed.preference_split_pct = Some(75.0);
        changed.squared_bonus = true;
        changed.application_approach = "choice_based".to_string();

        let mut snap = snapshot();
        snap.rules = Some(changed);
        let mut base = LiveBaseline::new("CO");
        base.rules = Some(rules(&["moose"]));

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.block_count, 4);
        let fields: Vec<&str> = v.diffs.iter().map(|d| d.field.as_str()).collect();
        assert!(fields.contains(&"rules.point_system"));
        assert!(fields.contains(&"rules.preference_split_pct"));
        assert!(fields.contains(&"rules.squared_bonus"));
        assert!(fields.contains(&"rules.application_approach"));
    }

    #[test]
    fn relaxed_rule_mutation_only_warns() {
        let mut changed = rules(&[]);
        changed.squared_bonus = true;
        let mut snap = snapshot();
        snap.rules = Some(changed);
        let mut base = LiveBaseline::new("CO");
        base.rules = Some(rules(&[]));
        let relaxed = AirlockTolerances {
            block_on_rule_mutation: false,
            ..AirlockTolerances::default()
        };
        let v = evaluate(&snap, &base, &relaxed, now());
        assert_eq!(v.overall_verdict, Severity::Warn);
    }

    // -- species ------------------------------------------------------------

    #[test]
    fn species_added_warns_and_removed_blocks() {
        let mut snap = snapshot();
        snap.species = Some(vec!["elk".to_string(), "mountain_goat".to_string()]);
        let mut base = LiveBaseline::new("CO");
        base.available_species = vec!["elk".to_string(), "moose".to_string()];

        let v = evaluate(&snap, &base, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 2);
        let added = v.diffs.iter().find(|d| d.field == "species.mountain_goat").unwrap();
        assert_eq!(added.severity, Severity::Warn);
        let removed = v.diffs.iter().find(|d| d.field == "species.moose").unwrap();
        assert_eq!(removed.severity, Severity::Block);
        assert_eq!(v.overall_verdict, Severity::Block);
        assert_eq!(v.warn_count, 1);
        assert_eq!(v.block_count, 1);
    }

    #[test]
    fn relaxed_species_policies() {
        let mut snap = snapshot();
        snap.species = Some(vec!["elk".to_string(), "mountain_goat".to_string()]);
        let mut base = LiveBaseline::new("CO");
        base.available_species = vec!["elk".to_string(), "moose".to_string()];
        let relaxed = AirlockTolerances {
            warn_on_species_added: false,
            block_on_species_removal: false,
            ..AirlockTolerances::default()
        };
        let v = evaluate(&snap, &base, &relaxed, now());
        assert_eq!(v.overall_verdict, Severity::Warn);
        assert_eq!(v.pass_count, 1);
    }

    #[test]
    fn missing_species_list_is_not_a_removal() {
        let mut base = LiveBaseline::new("CO");
        base.available_species = vec!["elk".to_string()];
        let v = evaluate(&snapshot(), &base, &AirlockTolerances::default(), now());
        assert!(v.diffs.is_empty());
    }

    // -- aggregate ----------------------------------------------------------

    #[test]
    fn verdict_invariants_hold_across_mixes() {
        let t = AirlockTolerances::default();
        for (fee_new, close_new, result_new) in [
            (100.0, date(2026, 4, 1), date(2026, 5, 29)),
            (109.0, date(2026, 4, 1), date(2026, 5, 29)),
            (100.0, date(2026, 4, 2), date(2026, 6, 30)),
            (109.0, date(2026, 4, 9), date(2026, 6, 30)),
            (103.0, date(2026, 4, 3), date(2026, 5, 30)),
        ] {
            let mut snap = snapshot();
            snap.fees.license_fees.resident.license = Some(fee_new);
            snap.deadlines.application_windows.insert(
                "elk".to_string(),
                ApplicationWindow {
                    open: None,
                    close: Some(close_new),
                },
            );
            snap.deadlines
                .draw_results
                .insert("elk".to_string(), result_new);

            let mut base = LiveBaseline::new("CO");
            base.fees.license_fees.resident.license = Some(100.0);
            base.deadlines.application_windows.insert(
                "elk".to_string(),
                ApplicationWindow {
                    open: None,
                    close: Some(date(2026, 4, 1)),
                },
            );
            base.deadlines
                .draw_results
                .insert("elk".to_string(), date(2026, 5, 29));

            let v = evaluate(&snap, &base, &t, now());
            let any_block = v.diffs.iter().any(|d| d.severity == Severity::Block);
            let all_pass = v.diffs.iter().all(|d| d.severity == Severity::Pass);
            assert_eq!(v.overall_verdict == Severity::Block, any_block);
            assert_eq!(v.overall_verdict == Severity::Pass, all_pass);
            assert_eq!(v.can_auto_promote, v.overall_verdict == Severity::Pass);
            assert_eq!(v.block_count + v.warn_count + v.pass_count, v.diffs.len());
        }
    }

    #[test]
    fn blocked_verdict_names_count_and_source() {
        let v = license_change(100.0, 150.0);
        let action = v.required_action.unwrap();
        assert!(action.contains("1 blocked item"));
        assert!(action.contains("official CO source"));
    }

    #[test]
    fn quota_section_is_ignored() {
        let mut snap = snapshot();
        snap.quotas = Some(crate::snapshot::QuotaSection::default());
        let v = evaluate(&snap, &LiveBaseline::new("CO"), &AirlockTolerances::default(), now());
        assert!(v.diffs.iter().all(|d| d.category != DiffCategory::Quotas));
    }

    #[test]
    fn diff_snapshots_uses_older_as_baseline() {
        let mut older = snapshot();
        older.fees.license_fees.resident.license = Some(100.0);
        older.species = Some(vec!["elk".to_string()]);
        let mut newer = snapshot();
        newer.id = "snap-b2".to_string();
        newer.fees.license_fees.resident.license = Some(109.0);
        newer.species = Some(vec!["elk".to_string()]);

        let forward = diff_snapshots(&older, &newer, &AirlockTolerances::default(), now());
        assert_eq!(forward.snapshot_id, "snap-b2");
        assert_eq!(forward.overall_verdict, Severity::Block);

        // Baseline conversion and direct evaluation agree.
        let direct = evaluate(
            &newer,
            &LiveBaseline::from_snapshot(&older),
            &AirlockTolerances::default(),
            now(),
        );
        assert_eq!(forward, direct);
    }

    fn scraped(batch_id: &str, rows: &[crate::ingest::RawRow]) -> StagingSnapshot {
        crate::snapshot::build_snapshot(
            crate::snapshot::SnapshotMeta {
                batch_id: batch_id.to_string(),
                state_id: "CO".to_string(),
                source_url: "https://cpw.state.co.us".to_string(),
                captured_at: now(),
                capture_method: CaptureMethod::Scraper,
                captured_by: "scraper".to_string(),
                notes: None,
                previous_snapshot_id: None,
            },
            rows,
        )
    }

    fn fee_row(name: &str, amount: f64, residency: &str, species: Option<&str>) -> crate::ingest::RawRow {
        crate::ingest::RawRow::Fee(crate::ingest::RawFeeRow {
            fee_name: name.to_string(),
            amount,
            residency: residency.to_string(),
            species_id: species.map(str::to_string),
            frequency: None,
        })
    }

    #[test]
    fn scraped_fee_change_between_snapshots_is_one_diff() {
        let older = scraped(
            "b1",
            &[
                fee_row("Qualifying License", 100.0, "nonresident", None),
                fee_row("Elk License", 735.0, "nonresident", Some("elk")),
                fee_row("Park Pass", 10.0, "both", None),
            ],
        );
        let newer = scraped(
            "b2",
            &[
                fee_row("Qualifying License", 150.0, "nonresident", None),
                fee_row("Elk License", 800.0, "nonresident", Some("elk")),
                fee_row("Park Pass", 11.0, "both", None),
            ],
        );

        let v = diff_snapshots(&older, &newer, &AirlockTolerances::default(), now());
        let fields: Vec<&str> = v.diffs.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "fees.license_fees.nonresident.license",
                "fees.tag_costs.nonresident.elk",
                "fees.schedule.park_pass.both",
            ]
        );
        assert_eq!(v.block_count, 3);
        assert!(v
            .required_action
            .as_deref()
            .unwrap()
            .starts_with("Review 3 blocked item(s)"));
    }

    #[test]
    fn promoted_fees_in_baseline_are_not_double_counted() {
        let promoted = scraped(
            "b1",
            &[fee_row("Qualifying License", 100.0, "nonresident", None)],
        );
        let mut production = crate::baseline::ProductionBaseline::new("CO", now());
        production.fees = promoted.fees.clone();
        let baseline = LiveBaseline::new("CO").with_production(Some(&production));

        let newer = scraped(
            "b2",
            &[fee_row("Qualifying License", 109.0, "nonresident", None)],
        );
        let v = evaluate(&newer, &baseline, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].field, "fees.license_fees.nonresident.license");
        assert_eq!(v.block_count, 1);
    }

    #[test]
    fn schedule_line_is_diffed_when_its_slot_has_no_baseline() {
        // Reference data that lists the fee only in the schedule.
        let mut baseline = LiveBaseline::new("CO");
        baseline.fees.fee_schedule = vec![FeeLineItem {
            name: "Qualifying License".to_string(),
            amount: 100.0,
            residency: Residency::Nonresident,
            species_id: None,
            frequency: None,
            slots: Vec::new(),
        }];
        let newer = scraped(
            "b2",
            &[fee_row("Qualifying License", 109.0, "nonresident", None)],
        );

        let v = evaluate(&newer, &baseline, &AirlockTolerances::default(), now());
        assert_eq!(v.diffs.len(), 1);
        assert_eq!(v.diffs[0].field, "fees.schedule.qualifying_license.nonresident");
    }
}
