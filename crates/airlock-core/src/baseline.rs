//! The live baseline a snapshot is evaluated against.
//!
//! A baseline is assembled fresh for every evaluation from the state's
//! reference file (`.airlock/reference/<STATE>.yaml`) overlaid with any fee
//! values already promoted to production. It is passed into the evaluator
//! by reference; nothing here is process-global.

use crate::error::{AirlockError, Result};
use crate::snapshot::{DeadlineSection, DrawRules, FeeSection, StagingSnapshot};
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// LiveBaseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveBaseline {
    pub state_id: String,
    #[serde(default)]
    pub fees: FeeSection,
    #[serde(default)]
    pub deadlines: DeadlineSection,
    /// Includes the once-in-a-lifetime species list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<DrawRules>,
    #[serde(default)]
    pub available_species: Vec<String>,
}

impl LiveBaseline {
    pub fn new(state_id: impl Into<String>) -> Self {
        Self {
            state_id: state_id.into(),
            ..Self::default()
        }
    }

    /// Overlay promoted production fees onto this reference baseline.
    pub fn with_production(mut self, production: Option<&ProductionBaseline>) -> Self {
        if let Some(prod) = production {
            self.fees.overlay(&prod.fees);
        }
        self
    }

    /// Treat an older snapshot as the baseline for a newer one.
    ///
    /// Used for historical snapshot-to-snapshot review. Any evaluator rule
    /// must behave the same whether its "old" side came from a reference
    /// baseline or from this conversion.
    pub fn from_snapshot(snapshot: &StagingSnapshot) -> Self {
        Self {
            state_id: snapshot.state_id.clone(),
            fees: snapshot.fees.clone(),
            deadlines: snapshot.deadlines.clone(),
            rules: snapshot.rules.clone(),
            available_species: snapshot.species.clone().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProductionBaseline
// ---------------------------------------------------------------------------

/// Fee values promoted into production for one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionBaseline {
    pub state_id: String,
    pub fees: FeeSection,
    /// Promoted batches in the order their payloads were overlaid: oldest
    /// scrape first.
    pub promoted_batches: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// The approved fee payload of one promoted batch.
#[derive(Debug, Clone)]
pub struct PromotedFees {
    pub batch_id: String,
    /// Latest `scraped_at` among the batch's rows.
    pub scraped_at: DateTime<Utc>,
    /// When the batch entered the queue.
    pub queued_at: DateTime<Utc>,
    pub fees: FeeSection,
}

impl ProductionBaseline {
    pub fn new(state_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state_id: state_id.into(),
            fees: FeeSection::default(),
            promoted_batches: Vec::new(),
            updated_at: now,
        }
    }

    /// Derive production from every promoted batch of the state.
    ///
    /// Payloads are overlaid oldest scrape first, so each slot ends up with
    /// the value from the newest scrape that reported it no matter in which
    /// order the batches were promoted. `updated_at` keeps the value from
    /// `previous` when nothing changed.
    pub fn rebuild(
        state_id: &str,
        mut promoted: Vec<PromotedFees>,
        previous: Option<&ProductionBaseline>,
        now: DateTime<Utc>,
    ) -> Self {
        promoted.sort_by(|a, b| {
            (a.scraped_at, a.queued_at, &a.batch_id).cmp(&(b.scraped_at, b.queued_at, &b.batch_id))
        });

        let mut next = Self::new(state_id, now);
        for batch in &promoted {
            next.fees.overlay(&batch.fees);
            next.promoted_batches.push(batch.batch_id.clone());
        }

        if let Some(prev) = previous {
            if prev.fees == next.fees && prev.promoted_batches == next.promoted_batches {
                next.updated_at = prev.updated_at;
            }
        }
        next
    }
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// Load the reference baseline for `state_id`.
///
/// A state without a reference file is unknown: evaluation cannot proceed
/// and the batch stays in staging.
pub fn load_reference(root: &Path, state_id: &str) -> Result<LiveBaseline> {
    paths::validate_state_id(state_id)?;
    let path = paths::reference_path(root, state_id);
    if !path.exists() {
        return Err(AirlockError::UnknownState(state_id.to_string()));
    }
    let data = std::fs::read_to_string(&path)?;
    let mut baseline: LiveBaseline = serde_yaml::from_str(&data)?;
    if baseline.state_id.is_empty() {
        baseline.state_id = state_id.to_string();
    } else if baseline.state_id != state_id {
        return Err(AirlockError::InvalidValue {
            kind: "reference state id",
            value: format!("{} in {}", baseline.state_id, path.display()),
        });
    }
    Ok(baseline)
}

pub fn save_reference(root: &Path, baseline: &LiveBaseline) -> Result<()> {
    paths::validate_state_id(&baseline.state_id)?;
    let path = paths::reference_path(root, &baseline.state_id);
    io::write_yaml(&path, baseline)
}

/// State ids with a reference file, sorted.
pub fn reference_states(root: &Path) -> Result<Vec<String>> {
    let dir = paths::reference_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut states = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if paths::validate_state_id(stem).is_ok() {
                states.push(stem.to_string());
            }
        }
    }
    states.sort();
    Ok(states)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
