//! Records persisted by [`AirlockDb`](super::AirlockDb).

use crate::airlock::AirlockVerdict;
use crate::ingest::RawRow;
use crate::types::{QueueStatus, RowStatus, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StagingRow
// ---------------------------------------------------------------------------

/// One raw scraped row awaiting (or past) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRow {
    /// Position of the row within its batch, zero-padded so keys sort in
    /// ingestion order.
    pub id: String,
    pub state_id: String,
    pub batch_id: String,
    pub status: RowStatus,
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
    pub row: RawRow,
}

impl StagingRow {
    pub fn row_id(index: usize) -> String {
        format!("{index:06}")
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.batch_id, self.id)
    }
}

// ---------------------------------------------------------------------------
// QueueEntry
// ---------------------------------------------------------------------------

/// The single queue record of an evaluated batch.
///
/// Keyed by `batch_id`; its existence is what marks a batch as evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub batch_id: String,
    pub state_id: String,
    pub status: QueueStatus,
    pub snapshot_id: String,
    pub verdict: AirlockVerdict,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl QueueEntry {
    /// Initial record for a fresh verdict: auto-approved when the verdict
    /// allows it, quarantined otherwise.
    pub fn from_verdict(batch_id: &str, verdict: AirlockVerdict, now: DateTime<Utc>) -> Self {
        let status = if verdict.can_auto_promote {
            QueueStatus::AutoApproved
        } else {
            QueueStatus::Quarantined
        };
        Self {
            batch_id: batch_id.to_string(),
            state_id: verdict.state_id.clone(),
            status,
            snapshot_id: verdict.snapshot_id.clone(),
            verdict,
            created_at: now,
            updated_at: now,
            resolved_by: None,
            resolution_note: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Evaluated,
    AutoPromoted,
    Promoted,
    Rejected,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Evaluated => "evaluated",
            AuditAction::AutoPromoted => "auto_promoted",
            AuditAction::Promoted => "promoted",
            AuditAction::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub batch_id: String,
    pub state_id: String,
    pub action: AuditAction,
    /// `"airlock"` for automatic steps, otherwise the reviewer.
    pub actor: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Severity>,
    pub detail: String,
}

impl AuditRecord {
    pub const SYSTEM_ACTOR: &'static str = "airlock";

    pub fn new(
        batch_id: impl Into<String>,
        state_id: impl Into<String>,
        action: AuditAction,
        actor: impl Into<String>,
        at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id: batch_id.into(),
            state_id: state_id.into(),
            action,
            actor: actor.into(),
            at,
            verdict: None,
            detail: detail.into(),
        }
    }

    pub fn with_verdict(mut self, verdict: Severity) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

// ---------------------------------------------------------------------------
// ActivityEvent
// ---------------------------------------------------------------------------

/// Kinds of pipeline activity the weekly digest aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A batch passed the airlock and was auto-promoted.
    Verified,
    Quarantined,
    /// A quarantined batch was approved by a reviewer.
    Promoted,
    Rejected,
    FrequencyChanged,
    CrawlFailed,
    BackoffEntered,
    Paused,
    /// A crawler succeeded after one or more failures.
    Recovered,
    /// A clean batch landed while an older quarantine for the same state was
    /// still awaiting review.
    SelfHealed,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Verified => "verified",
            ActivityKind::Quarantined => "quarantined",
            ActivityKind::Promoted => "promoted",
            ActivityKind::Rejected => "rejected",
            ActivityKind::FrequencyChanged => "frequency_changed",
            ActivityKind::CrawlFailed => "crawl_failed",
            ActivityKind::BackoffEntered => "backoff_entered",
            ActivityKind::Paused => "paused",
            ActivityKind::Recovered => "recovered",
            ActivityKind::SelfHealed => "self_healed",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub state_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub at: DateTime<Utc>,
    pub detail: String,
}

impl ActivityEvent {
    pub fn new(
        kind: ActivityKind,
        state_id: impl Into<String>,
        at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state_id: state_id.into(),
            batch_id: None,
            at,
            detail: detail.into(),
        }
    }

    pub fn for_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}
