//! Weekly pipeline health digest.
//!
//! `compile` is pure: it aggregates a week of [`ActivityEvent`]s together
//! with the current crawler backoff states and the quarantines still
//! awaiting review. Delivery of the digest is left to the caller.

use crate::backoff::BackoffState;
use crate::store::{ActivityEvent, ActivityKind, QueueEntry};
use crate::types::QueueStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const PAUSED_PENALTY: i64 = 15;
const BACKOFF_PENALTY: i64 = 5;
const AWAITING_PENALTY: i64 = 10;
const SELF_HEAL_PENALTY: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuarantine {
    pub batch_id: String,
    pub state_id: String,
    pub block_count: usize,
    pub warn_count: usize,
    pub quarantined_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestNote {
    pub state_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub at: DateTime<Utc>,
    pub detail: String,
}

impl From<&ActivityEvent> for DigestNote {
    fn from(event: &ActivityEvent) -> Self {
        Self {
            state_id: event.state_id.clone(),
            batch_id: event.batch_id.clone(),
            at: event.at,
            detail: event.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyDigest {
    pub week_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// 0 to 100.
    pub health_score: u8,
    pub summary: String,

    pub verifications: usize,
    pub verified_states: Vec<String>,
    pub quarantined_this_week: usize,
    pub awaiting_approval: Vec<PendingQuarantine>,
    pub manually_promoted: usize,
    pub rejected: usize,

    pub frequency_changes: Vec<DigestNote>,
    pub crawl_failures: usize,
    pub backing_off: Vec<String>,
    pub paused: Vec<String>,
    pub recovered: Vec<String>,
    pub self_healed: Vec<DigestNote>,
}

/// Health starts at 100 and loses points per paused crawler, per crawler in
/// backoff, per quarantine awaiting approval and per self-healed block.
pub fn health_score(paused: usize, backing_off: usize, awaiting: usize, self_healed: usize) -> u8 {
    let penalty = PAUSED_PENALTY * paused as i64
        + BACKOFF_PENALTY * backing_off as i64
        + AWAITING_PENALTY * awaiting as i64
        + SELF_HEAL_PENALTY * self_healed as i64;
    (100 - penalty).clamp(0, 100) as u8
}

pub fn pending_quarantine(entry: &QueueEntry) -> PendingQuarantine {
    PendingQuarantine {
        batch_id: entry.batch_id.clone(),
        state_id: entry.state_id.clone(),
        block_count: entry.verdict.block_count,
        warn_count: entry.verdict.warn_count,
        quarantined_at: entry.created_at,
        summary: entry.verdict.summary.clone(),
    }
}

/// Compile the digest for the week starting at `week_start`.
///
/// Events outside `[week_start, generated_at]` are ignored. `queue` may be
/// the whole queue; only entries still quarantined count as awaiting.
pub fn compile(
    events: &[ActivityEvent],
    backoff: &[BackoffState],
    queue: &[QueueEntry],
    week_start: DateTime<Utc>,
    generated_at: DateTime<Utc>,
) -> WeeklyDigest {
    let week: Vec<&ActivityEvent> = events
        .iter()
        .filter(|e| e.at >= week_start && e.at <= generated_at)
        .collect();
    let count = |kind: ActivityKind| week.iter().filter(|e| e.kind == kind).count();
    let notes = |kind: ActivityKind| -> Vec<DigestNote> {
        week.iter()
            .filter(|e| e.kind == kind)
            .map(|e| DigestNote::from(*e))
            .collect()
    };
    let states = |kind: ActivityKind| -> Vec<String> {
        week.iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.state_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let mut paused: Vec<String> = backoff
        .iter()
        .filter(|b| b.paused)
        .map(|b| b.state_id.clone())
        .collect();
    paused.sort();
    let mut backing_off: Vec<String> = backoff
        .iter()
        .filter(|b| b.in_backoff())
        .map(|b| b.state_id.clone())
        .collect();
    backing_off.sort();

    let mut awaiting_approval: Vec<PendingQuarantine> = queue
        .iter()
        .filter(|q| q.status == QueueStatus::Quarantined)
        .map(pending_quarantine)
        .collect();
    awaiting_approval.sort_by(|a, b| {
        a.quarantined_at
            .cmp(&b.quarantined_at)
            .then_with(|| a.batch_id.cmp(&b.batch_id))
    });

    let self_healed = notes(ActivityKind::SelfHealed);
    let health_score = health_score(
        paused.len(),
        backing_off.len(),
        awaiting_approval.len(),
        self_healed.len(),
    );

    let mut digest = WeeklyDigest {
        week_start,
        generated_at,
        health_score,
        summary: String::new(),
        verifications: count(ActivityKind::Verified),
        verified_states: states(ActivityKind::Verified),
        quarantined_this_week: count(ActivityKind::Quarantined),
        awaiting_approval,
        manually_promoted: count(ActivityKind::Promoted),
        rejected: count(ActivityKind::Rejected),
        frequency_changes: notes(ActivityKind::FrequencyChanged),
        crawl_failures: count(ActivityKind::CrawlFailed),
        backing_off,
        paused,
        recovered: states(ActivityKind::Recovered),
        self_healed,
    };
    digest.summary = summary_line(&digest);
    digest
}

fn summary_line(d: &WeeklyDigest) -> String {
    let mut parts = vec![format!(
        "{} verification(s) across {} state(s)",
        d.verifications,
        d.verified_states.len()
    )];
    if d.quarantined_this_week > 0 || !d.awaiting_approval.is_empty() {
        parts.push(format!(
            "{} quarantined, {} awaiting approval",
            d.quarantined_this_week,
            d.awaiting_approval.len()
        ));
    }
    if !d.frequency_changes.is_empty() {
        parts.push(format!("{} frequency change(s)", d.frequency_changes.len()));
    }
    if d.crawl_failures > 0 {
        parts.push(format!("{} crawl failure(s)", d.crawl_failures));
    }
    if !d.paused.is_empty() {
        parts.push(format!("PAUSED: {}", d.paused.join(", ")));
    }
    if !d.self_healed.is_empty() {
        parts.push(format!("{} self-healed block(s)", d.self_healed.len()));
    }
    format!("Health {}/100: {}", d.health_score, parts.join("; "))
}
