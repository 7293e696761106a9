//! Verdict and promotion orchestration.
//!
//! Per-batch state machine:
//!
//! ```text
//! staging ──evaluate──► auto_approved ──► production
//!                  └──► quarantined ──promote──► approved ──► production
//!                                   └──reject───► rejected
//! ```
//!
//! A batch with staged rows and no queue record is still in staging; the
//! reconciliation sweep picks those up. Evaluation commits through
//! [`AirlockDb::commit_evaluation`], whose insert-if-absent on the queue
//! table is what makes concurrent triggers for one batch safe.

use crate::airlock::{diff_snapshots, evaluate, AirlockVerdict};
use crate::backoff::{BackoffRecord, BackoffState};
use crate::baseline::{load_reference, LiveBaseline, ProductionBaseline};
use crate::config::Config;
use crate::digest::{self, WeeklyDigest};
use crate::error::{AirlockError, Result};
use crate::ingest::RawRow;
use crate::schedule::{build_schedule, frequency_changes, CrawlSchedule, FrequencyChange, StateDeadlineContext};
use crate::snapshot::{build_snapshot, CaptureMethod, SnapshotMeta, StagingSnapshot};
use crate::store::{
    ActivityEvent, ActivityKind, AirlockDb, AuditAction, AuditRecord, CommitOutcome,
    EvaluationCommit, QueueEntry, Resolution, StagingRow,
};
use crate::types::{QueueStatus, RowStatus};
use crate::{io, paths};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Evaluated {
        entry: QueueEntry,
        #[serde(skip_serializing_if = "Option::is_none")]
        production: Option<ProductionBaseline>,
    },
    /// The batch already had a queue record; nothing was written.
    AlreadyEvaluated { entry: QueueEntry },
}

impl EvaluationOutcome {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            EvaluationOutcome::Evaluated { entry, .. } => entry,
            EvaluationOutcome::AlreadyEvaluated { entry } => entry,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EvaluationOutcome::Evaluated { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub evaluated: Vec<String>,
    /// Evaluated concurrently by another trigger between scan and commit.
    pub already_evaluated: Vec<String>,
    /// `(batch_id, error)`; these batches stay in staging.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRefresh {
    pub schedule: CrawlSchedule,
    pub changes: Vec<FrequencyChange>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    root: PathBuf,
    config: Config,
    db: AirlockDb,
}

impl Pipeline {
    /// Create `.airlock/` with a default config. Returns false when the
    /// config already existed.
    pub fn init(root: &Path) -> Result<bool> {
        io::ensure_dirs([paths::reference_dir(root), root.join(paths::DIGESTS_DIR)])?;
        let created = io::seed_yaml(&paths::config_path(root), &Config::new())?;
        AirlockDb::open(&paths::db_path(root))?;
        Ok(created)
    }

    /// Open the pipeline rooted at `root`, loading config once.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: &Path, config: Config) -> Result<Self> {
        if !paths::airlock_dir(root).exists() {
            return Err(AirlockError::NotInitialized);
        }
        let db = AirlockDb::open(&paths::db_path(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            db,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Stage one scraped batch. Every row is validated first so a malformed
    /// row cannot strand the batch in staging.
    pub fn stage_rows(
        &self,
        state_id: &str,
        batch_id: &str,
        source_url: &str,
        rows: Vec<RawRow>,
        scraped_at: DateTime<Utc>,
    ) -> Result<usize> {
        paths::validate_state_id(state_id)?;
        if batch_id.trim().is_empty() || batch_id.contains('/') {
            return Err(AirlockError::InvalidValue {
                kind: "batch id",
                value: batch_id.to_string(),
            });
        }
        if rows.is_empty() {
            return Err(AirlockError::InvalidValue {
                kind: "batch",
                value: format!("{batch_id} has no rows"),
            });
        }
        for row in &rows {
            row.validate()?;
        }

        let staged: Vec<StagingRow> = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| StagingRow {
                id: StagingRow::row_id(i),
                state_id: state_id.to_string(),
                batch_id: batch_id.to_string(),
                status: RowStatus::Staging,
                source_url: source_url.to_string(),
                scraped_at,
                row,
            })
            .collect();
        self.db.stage_rows(&staged)?;
        info!(state_id, batch_id, rows = staged.len(), "batch staged");
        Ok(staged.len())
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Reference baseline for `state_id` overlaid with promoted production
    /// fees.
    pub fn live_baseline(&self, state_id: &str) -> Result<LiveBaseline> {
        let reference = load_reference(&self.root, state_id)?;
        let production = self.db.production(state_id)?;
        Ok(reference.with_production(production.as_ref()))
    }

    fn build_batch_snapshot(&self, batch_id: &str, rows: &[StagingRow]) -> Result<StagingSnapshot> {
        let first = rows
            .first()
            .ok_or_else(|| AirlockError::BatchNotFound(batch_id.to_string()))?;
        let captured_at = rows
            .iter()
            .map(|r| r.scraped_at)
            .max()
            .unwrap_or(first.scraped_at);
        let previous_snapshot_id = self
            .db
            .list_queue()?
            .into_iter()
            .find(|q| q.state_id == first.state_id && q.batch_id != batch_id)
            .map(|q| q.snapshot_id);
        let raw: Vec<RawRow> = rows.iter().map(|r| r.row.clone()).collect();
        Ok(build_snapshot(
            SnapshotMeta {
                batch_id: batch_id.to_string(),
                state_id: first.state_id.clone(),
                source_url: first.source_url.clone(),
                captured_at,
                capture_method: CaptureMethod::Scraper,
                captured_by: AuditRecord::SYSTEM_ACTOR.to_string(),
                notes: None,
                previous_snapshot_id,
            },
            &raw,
        ))
    }

    /// Evaluate one staged batch against its state's live baseline.
    ///
    /// At most one evaluation per batch id is ever recorded: a batch that
    /// already has a queue record returns it unchanged. An unknown state is
    /// an error and leaves the batch in staging.
    pub fn evaluate_batch(
        &self,
        state_id: &str,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome> {
        if let Some(entry) = self.db.queue_entry(batch_id)? {
            debug!(state_id, batch_id, status = %entry.status, "batch already evaluated");
            return Ok(EvaluationOutcome::AlreadyEvaluated { entry });
        }

        let rows = self.db.batch_rows(batch_id)?;
        let Some(first) = rows.first() else {
            return Err(AirlockError::BatchNotFound(batch_id.to_string()));
        };
        if first.state_id != state_id {
            return Err(AirlockError::StateMismatch {
                batch_id: batch_id.to_string(),
                requested: state_id.to_string(),
                actual: first.state_id.clone(),
            });
        }

        let baseline = self.live_baseline(state_id)?;
        let snapshot = self.build_batch_snapshot(batch_id, &rows)?;
        let verdict = evaluate(&snapshot, &baseline, &self.config.tolerances, now);
        let entry = QueueEntry::from_verdict(batch_id, verdict, now);

        let (audit, activity) = self.evaluation_records(&entry, now)?;
        let outcome = self.db.commit_evaluation(&EvaluationCommit {
            entry: &entry,
            snapshot: &snapshot,
            audit: &audit,
            activity: &activity,
        })?;

        match outcome {
            CommitOutcome::AlreadyEvaluated(existing) => {
                debug!(state_id, batch_id, "lost evaluation race; keeping existing record");
                Ok(EvaluationOutcome::AlreadyEvaluated { entry: existing })
            }
            CommitOutcome::Committed { production } => {
                let v = &entry.verdict;
                if entry.status == QueueStatus::AutoApproved {
                    info!(
                        state_id,
                        batch_id,
                        verdict = %v.overall_verdict,
                        diffs = v.diffs.len(),
                        "batch auto-promoted"
                    );
                } else {
                    warn!(
                        state_id,
                        batch_id,
                        verdict = %v.overall_verdict,
                        blocks = v.block_count,
                        warns = v.warn_count,
                        "batch quarantined"
                    );
                }
                Ok(EvaluationOutcome::Evaluated { entry, production })
            }
        }
    }

    /// Audit records and activity events for a fresh evaluation, including
    /// self-heal events for older quarantines a clean batch contradicts.
    fn evaluation_records(
        &self,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> Result<(Vec<AuditRecord>, Vec<ActivityEvent>)> {
        let v = &entry.verdict;
        let mut audit = vec![AuditRecord::new(
            &entry.batch_id,
            &entry.state_id,
            AuditAction::Evaluated,
            AuditRecord::SYSTEM_ACTOR,
            now,
            v.summary.clone(),
        )
        .with_verdict(v.overall_verdict)];
        let mut activity = Vec::new();

        if entry.status == QueueStatus::AutoApproved {
            audit.push(
                AuditRecord::new(
                    &entry.batch_id,
                    &entry.state_id,
                    AuditAction::AutoPromoted,
                    AuditRecord::SYSTEM_ACTOR,
                    now,
                    "all changes within tolerance; merged into production",
                )
                .with_verdict(v.overall_verdict),
            );
            activity.push(
                ActivityEvent::new(ActivityKind::Verified, &entry.state_id, now, v.summary.clone())
                    .for_batch(&entry.batch_id),
            );
            for stale in self.pending_quarantines()? {
                if stale.state_id != entry.state_id {
                    continue;
                }
                info!(
                    state_id = %entry.state_id,
                    batch_id = %entry.batch_id,
                    quarantined_batch = %stale.batch_id,
                    "clean batch landed over pending quarantine"
                );
                activity.push(
                    ActivityEvent::new(
                        ActivityKind::SelfHealed,
                        &entry.state_id,
                        now,
                        format!(
                            "{} passed while {} awaits review",
                            entry.batch_id, stale.batch_id
                        ),
                    )
                    .for_batch(&stale.batch_id),
                );
            }
        } else {
            let detail = match &v.required_action {
                Some(action) => format!("{} {action}", v.summary),
                None => v.summary.clone(),
            };
            activity.push(
                ActivityEvent::new(ActivityKind::Quarantined, &entry.state_id, now, detail)
                    .for_batch(&entry.batch_id),
            );
        }
        Ok((audit, activity))
    }

    // -----------------------------------------------------------------------
    // Human resolution
    // -----------------------------------------------------------------------

    /// Approve a quarantined batch and merge its fees into production.
    /// Re-running on an already promoted batch is a no-op.
    pub fn promote_batch(
        &self,
        batch_id: &str,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let resolution = self
            .db
            .resolve_batch(batch_id, QueueStatus::Approved, actor, note, now)?;
        if resolution.changed {
            info!(
                state_id = %resolution.entry.state_id,
                batch_id,
                actor,
                rows = resolution.rows_updated,
                "batch promoted"
            );
        } else {
            debug!(batch_id, "batch already promoted");
        }
        Ok(resolution)
    }

    pub fn reject_batch(
        &self,
        batch_id: &str,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let resolution = self
            .db
            .resolve_batch(batch_id, QueueStatus::Rejected, actor, note, now)?;
        if resolution.changed {
            info!(
                state_id = %resolution.entry.state_id,
                batch_id,
                actor,
                rows = resolution.rows_updated,
                "batch rejected"
            );
        }
        Ok(resolution)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// `(batch_id, state_id)` for staged batches with no queue record.
    pub fn find_unevaluated_batches(&self) -> Result<Vec<(String, String)>> {
        self.db.unevaluated_batches()
    }

    /// Evaluate every unevaluated batch. A failing batch is logged and
    /// skipped; it stays in staging for the next sweep.
    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for (batch_id, state_id) in self.find_unevaluated_batches()? {
            match self.evaluate_batch(&state_id, &batch_id, now) {
                Ok(outcome) if outcome.is_new() => report.evaluated.push(batch_id),
                Ok(_) => report.already_evaluated.push(batch_id),
                Err(e) => {
                    warn!(state_id = %state_id, batch_id = %batch_id, error = %e, "reconcile: evaluation failed");
                    report.failed.push((batch_id, e.to_string()));
                }
            }
        }
        info!(
            evaluated = report.evaluated.len(),
            failed = report.failed.len(),
            "reconciliation sweep complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Crawler health
    // -----------------------------------------------------------------------

    pub fn record_crawl_failure(&self, state_id: &str, now: DateTime<Utc>) -> Result<BackoffState> {
        paths::validate_state_id(state_id)?;
        let policy = &self.config.backoff;
        let mut record = self
            .db
            .backoff(state_id)?
            .unwrap_or_else(|| BackoffRecord::new(state_id));
        record.record_failure(now);
        let state = record.state(policy, now);
        let failures = record.consecutive_failures;

        let mut events = vec![ActivityEvent::new(
            ActivityKind::CrawlFailed,
            state_id,
            now,
            format!("failure {failures}: {}", state.reason),
        )];
        if state.paused {
            if failures == policy.pause_after_failures {
                error!(state_id, failures, "crawler paused: manual investigation required");
                events.push(ActivityEvent::new(
                    ActivityKind::Paused,
                    state_id,
                    now,
                    state.reason.clone(),
                ));
            }
        } else {
            if failures == 1 {
                events.push(ActivityEvent::new(
                    ActivityKind::BackoffEntered,
                    state_id,
                    now,
                    state.reason.clone(),
                ));
            }
            warn!(
                state_id,
                failures,
                delay_ms = state.current_delay_ms.unwrap_or_default(),
                "crawl failed; backing off"
            );
        }

        self.db.put_backoff(&record, &events)?;
        Ok(state)
    }

    pub fn record_crawl_success(&self, state_id: &str, now: DateTime<Utc>) -> Result<BackoffState> {
        paths::validate_state_id(state_id)?;
        let mut record = self
            .db
            .backoff(state_id)?
            .unwrap_or_else(|| BackoffRecord::new(state_id));
        let mut events = Vec::new();
        if record.consecutive_failures > 0 {
            info!(
                state_id,
                failures = record.consecutive_failures,
                "crawler recovered"
            );
            events.push(ActivityEvent::new(
                ActivityKind::Recovered,
                state_id,
                now,
                format!(
                    "recovered after {} consecutive failure(s)",
                    record.consecutive_failures
                ),
            ));
        }
        record.record_success();
        self.db.put_backoff(&record, &events)?;
        Ok(record.state(&self.config.backoff, now))
    }

    /// Current backoff state per state id, for every crawler with a record.
    pub fn backoff_states(&self, now: DateTime<Utc>) -> Result<HashMap<String, BackoffState>> {
        Ok(self
            .db
            .list_backoff()?
            .into_iter()
            .map(|r| (r.state_id.clone(), r.state(&self.config.backoff, now)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Build the crawl schedule with backoff folded in and record any
    /// frequency changes since the previous pass.
    pub fn refresh_schedule(
        &self,
        contexts: &[StateDeadlineContext],
        now: DateTime<Utc>,
    ) -> Result<ScheduleRefresh> {
        let backoff = self.backoff_states(now)?;
        let schedule = build_schedule(contexts, &self.config.scheduler, &backoff, now);
        let previous = self.db.frequencies()?;
        let changes = frequency_changes(&previous, &schedule);

        let events: Vec<ActivityEvent> = changes
            .iter()
            .map(|c| {
                info!(
                    state_id = %c.state_id,
                    category = %c.category,
                    from = %c.from,
                    to = %c.to,
                    "crawl frequency changed"
                );
                ActivityEvent::new(
                    ActivityKind::FrequencyChanged,
                    &c.state_id,
                    now,
                    format!("{}: {} → {} ({})", c.category, c.from, c.to, c.reason),
                )
            })
            .collect();
        let current: Vec<_> = schedule
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.frequency))
            .collect();
        self.db.save_frequencies(&current, &events)?;

        Ok(ScheduleRefresh { schedule, changes })
    }

    // -----------------------------------------------------------------------
    // Review queries
    // -----------------------------------------------------------------------

    /// The stored snapshot of an evaluated batch, or one built from its rows.
    pub fn batch_snapshot(&self, batch_id: &str) -> Result<StagingSnapshot> {
        if let Some(entry) = self.db.queue_entry(batch_id)? {
            if let Some(snapshot) = self.db.snapshot(&entry.snapshot_id)? {
                return Ok(snapshot);
            }
        }
        let rows = self.db.batch_rows(batch_id)?;
        self.build_batch_snapshot(batch_id, &rows)
    }

    /// Historical comparison of two batches of the same state.
    pub fn diff_batches(
        &self,
        older_batch: &str,
        newer_batch: &str,
        now: DateTime<Utc>,
    ) -> Result<AirlockVerdict> {
        let older = self.batch_snapshot(older_batch)?;
        let newer = self.batch_snapshot(newer_batch)?;
        if older.state_id != newer.state_id {
            return Err(AirlockError::StateMismatch {
                batch_id: newer_batch.to_string(),
                requested: older.state_id,
                actual: newer.state_id,
            });
        }
        Ok(diff_snapshots(&older, &newer, &self.config.tolerances, now))
    }

    /// Quarantined batches awaiting a human decision, oldest first.
    pub fn pending_quarantines(&self) -> Result<Vec<QueueEntry>> {
        let mut pending = self.queue(Some(QueueStatus::Quarantined))?;
        pending.reverse();
        Ok(pending)
    }

    /// Queue records, newest first, optionally filtered by status.
    pub fn queue(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
        let mut entries = self.db.list_queue()?;
        if let Some(status) = status {
            entries.retain(|e| e.status == status);
        }
        Ok(entries)
    }

    pub fn audit_trail(&self, batch_id: &str) -> Result<Vec<AuditRecord>> {
        self.db.audit_for(batch_id)
    }

    // -----------------------------------------------------------------------
    // Digest
    // -----------------------------------------------------------------------

    /// Compile the digest for the seven days ending at `now`.
    pub fn weekly_digest(&self, now: DateTime<Utc>) -> Result<WeeklyDigest> {
        let week_start = now - Duration::days(7);
        let events = self.db.activity_since(week_start)?;
        let mut backoff: Vec<BackoffState> = self.backoff_states(now)?.into_values().collect();
        backoff.sort_by(|a, b| a.state_id.cmp(&b.state_id));
        let queue = self.db.list_queue()?;
        Ok(digest::compile(&events, &backoff, &queue, week_start, now))
    }

    /// Write a digest under `.airlock/digests/`, returning its path.
    pub fn save_digest(&self, digest: &WeeklyDigest) -> Result<PathBuf> {
        let path = paths::digest_path(&self.root, digest.generated_at.date_naive());
        io::write_yaml(&path, digest)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::save_reference;
    use crate::ingest::{RawDeadlineRow, RawFeeRow};
    use crate::snapshot::{ApplicationWindow, DrawRules, PointSystem};
    use crate::types::{CrawlFrequency, DataCategory, Severity};
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn setup() -> (TempDir, Pipeline) {
        let dir = TempDir::new().unwrap();
        assert!(Pipeline::init(dir.path()).unwrap());

        let mut co = LiveBaseline::new("CO");
        co.fees.license_fees.nonresident.license = Some(100.0);
        co.deadlines.application_windows.insert(
            "elk".to_string(),
            ApplicationWindow {
                open: None,
                close: NaiveDate::from_ymd_opt(2026, 4, 1),
            },
        );
        co.rules = Some(DrawRules {
            point_system: PointSystem::Preference,
            preference_split_pct: None,
            squared_bonus: false,
            application_approach: String::new(),
            once_in_a_lifetime: vec!["moose".to_string()],
        });
        save_reference(dir.path(), &co).unwrap();

        let pipeline = Pipeline::open(dir.path()).unwrap();
        (dir, pipeline)
    }

    fn license(amount: f64) -> RawRow {
        RawRow::Fee(RawFeeRow {
            fee_name: "Qualifying License".to_string(),
            amount,
            residency: "nonresident".to_string(),
            species_id: None,
            frequency: None,
        })
    }

    fn stage(p: &Pipeline, state: &str, batch: &str, rows: Vec<RawRow>) {
        p.stage_rows(state, batch, "https://example.gov/fees", rows, now())
            .unwrap();
    }

    fn nonresident_license(p: &Pipeline) -> Option<f64> {
        p.db.production("CO")
            .unwrap()
            .and_then(|prod| prod.fees.license_fees.nonresident.license)
    }

    // -- evaluation ---------------------------------------------------------

    #[test]
    fn clean_batch_auto_promotes() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(105.0)]);

        let outcome = p.evaluate_batch("CO", "b1", now()).unwrap();
        assert!(outcome.is_new());
        assert_eq!(outcome.entry().status, QueueStatus::AutoApproved);
        assert_eq!(nonresident_license(&p), Some(105.0));
        assert!(p
            .db
            .batch_rows("b1")
            .unwrap()
            .iter()
            .all(|r| r.status == RowStatus::Approved));

        let trail: Vec<AuditAction> = p
            .audit_trail("b1")
            .unwrap()
            .iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(trail.len(), 2);
        assert!(trail.contains(&AuditAction::Evaluated));
        assert!(trail.contains(&AuditAction::AutoPromoted));
    }

    #[test]
    fn fee_jump_is_quarantined_and_not_promoted() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(109.0)]);

        let outcome = p.evaluate_batch("CO", "b1", now()).unwrap();
        let entry = outcome.entry();
        assert_eq!(entry.status, QueueStatus::Quarantined);
        assert_eq!(entry.verdict.overall_verdict, Severity::Block);
        assert!(entry
            .verdict
            .required_action
            .as_deref()
            .unwrap()
            .contains("1 blocked item"));
        assert_eq!(nonresident_license(&p), None);
        assert!(p
            .db
            .batch_rows("b1")
            .unwrap()
            .iter()
            .all(|r| r.status == RowStatus::Staging));
        assert_eq!(p.audit_trail("b1").unwrap().len(), 1);
    }

    #[test]
    fn once_in_a_lifetime_addition_quarantines() {
        let (_dir, p) = setup();
        stage(
            &p,
            "CO",
            "b1",
            vec![RawRow::DrawRules(DrawRules {
                point_system: PointSystem::Preference,
                preference_split_pct: None,
                squared_bonus: false,
                application_approach: String::new(),
                once_in_a_lifetime: vec!["moose".to_string(), "wolverine".to_string()],
            })],
        );
        let outcome = p.evaluate_batch("CO", "b1", now()).unwrap();
        let diffs = &outcome.entry().verdict.diffs;
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].new_value, serde_json::json!("wolverine"));
        assert_eq!(outcome.entry().status, QueueStatus::Quarantined);
    }

    #[test]
    fn deadline_shift_quarantines() {
        let (_dir, p) = setup();
        stage(
            &p,
            "CO",
            "b1",
            vec![RawRow::Deadline(RawDeadlineRow {
                deadline_type: "application_close".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 4, 6).unwrap(),
                species_id: Some("elk".to_string()),
                year: 2026,
            })],
        );
        let outcome = p.evaluate_batch("CO", "b1", now()).unwrap();
        assert_eq!(outcome.entry().status, QueueStatus::Quarantined);
        assert_eq!(outcome.entry().verdict.diffs[0].days_delta, Some(5));
    }

    #[test]
    fn evaluating_twice_is_idempotent() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(105.0)]);

        p.evaluate_batch("CO", "b1", now()).unwrap();
        let fees_once = p.db.production("CO").unwrap().unwrap().fees;

        let again = p
            .evaluate_batch("CO", "b1", now() + Duration::minutes(5))
            .unwrap();
        assert!(!again.is_new());
        assert_eq!(p.queue(None).unwrap().len(), 1);
        assert_eq!(p.db.production("CO").unwrap().unwrap().fees, fees_once);
        assert_eq!(p.audit_trail("b1").unwrap().len(), 2);
    }

    #[test]
    fn concurrent_evaluations_record_once() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(104.0)]);
        let p = Arc::new(p);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || p.evaluate_batch("CO", "b1", now()).unwrap())
            })
            .collect();
        let outcomes: Vec<EvaluationOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_new()).count(), 1);
        assert_eq!(p.queue(None).unwrap().len(), 1);
        let production = p.db.production("CO").unwrap().unwrap();
        assert_eq!(production.promoted_batches, vec!["b1".to_string()]);
        assert_eq!(production.fees.license_fees.nonresident.license, Some(104.0));
    }

    #[test]
    fn unknown_state_leaves_batch_in_staging() {
        let (_dir, p) = setup();
        stage(&p, "ZZ", "b9", vec![license(10.0)]);

        let err = p.evaluate_batch("ZZ", "b9", now()).unwrap_err();
        assert!(matches!(err, AirlockError::UnknownState(ref s) if s == "ZZ"));
        assert!(p.queue(None).unwrap().is_empty());
        assert_eq!(
            p.find_unevaluated_batches().unwrap(),
            vec![("b9".to_string(), "ZZ".to_string())]
        );
    }

    #[test]
    fn missing_batch_and_wrong_state_error() {
        let (_dir, p) = setup();
        assert!(matches!(
            p.evaluate_batch("CO", "nope", now()).unwrap_err(),
            AirlockError::BatchNotFound(_)
        ));

        stage(&p, "CO", "b1", vec![license(100.0)]);
        assert!(matches!(
            p.evaluate_batch("WY", "b1", now()).unwrap_err(),
            AirlockError::StateMismatch { .. }
        ));
    }

    #[test]
    fn staging_rejects_bad_input() {
        let (_dir, p) = setup();
        assert!(p
            .stage_rows("co", "b1", "u", vec![license(1.0)], now())
            .is_err());
        assert!(p.stage_rows("CO", "b1", "u", Vec::new(), now()).is_err());
        assert!(p
            .stage_rows("CO", "b1", "u", vec![license(-5.0)], now())
            .is_err());
        assert!(p
            .stage_rows("CO", "a/b", "u", vec![license(1.0)], now())
            .is_err());
        assert!(p.find_unevaluated_batches().unwrap().is_empty());
    }

    // -- resolution ---------------------------------------------------------

    #[test]
    fn promoting_quarantine_merges_fees_once() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(109.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();

        let first = p
            .promote_batch("b1", "reviewer", Some("confirmed on cpw.state.co.us"), now())
            .unwrap();
        assert!(first.changed);
        assert_eq!(first.entry.status, QueueStatus::Approved);
        assert_eq!(nonresident_license(&p), Some(109.0));

        let second = p.promote_batch("b1", "reviewer", None, now()).unwrap();
        assert!(!second.changed);
        assert_eq!(first.production, second.production);

        assert!(matches!(
            p.reject_batch("b1", "reviewer", None, now()).unwrap_err(),
            AirlockError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn promoting_an_auto_approved_batch_again_changes_nothing() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(105.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();
        stage(&p, "CO", "b2", vec![license(110.0)]);
        let outcome = p.evaluate_batch("CO", "b2", now()).unwrap();
        assert_eq!(outcome.entry().status, QueueStatus::AutoApproved);
        assert_eq!(nonresident_license(&p), Some(110.0));

        let r = p.promote_batch("b1", "reviewer", None, now()).unwrap();
        assert!(!r.changed);
        assert_eq!(r.entry.status, QueueStatus::AutoApproved);
        assert_eq!(nonresident_license(&p), Some(110.0));
    }

    #[test]
    fn promoting_quarantine_after_a_newer_batch_keeps_newer_fees() {
        let (_dir, p) = setup();
        p.stage_rows(
            "CO",
            "b1",
            "https://example.gov/fees",
            vec![license(109.0)],
            now() - Duration::hours(1),
        )
        .unwrap();
        p.evaluate_batch("CO", "b1", now()).unwrap();
        stage(&p, "CO", "b2", vec![license(104.0)]);
        let outcome = p.evaluate_batch("CO", "b2", now()).unwrap();
        assert_eq!(outcome.entry().status, QueueStatus::AutoApproved);

        let r = p.promote_batch("b1", "reviewer", Some("late review"), now()).unwrap();
        assert!(r.changed);
        assert_eq!(r.entry.status, QueueStatus::Approved);
        assert_eq!(nonresident_license(&p), Some(104.0));
        assert_eq!(
            r.production.unwrap().promoted_batches,
            vec!["b1".to_string(), "b2".to_string()]
        );
    }

    #[test]
    fn rejecting_quarantine_keeps_production_untouched() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(150.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();

        let r = p.reject_batch("b1", "reviewer", Some("scrape error"), now()).unwrap();
        assert!(r.changed);
        assert_eq!(r.rows_updated, 1);
        assert!(r.production.is_none());
        assert_eq!(nonresident_license(&p), None);
        assert!(p.pending_quarantines().unwrap().is_empty());

        let again = p.reject_batch("b1", "reviewer", None, now()).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn promoted_fees_become_the_new_baseline() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(106.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();

        // 106 -> 112 is +5.7% against the promoted value, +12% against reference.
        stage(&p, "CO", "b2", vec![license(112.0)]);
        let outcome = p.evaluate_batch("CO", "b2", now()).unwrap();
        assert_eq!(outcome.entry().status, QueueStatus::AutoApproved);
        assert_eq!(nonresident_license(&p), Some(112.0));
    }

    // -- reconciliation -----------------------------------------------------

    #[test]
    fn reconcile_sweeps_unevaluated_batches() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(101.0)]);
        stage(&p, "CO", "b2", vec![license(130.0)]);
        stage(&p, "ZZ", "b3", vec![license(5.0)]);

        let report = p.reconcile(now()).unwrap();
        assert_eq!(report.evaluated, vec!["b1".to_string(), "b2".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b3");

        let again = p.reconcile(now()).unwrap();
        assert!(again.evaluated.is_empty());
        assert_eq!(again.failed.len(), 1);
        assert_eq!(p.queue(None).unwrap().len(), 2);
    }

    #[test]
    fn clean_batch_over_pending_quarantine_self_heals() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(109.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();
        stage(&p, "CO", "b2", vec![license(102.0)]);
        p.evaluate_batch("CO", "b2", now()).unwrap();

        let events = p.db.activity_since(now() - Duration::days(1)).unwrap();
        let healed: Vec<_> = events
            .iter()
            .filter(|e| e.kind == ActivityKind::SelfHealed)
            .collect();
        assert_eq!(healed.len(), 1);
        assert_eq!(healed[0].batch_id.as_deref(), Some("b1"));
        assert_eq!(p.pending_quarantines().unwrap().len(), 1);
    }

    #[test]
    fn diff_batches_compares_snapshots() {
        let (_dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(109.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();
        stage(&p, "CO", "b2", vec![license(102.0)]);

        let v = p.diff_batches("b1", "b2", now()).unwrap();
        assert_eq!(v.snapshot_id, "snap-b2");
        assert_eq!(v.overall_verdict, Severity::Block);
        assert!(v.diffs.iter().any(|d| d.pct_change.unwrap_or(0.0) < -6.0));
    }

    // -- crawler health and scheduling --------------------------------------

    #[test]
    fn crawl_failures_escalate_to_pause() {
        let (_dir, p) = setup();
        let first = p.record_crawl_failure("CO", now()).unwrap();
        assert!(first.in_backoff());
        assert_eq!(first.current_delay_ms, Some(5 * 60 * 1000));

        let mut last = first;
        for i in 2..=10 {
            last = p
                .record_crawl_failure("CO", now() + Duration::minutes(i))
                .unwrap();
        }
        assert!(last.paused);
        assert_eq!(last.current_delay_ms, None);

        let events = p.db.activity_since(now() - Duration::hours(1)).unwrap();
        let count = |kind: ActivityKind| events.iter().filter(|e| e.kind == kind).count();
        assert_eq!(count(ActivityKind::CrawlFailed), 10);
        assert_eq!(count(ActivityKind::BackoffEntered), 1);
        assert_eq!(count(ActivityKind::Paused), 1);

        let healthy = p
            .record_crawl_success("CO", now() + Duration::hours(2))
            .unwrap();
        assert_eq!(healthy.consecutive_failures, 0);
        assert!(!healthy.paused);
    }

    fn context(days: i64) -> StateDeadlineContext {
        StateDeadlineContext {
            state_id: "CO".to_string(),
            closest_deadline: None,
            window_open: true,
            days_until_deadline: Some(days),
            source_urls: Default::default(),
            default_url: Some("https://cpw.state.co.us".to_string()),
        }
    }

    #[test]
    fn schedule_refresh_records_frequency_changes() {
        let (_dir, p) = setup();
        let first = p.refresh_schedule(&[context(40)], now()).unwrap();
        assert!(first.changes.is_empty());

        let second = p
            .refresh_schedule(&[context(20)], now() + Duration::days(20))
            .unwrap();
        let changed: Vec<DataCategory> = second.changes.iter().map(|c| c.category).collect();
        assert_eq!(changed.len(), 3);
        assert!(!changed.contains(&DataCategory::DrawOdds));
        assert!(second
            .changes
            .iter()
            .all(|c| c.from == CrawlFrequency::Weekly && c.to == CrawlFrequency::Daily));
    }

    #[test]
    fn paused_crawler_shows_in_schedule() {
        let (_dir, p) = setup();
        for _ in 0..10 {
            p.record_crawl_failure("CO", now()).unwrap();
        }
        let refresh = p.refresh_schedule(&[context(20)], now()).unwrap();
        assert!(refresh
            .schedule
            .tasks
            .iter()
            .all(|t| t.next_crawl_at == crate::schedule::NextCrawl::Paused));
        assert!(refresh.schedule.next_due.is_none());
    }

    // -- digest -------------------------------------------------------------

    #[test]
    fn digest_reflects_pipeline_activity() {
        let (dir, p) = setup();
        stage(&p, "CO", "b1", vec![license(101.0)]);
        p.evaluate_batch("CO", "b1", now()).unwrap();
        stage(&p, "CO", "b2", vec![license(150.0)]);
        p.evaluate_batch("CO", "b2", now()).unwrap();
        p.record_crawl_failure("CO", now()).unwrap();

        let digest = p.weekly_digest(now() + Duration::hours(1)).unwrap();
        assert_eq!(digest.verifications, 1);
        assert_eq!(digest.quarantined_this_week, 1);
        assert_eq!(digest.awaiting_approval.len(), 1);
        assert_eq!(digest.crawl_failures, 1);
        // 100 - 10 (awaiting) - 5 (backing off)
        assert_eq!(digest.health_score, 85);

        let path = p.save_digest(&digest).unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }
}
