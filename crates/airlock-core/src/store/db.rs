//! Persistent pipeline state using redb.
//!
//! # Table design
//!
//! String-keyed tables hold one JSON value per natural key:
//!
//! | table          | key                     | value                 |
//! |----------------|-------------------------|-----------------------|
//! | `staging_rows` | `"{batch_id}/{row_id}"` | `StagingRow`          |
//! | `queue`        | `batch_id`              | `QueueEntry`          |
//! | `snapshots`    | snapshot id             | `StagingSnapshot`     |
//! | `production`   | state id                | `ProductionBaseline`  |
//! | `backoff`      | state id                | `BackoffRecord`       |
//! | `frequencies`  | `"{state}/{category}"`  | `CrawlFrequency`      |
//!
//! `audit` and `activity` are append-only logs with a 24-byte composite key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//! Byte order equals time order, so "everything since T" is a single range
//! scan from `since_lower_bound(T)`.
//!
//! The `queue` key is the uniqueness constraint behind at-most-one
//! evaluation per batch: [`AirlockDb::commit_evaluation`] checks for an
//! existing record and inserts inside the same write transaction, and redb
//! serializes write transactions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::backoff::BackoffRecord;
use crate::baseline::{ProductionBaseline, PromotedFees};
use crate::error::{AirlockError, Result};
use crate::snapshot::{fee_payload, StagingSnapshot};
use crate::types::{CrawlFrequency, QueueStatus, RowStatus};

use super::records::{
    ActivityEvent, ActivityKind, AuditAction, AuditRecord, QueueEntry, StagingRow,
};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const STAGING_ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("staging_rows");
const QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("queue");
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
const PRODUCTION: TableDefinition<&str, &[u8]> = TableDefinition::new("production");
const BACKOFF: TableDefinition<&str, &[u8]> = TableDefinition::new("backoff");
const FREQUENCIES: TableDefinition<&str, &[u8]> = TableDefinition::new("frequencies");

/// Key: 24-byte composite (timestamp_ms big-endian ++ uuid bytes)
const AUDIT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit");
const ACTIVITY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("activity");

type StrTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type LogTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

// ---------------------------------------------------------------------------
// Key and codec helpers
// ---------------------------------------------------------------------------

fn event_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Lower bound for a range scan returning every event at or after `since`.
fn since_lower_bound(since: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = since.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key
}

/// `[lo, hi)` covering every `"{batch_id}/..."` key; `'0'` follows `'/'`.
fn batch_bounds(batch_id: &str) -> (String, String) {
    (format!("{batch_id}/"), format!("{batch_id}0"))
}

fn store_err<E: fmt::Display>(e: E) -> AirlockError {
    AirlockError::Store(e.to_string())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn get_json<T, R>(table: &R, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(store_err)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(table: &mut StrTable<'_>, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice()).map_err(store_err)?;
    Ok(())
}

fn scan_json<T, R>(table: &R) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(store_err)? {
        let (_, v) = entry.map_err(store_err)?;
        out.push(decode(v.value())?);
    }
    Ok(out)
}

fn append<T: Serialize>(table: &mut LogTable<'_>, at: DateTime<Utc>, id: Uuid, value: &T) -> Result<()> {
    let key = event_key(at, id);
    let bytes = serde_json::to_vec(value)?;
    table
        .insert(key.as_slice(), bytes.as_slice())
        .map_err(store_err)?;
    Ok(())
}

fn read_batch_rows<R>(table: &R, batch_id: &str) -> Result<Vec<StagingRow>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let (lo, hi) = batch_bounds(batch_id);
    let mut rows = Vec::new();
    for entry in table.range(lo.as_str()..hi.as_str()).map_err(store_err)? {
        let (_, v) = entry.map_err(store_err)?;
        rows.push(decode(v.value())?);
    }
    Ok(rows)
}

/// Move every still-staged row of `batch_id` to `to`. Rows already resolved
/// are left alone.
fn transition_rows(table: &mut StrTable<'_>, batch_id: &str, to: RowStatus) -> Result<usize> {
    let rows = read_batch_rows(&*table, batch_id)?;
    let mut updated = 0;
    for mut row in rows {
        if row.status == RowStatus::Staging {
            row.status = to;
            put_json(table, &row.key(), &row)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Rebuild the state's production baseline from the approved rows of every
/// promoted batch in the queue. The caller writes the queue first so the
/// batch being promoted is included.
fn rebuild_production(
    wt: &WriteTransaction,
    state_id: &str,
    now: DateTime<Utc>,
) -> Result<ProductionBaseline> {
    let entries: Vec<QueueEntry> = {
        let queue = wt.open_table(QUEUE).map_err(store_err)?;
        scan_json(&queue)?
    };

    let mut promoted = Vec::new();
    {
        let table = wt.open_table(STAGING_ROWS).map_err(store_err)?;
        for entry in entries
            .iter()
            .filter(|e| e.state_id == state_id && e.status.is_promoted())
        {
            let rows = read_batch_rows(&table, &entry.batch_id)?;
            let approved: Vec<&StagingRow> = rows
                .iter()
                .filter(|r| r.status == RowStatus::Approved)
                .collect();
            let Some(scraped_at) = approved.iter().map(|r| r.scraped_at).max() else {
                continue;
            };
            promoted.push(PromotedFees {
                batch_id: entry.batch_id.clone(),
                scraped_at,
                queued_at: entry.created_at,
                fees: fee_payload(approved.iter().map(|r| &r.row)),
            });
        }
    }

    let mut table = wt.open_table(PRODUCTION).map_err(store_err)?;
    let previous = get_json::<ProductionBaseline, _>(&table, state_id)?;
    let production = ProductionBaseline::rebuild(state_id, promoted, previous.as_ref(), now);
    if previous.as_ref() != Some(&production) {
        put_json(&mut table, state_id, &production)?;
    }
    Ok(production)
}

// ---------------------------------------------------------------------------
// Commit types
// ---------------------------------------------------------------------------

/// Everything one evaluation writes, committed atomically.
pub struct EvaluationCommit<'a> {
    pub entry: &'a QueueEntry,
    pub snapshot: &'a StagingSnapshot,
    pub audit: &'a [AuditRecord],
    pub activity: &'a [ActivityEvent],
}

#[derive(Debug)]
pub enum CommitOutcome {
    /// This evaluation won. `production` is the merged baseline when the
    /// batch auto-promoted.
    Committed {
        production: Option<ProductionBaseline>,
    },
    /// Another evaluation of the same batch committed first.
    AlreadyEvaluated(QueueEntry),
}

/// Result of a human promote/reject.
#[derive(Debug, Serialize)]
pub struct Resolution {
    pub entry: QueueEntry,
    /// False when the batch was already in the requested state.
    pub changed: bool,
    pub rows_updated: usize,
    pub production: Option<ProductionBaseline>,
}

// ---------------------------------------------------------------------------
// AirlockDb
// ---------------------------------------------------------------------------

/// Persistent store for staging rows, the evaluation queue and its logs.
pub struct AirlockDb {
    db: Database,
}

impl AirlockDb {
    /// Open or create the redb database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        for def in [STAGING_ROWS, QUEUE, SNAPSHOTS, PRODUCTION, BACKOFF, FREQUENCIES] {
            wt.open_table(def).map_err(store_err)?;
        }
        for def in [AUDIT, ACTIVITY] {
            wt.open_table(def).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    // -- staging ------------------------------------------------------------

    /// Stage a new batch. A batch id that already has rows or a queue record
    /// is rejected so a batch's content never changes after staging.
    pub fn stage_rows(&self, rows: &[StagingRow]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let batch_id = first.batch_id.as_str();

        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let queue = wt.open_table(QUEUE).map_err(store_err)?;
            if get_json::<QueueEntry, _>(&queue, batch_id)?.is_some() {
                return Err(AirlockError::BatchExists(batch_id.to_string()));
            }
        }
        {
            let mut table = wt.open_table(STAGING_ROWS).map_err(store_err)?;
            if !read_batch_rows(&table, batch_id)?.is_empty() {
                return Err(AirlockError::BatchExists(batch_id.to_string()));
            }
            for row in rows {
                put_json(&mut table, &row.key(), row)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// All rows of `batch_id`, in ingestion order.
    pub fn batch_rows(&self, batch_id: &str) -> Result<Vec<StagingRow>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(STAGING_ROWS).map_err(store_err)?;
        read_batch_rows(&table, batch_id)
    }

    /// `(batch_id, state_id)` for every batch with staged rows and no queue
    /// record, sorted by batch id.
    pub fn unevaluated_batches(&self) -> Result<Vec<(String, String)>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let rows = rt.open_table(STAGING_ROWS).map_err(store_err)?;
        let queue = rt.open_table(QUEUE).map_err(store_err)?;

        let mut batches = BTreeMap::new();
        for row in scan_json::<StagingRow, _>(&rows)? {
            if row.status == RowStatus::Staging {
                batches.entry(row.batch_id).or_insert(row.state_id);
            }
        }

        let mut out = Vec::new();
        for (batch_id, state_id) in batches {
            if get_json::<QueueEntry, _>(&queue, &batch_id)?.is_none() {
                out.push((batch_id, state_id));
            }
        }
        Ok(out)
    }

    // -- evaluation ---------------------------------------------------------

    /// Commit one evaluation atomically: queue record, snapshot, audit and
    /// activity, plus row approval and the production merge when the entry
    /// is auto-approved.
    ///
    /// If the batch already has a queue record nothing is written and the
    /// existing record is returned.
    pub fn commit_evaluation(&self, commit: &EvaluationCommit<'_>) -> Result<CommitOutcome> {
        let entry = commit.entry;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut queue = wt.open_table(QUEUE).map_err(store_err)?;
            if let Some(existing) = get_json::<QueueEntry, _>(&queue, &entry.batch_id)? {
                drop(queue);
                wt.abort().map_err(store_err)?;
                return Ok(CommitOutcome::AlreadyEvaluated(existing));
            }
            put_json(&mut queue, &entry.batch_id, entry)?;
        }
        {
            let mut snapshots = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            if get_json::<StagingSnapshot, _>(&snapshots, &commit.snapshot.id)?.is_none() {
                put_json(&mut snapshots, &commit.snapshot.id, commit.snapshot)?;
            }
        }

        let production = if entry.status == QueueStatus::AutoApproved {
            {
                let mut rows = wt.open_table(STAGING_ROWS).map_err(store_err)?;
                transition_rows(&mut rows, &entry.batch_id, RowStatus::Approved)?;
            }
            Some(rebuild_production(&wt, &entry.state_id, entry.updated_at)?)
        } else {
            None
        };

        {
            let mut audit = wt.open_table(AUDIT).map_err(store_err)?;
            for record in commit.audit {
                append(&mut audit, record.at, record.id, record)?;
            }
            let mut activity = wt.open_table(ACTIVITY).map_err(store_err)?;
            for event in commit.activity {
                append(&mut activity, event.at, event.id, event)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(CommitOutcome::Committed { production })
    }

    /// Resolve a batch by human decision: `Approved` or `Rejected`.
    ///
    /// Idempotent: resolving to the current status writes nothing and
    /// returns the stored production record untouched.
    pub fn resolve_batch(
        &self,
        batch_id: &str,
        to: QueueStatus,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let mut entry = {
            let queue = wt.open_table(QUEUE).map_err(store_err)?;
            get_json::<QueueEntry, _>(&queue, batch_id)?
        }
        .ok_or_else(|| AirlockError::BatchNotFound(batch_id.to_string()))?;

        if !entry.status.check_transition(to)? {
            let production = if to == QueueStatus::Approved {
                let table = wt.open_table(PRODUCTION).map_err(store_err)?;
                get_json::<ProductionBaseline, _>(&table, &entry.state_id)?
            } else {
                None
            };
            wt.abort().map_err(store_err)?;
            return Ok(Resolution {
                entry,
                changed: false,
                rows_updated: 0,
                production,
            });
        }

        let row_status = if to == QueueStatus::Approved {
            RowStatus::Approved
        } else {
            RowStatus::Rejected
        };
        let rows_updated = {
            let mut rows = wt.open_table(STAGING_ROWS).map_err(store_err)?;
            transition_rows(&mut rows, batch_id, row_status)?
        };

        entry.status = to;
        entry.updated_at = now;
        entry.resolved_by = Some(actor.to_string());
        entry.resolution_note = note.map(str::to_string);
        {
            let mut queue = wt.open_table(QUEUE).map_err(store_err)?;
            put_json(&mut queue, batch_id, &entry)?;
        }

        let production = if to == QueueStatus::Approved {
            Some(rebuild_production(&wt, &entry.state_id, now)?)
        } else {
            None
        };

        let (action, kind) = if to == QueueStatus::Approved {
            (AuditAction::Promoted, ActivityKind::Promoted)
        } else {
            (AuditAction::Rejected, ActivityKind::Rejected)
        };
        let detail = match note {
            Some(note) => format!("{action} by {actor}: {note}"),
            None => format!("{action} by {actor}"),
        };
        let record = AuditRecord::new(
            batch_id,
            &entry.state_id,
            action,
            actor,
            now,
            detail.clone(),
        )
        .with_verdict(entry.verdict.overall_verdict);
        let event = ActivityEvent::new(kind, &entry.state_id, now, detail).for_batch(batch_id);
        {
            let mut audit = wt.open_table(AUDIT).map_err(store_err)?;
            append(&mut audit, record.at, record.id, &record)?;
            let mut activity = wt.open_table(ACTIVITY).map_err(store_err)?;
            append(&mut activity, event.at, event.id, &event)?;
        }
        wt.commit().map_err(store_err)?;

        Ok(Resolution {
            entry,
            changed: true,
            rows_updated,
            production,
        })
    }

    // -- queue, snapshots, production ---------------------------------------

    pub fn queue_entry(&self, batch_id: &str) -> Result<Option<QueueEntry>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(QUEUE).map_err(store_err)?;
        get_json(&table, batch_id)
    }

    /// Every queue record, newest first.
    pub fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(QUEUE).map_err(store_err)?;
        let mut entries: Vec<QueueEntry> = scan_json(&table)?;
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(entries)
    }

    pub fn snapshot(&self, snapshot_id: &str) -> Result<Option<StagingSnapshot>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(SNAPSHOTS).map_err(store_err)?;
        get_json(&table, snapshot_id)
    }

    pub fn production(&self, state_id: &str) -> Result<Option<ProductionBaseline>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(PRODUCTION).map_err(store_err)?;
        get_json(&table, state_id)
    }

    // -- crawler state ------------------------------------------------------

    pub fn backoff(&self, state_id: &str) -> Result<Option<BackoffRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(BACKOFF).map_err(store_err)?;
        get_json(&table, state_id)
    }

    pub fn list_backoff(&self) -> Result<Vec<BackoffRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(BACKOFF).map_err(store_err)?;
        scan_json(&table)
    }

    /// Persist a crawler's failure counter together with its activity.
    pub fn put_backoff(&self, record: &BackoffRecord, events: &[ActivityEvent]) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(BACKOFF).map_err(store_err)?;
            put_json(&mut table, &record.state_id, record)?;
            let mut activity = wt.open_table(ACTIVITY).map_err(store_err)?;
            for event in events {
                append(&mut activity, event.at, event.id, event)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Frequencies used by the last scheduling pass, keyed by task id.
    pub fn frequencies(&self) -> Result<HashMap<String, CrawlFrequency>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(FREQUENCIES).map_err(store_err)?;
        let mut out = HashMap::new();
        for entry in table.iter().map_err(store_err)? {
            let (k, v) = entry.map_err(store_err)?;
            out.insert(k.value().to_string(), decode(v.value())?);
        }
        Ok(out)
    }

    pub fn save_frequencies(
        &self,
        frequencies: &[(String, CrawlFrequency)],
        events: &[ActivityEvent],
    ) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(FREQUENCIES).map_err(store_err)?;
            for (task_id, frequency) in frequencies {
                put_json(&mut table, task_id, frequency)?;
            }
            let mut activity = wt.open_table(ACTIVITY).map_err(store_err)?;
            for event in events {
                append(&mut activity, event.at, event.id, event)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    // -- logs ---------------------------------------------------------------

    /// Audit records for `batch_id`, oldest first.
    pub fn audit_for(&self, batch_id: &str) -> Result<Vec<AuditRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(AUDIT).map_err(store_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let record: AuditRecord = decode(v.value())?;
            if record.batch_id == batch_id {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Activity events at or after `since`, oldest first.
    pub fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityEvent>> {
        let lower = since_lower_bound(since);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ACTIVITY).map_err(store_err)?;
        let mut out = Vec::new();
        for entry in table.range(lower.as_slice()..).map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
