//! Durable pipeline state.
//!
//! Provides the persisted record types (`StagingRow`, `QueueEntry`,
//! `AuditRecord`, `ActivityEvent`) and `AirlockDb`, the redb-backed store
//! the pipeline reads and writes.

pub mod db;
pub mod records;

pub use db::{AirlockDb, CommitOutcome, EvaluationCommit, Resolution};
pub use records::{
    ActivityEvent, ActivityKind, AuditAction, AuditRecord, QueueEntry, StagingRow,
};
