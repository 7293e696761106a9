use crate::output::{fmt_time, print_json, print_table};
use airlock_core::pipeline::Pipeline;
use airlock_core::types::QueueStatus;
use anyhow::Context;
use std::path::Path;

pub fn list(root: &Path, status: Option<QueueStatus>, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let entries = pipeline.queue(status).context("failed to read queue")?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.batch_id.clone(),
                e.state_id.clone(),
                e.status.to_string(),
                e.verdict.block_count.to_string(),
                e.verdict.warn_count.to_string(),
                fmt_time(e.updated_at),
            ]
        })
        .collect();
    print_table(&["BATCH", "STATE", "STATUS", "BLOCK", "WARN", "UPDATED"], &rows);
    Ok(())
}

pub fn audit(root: &Path, batch: &str, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let trail = pipeline
        .audit_trail(batch)
        .with_context(|| format!("failed to read audit trail for '{batch}'"))?;

    if json {
        return print_json(&trail);
    }
    if trail.is_empty() {
        println!("No audit records for '{batch}'.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = trail
        .iter()
        .map(|a| {
            vec![
                fmt_time(a.at),
                a.action.to_string(),
                a.actor.clone(),
                a.verdict.map(|v| v.to_string()).unwrap_or_default(),
                a.detail.clone(),
            ]
        })
        .collect();
    print_table(&["AT", "ACTION", "ACTOR", "VERDICT", "DETAIL"], &rows);
    Ok(())
}
