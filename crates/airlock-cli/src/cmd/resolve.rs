use crate::output::print_json;
use airlock_core::pipeline::Pipeline;
use airlock_core::store::Resolution;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn promote(
    root: &Path,
    batch: &str,
    by: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let resolution = pipeline
        .promote_batch(batch, by, note, now)
        .with_context(|| format!("failed to promote batch '{batch}'"))?;
    report(&resolution, "promoted", json)
}

pub fn reject(
    root: &Path,
    batch: &str,
    by: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let resolution = pipeline
        .reject_batch(batch, by, note, now)
        .with_context(|| format!("failed to reject batch '{batch}'"))?;
    report(&resolution, "rejected", json)
}

fn report(resolution: &Resolution, verb: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(resolution);
    }
    let entry = &resolution.entry;
    if resolution.changed {
        println!(
            "Batch '{}' ({}) {verb}: {} row(s) updated.",
            entry.batch_id, entry.state_id, resolution.rows_updated
        );
    } else {
        println!(
            "Batch '{}' is already {}. Nothing to do.",
            entry.batch_id, entry.status
        );
    }
    Ok(())
}
