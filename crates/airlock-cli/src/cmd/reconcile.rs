use crate::output::print_json;
use airlock_core::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Sweep for staged batches the event trigger missed. Failed batches are
/// reported but do not fail the command; they stay staged for the next run.
pub fn run(root: &Path, now: DateTime<Utc>, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let report = pipeline.reconcile(now).context("reconciliation failed")?;

    if json {
        return print_json(&report);
    }

    if report.evaluated.is_empty() && report.failed.is_empty() && report.already_evaluated.is_empty() {
        println!("No unevaluated batches.");
        return Ok(());
    }
    for batch in &report.evaluated {
        println!("  evaluated: {batch}");
    }
    for batch in &report.already_evaluated {
        println!("  skipped:   {batch} (evaluated concurrently)");
    }
    for (batch, err) in &report.failed {
        println!("  failed:    {batch}: {err}");
    }
    Ok(())
}
