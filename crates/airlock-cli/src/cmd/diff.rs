use super::evaluate::print_verdict;
use crate::output::print_json;
use airlock_core::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn run(
    root: &Path,
    older: &str,
    newer: &str,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let verdict = pipeline
        .diff_batches(older, newer, now)
        .with_context(|| format!("failed to diff '{older}' against '{newer}'"))?;

    if json {
        return print_json(&verdict);
    }
    println!("{} → {} ({})", older, newer, verdict.state_id);
    print_verdict(&verdict);
    Ok(())
}
