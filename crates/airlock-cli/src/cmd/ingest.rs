use crate::output::print_json;
use airlock_core::ingest::RawRow;
use airlock_core::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Stage a batch read from a JSON array of rows, each tagged with `kind`
/// (`fee`, `deadline`, `draw_rules` or `species_list`).
pub fn run(
    root: &Path,
    state: &str,
    batch: &str,
    source_url: &str,
    rows_file: &Path,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(rows_file)
        .with_context(|| format!("failed to read {}", rows_file.display()))?;
    let rows: Vec<RawRow> = serde_json::from_str(&data)
        .with_context(|| format!("invalid rows in {}", rows_file.display()))?;

    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let staged = pipeline
        .stage_rows(state, batch, source_url, rows, now)
        .with_context(|| format!("failed to stage batch '{batch}'"))?;

    if json {
        print_json(&serde_json::json!({
            "state_id": state,
            "batch_id": batch,
            "rows": staged,
        }))?;
    } else {
        println!("Staged {staged} row(s) for {state} as batch '{batch}'.");
    }
    Ok(())
}
