use crate::output::print_json;
use airlock_core::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn run(root: &Path, now: DateTime<Utc>, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let digest = pipeline
        .weekly_digest(now)
        .context("failed to compile weekly digest")?;
    let path = pipeline
        .save_digest(&digest)
        .context("failed to save weekly digest")?;

    if json {
        return print_json(&digest);
    }

    println!("{}", digest.summary);
    if !digest.awaiting_approval.is_empty() {
        println!();
        println!("Awaiting approval:");
        for q in &digest.awaiting_approval {
            println!(
                "  {} ({}): {} blocked, {} flagged",
                q.batch_id, q.state_id, q.block_count, q.warn_count
            );
        }
    }
    if !digest.paused.is_empty() {
        println!();
        println!("Paused crawlers: {}", digest.paused.join(", "));
    }
    println!();
    println!("Saved: {}", path.display());
    Ok(())
}
