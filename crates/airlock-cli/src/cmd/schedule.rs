use crate::output::{fmt_time, print_json, print_table};
use airlock_core::pipeline::Pipeline;
use airlock_core::schedule::{NextCrawl, StateDeadlineContext};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn run(
    root: &Path,
    contexts_file: &Path,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(contexts_file)
        .with_context(|| format!("failed to read {}", contexts_file.display()))?;
    let contexts: Vec<StateDeadlineContext> = serde_yaml::from_str(&data)
        .with_context(|| format!("invalid deadline contexts in {}", contexts_file.display()))?;

    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let refresh = pipeline
        .refresh_schedule(&contexts, now)
        .context("failed to build crawl schedule")?;

    if json {
        return print_json(&refresh);
    }

    let rows: Vec<Vec<String>> = refresh
        .schedule
        .tasks
        .iter()
        .map(|t| {
            let next = match t.next_crawl_at {
                NextCrawl::At { at } => fmt_time(at),
                NextCrawl::AwaitTrigger => "on trigger".to_string(),
                NextCrawl::Paused => "PAUSED".to_string(),
            };
            vec![
                t.id.clone(),
                t.frequency.to_string(),
                t.priority.to_string(),
                next,
                t.reason.clone(),
            ]
        })
        .collect();
    print_table(&["TASK", "FREQUENCY", "PRI", "NEXT", "REASON"], &rows);

    if !refresh.changes.is_empty() {
        println!();
        for c in &refresh.changes {
            println!(
                "  changed: {}/{} {} → {}",
                c.state_id, c.category, c.from, c.to
            );
        }
    }
    Ok(())
}
