use crate::output::{fmt_time, print_json};
use airlock_core::backoff::RetryAt;
use airlock_core::pipeline::Pipeline;
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum CrawlSubcommand {
    /// Record a failed crawl; repeated failures back off and then pause
    Failed {
        #[arg(long)]
        state: String,
    },

    /// Record a successful crawl, clearing any backoff
    Succeeded {
        #[arg(long)]
        state: String,
    },

    /// Show backoff state for every crawler with a record
    Status,
}

pub fn run(
    root: &Path,
    subcmd: CrawlSubcommand,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let state = match subcmd {
        CrawlSubcommand::Failed { state } => pipeline
            .record_crawl_failure(&state, now)
            .with_context(|| format!("failed to record crawl failure for {state}"))?,
        CrawlSubcommand::Succeeded { state } => pipeline
            .record_crawl_success(&state, now)
            .with_context(|| format!("failed to record crawl success for {state}"))?,
        CrawlSubcommand::Status => {
            let mut states: Vec<_> = pipeline.backoff_states(now)?.into_values().collect();
            states.sort_by(|a, b| a.state_id.cmp(&b.state_id));
            if json {
                return print_json(&states);
            }
            if states.is_empty() {
                println!("No crawl failures recorded.");
            }
            for s in &states {
                println!("{}: {}", s.state_id, s.reason);
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&state);
    }
    match state.next_retry_at {
        RetryAt::Paused => println!("{}: PAUSED. {}", state.state_id, state.reason),
        RetryAt::At { at } if state.consecutive_failures > 0 => println!(
            "{}: {} consecutive failure(s), next retry {}",
            state.state_id,
            state.consecutive_failures,
            fmt_time(at)
        ),
        RetryAt::At { .. } => println!("{}: healthy", state.state_id),
    }
    Ok(())
}
