//! Deadline-aware crawl scheduling.
//!
//! Priority depends on how close each state's next deadline is, which
//! changes daily without any external event. The schedule is therefore
//! recomputed on a fixed cadence (hourly) rather than once.

use crate::backoff::{BackoffState, RetryAt};
use crate::config::SchedulerConfig;
use crate::types::{CrawlFrequency, DataCategory};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Deadline context for one state, supplied by the external orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDeadlineContext {
    pub state_id: String,
    #[serde(default)]
    pub closest_deadline: Option<NaiveDate>,
    #[serde(default)]
    pub window_open: bool,
    #[serde(default)]
    pub days_until_deadline: Option<i64>,
    #[serde(default)]
    pub source_urls: BTreeMap<DataCategory, String>,
    /// Used for any category without its own entry in `source_urls`.
    #[serde(default)]
    pub default_url: Option<String>,
}

impl StateDeadlineContext {
    pub fn url_for(&self, category: DataCategory) -> Option<&str> {
        self.source_urls
            .get(&category)
            .or(self.default_url.as_ref())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// When a task should next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextCrawl {
    At { at: DateTime<Utc> },
    /// No timer: wait for an external signal.
    AwaitTrigger,
    /// The state's crawler is paused after repeated failures.
    Paused,
}

impl NextCrawl {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            NextCrawl::At { at } => Some(*at),
            NextCrawl::AwaitTrigger | NextCrawl::Paused => None,
        }
    }

    fn sort_key(&self) -> (u8, Option<DateTime<Utc>>) {
        match self {
            NextCrawl::At { at } => (0, Some(*at)),
            NextCrawl::AwaitTrigger => (1, None),
            NextCrawl::Paused => (2, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    /// `"{state_id}/{category}"`, stable across runs.
    pub id: String,
    pub state_id: String,
    pub category: DataCategory,
    pub frequency: CrawlFrequency,
    pub next_crawl_at: NextCrawl,
    pub reason: String,
    /// 1 (most urgent) to 5.
    pub priority: u8,
    pub target_url: Option<String>,
    pub in_backoff: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSchedule {
    pub generated_at: DateTime<Utc>,
    pub tasks: Vec<CrawlTask>,
    /// First task with a concrete timer.
    pub next_due: Option<CrawlTask>,
}

/// A task whose frequency differs from the previous scheduling pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyChange {
    pub state_id: String,
    pub category: DataCategory,
    pub from: CrawlFrequency,
    pub to: CrawlFrequency,
    pub reason: String,
}

pub fn task_id(state_id: &str, category: DataCategory) -> String {
    format!("{state_id}/{category}")
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Decide `(frequency, reason, priority)` for one state and category.
pub fn plan(
    category: DataCategory,
    ctx: &StateDeadlineContext,
    config: &SchedulerConfig,
) -> (CrawlFrequency, String, u8) {
    let window = config.deadline_window_days;
    match category {
        DataCategory::DrawOdds => (
            CrawlFrequency::OnTrigger,
            "draw odds publish with results; waiting for press release".to_string(),
            5,
        ),
        DataCategory::Fees | DataCategory::Regulations => match ctx.days_until_deadline {
            Some(days) if (0..=window).contains(&days) => (
                CrawlFrequency::Daily,
                format!("deadline in {days} days; verifying {category} daily"),
                2,
            ),
            _ => (
                CrawlFrequency::Weekly,
                format!("no deadline within {window} days"),
                4,
            ),
        },
        DataCategory::Deadlines => match ctx.days_until_deadline {
            None => (
                CrawlFrequency::Weekly,
                "no deadline data; weekly discovery crawl".to_string(),
                4,
            ),
            Some(days) if days <= 0 => (
                CrawlFrequency::Weekly,
                "deadline passed; watching for next cycle".to_string(),
                5,
            ),
            Some(days) if days <= 2 => (
                CrawlFrequency::SixHours,
                format!("deadline in {days} days; watching for last-minute extensions"),
                1,
            ),
            Some(days) if days <= 7 => (
                CrawlFrequency::TwiceWeek,
                format!("deadline in {days} days"),
                2,
            ),
            Some(days) if days <= window => (
                CrawlFrequency::Daily,
                format!("deadline in {days} days"),
                2,
            ),
            Some(days) => (
                CrawlFrequency::Weekly,
                format!("deadline in {days} days; outside the {window}-day window"),
                4,
            ),
        },
    }
}

// ---------------------------------------------------------------------------
// Scheduling pass
// ---------------------------------------------------------------------------

/// Build the prioritized schedule for every `(state, category)` pair.
///
/// `backoff` holds the current backoff state per state id. A crawler in
/// backoff is retried at its backoff time; a paused crawler keeps its task
/// in the schedule with the `Paused` sentinel.
pub fn build_schedule(
    contexts: &[StateDeadlineContext],
    config: &SchedulerConfig,
    backoff: &HashMap<String, BackoffState>,
    now: DateTime<Utc>,
) -> CrawlSchedule {
    let mut tasks = Vec::with_capacity(contexts.len() * config.categories.len());

    for ctx in contexts {
        let state_backoff = backoff.get(&ctx.state_id);
        for &category in &config.categories {
            let (frequency, mut reason, priority) = plan(category, ctx, config);

            let mut next_crawl_at = match frequency.interval() {
                Some(interval) => NextCrawl::At { at: now + interval },
                None => NextCrawl::AwaitTrigger,
            };

            let mut in_backoff = false;
            let mut consecutive_failures = 0;
            if let Some(b) = state_backoff {
                consecutive_failures = b.consecutive_failures;
                match b.next_retry_at {
                    RetryAt::Paused => {
                        next_crawl_at = NextCrawl::Paused;
                        reason = format!("{reason} ({})", b.reason);
                    }
                    RetryAt::At { at } if b.in_backoff() => {
                        in_backoff = true;
                        if next_crawl_at != NextCrawl::AwaitTrigger {
                            next_crawl_at = NextCrawl::At { at };
                        }
                        reason = format!("{reason} ({})", b.reason);
                    }
                    RetryAt::At { .. } => {}
                }
            }

            tasks.push(CrawlTask {
                id: task_id(&ctx.state_id, category),
                state_id: ctx.state_id.clone(),
                category,
                frequency,
                next_crawl_at,
                reason,
                priority,
                target_url: ctx.url_for(category).map(str::to_string),
                in_backoff,
                consecutive_failures,
            });
        }
    }

    tasks.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.next_crawl_at.sort_key().cmp(&b.next_crawl_at.sort_key()))
            .then_with(|| a.state_id.cmp(&b.state_id))
            .then_with(|| a.category.cmp(&b.category))
    });

    let next_due = tasks
        .iter()
        .find(|t| matches!(t.next_crawl_at, NextCrawl::At { .. }))
        .cloned();

    debug!(tasks = tasks.len(), "crawl schedule built");

    CrawlSchedule {
        generated_at: now,
        tasks,
        next_due,
    }
}

/// Compare a fresh schedule against the frequencies used last pass.
/// Tasks seen for the first time are not reported.
pub fn frequency_changes(
    previous: &HashMap<String, CrawlFrequency>,
    schedule: &CrawlSchedule,
) -> Vec<FrequencyChange> {
    schedule
        .tasks
        .iter()
        .filter_map(|task| {
            let from = *previous.get(&task.id)?;
            (from != task.frequency).then(|| FrequencyChange {
                state_id: task.state_id.clone(),
                category: task.category,
                from,
                to: task.frequency,
                reason: task.reason.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
