//! Exponential backoff for failing crawlers.
//!
//! The controller is stateless per call: callers persist the failure count
//! (see [`BackoffRecord`]) and reset it to zero on any successful crawl.

use crate::config::BackoffPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// When the next crawl attempt may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryAt {
    At { at: DateTime<Utc> },
    /// No automatic retry; a human must investigate the source.
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffState {
    pub state_id: String,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_retry_at: RetryAt,
    /// Delay before the next retry in milliseconds. `None` means infinite
    /// (the crawler is paused).
    pub current_delay_ms: Option<u64>,
    pub paused: bool,
    pub reason: String,
}

impl BackoffState {
    pub fn in_backoff(&self) -> bool {
        self.consecutive_failures > 0 && !self.paused
    }
}

/// Persisted failure counter for one state's crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffRecord {
    pub state_id: String,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl BackoffRecord {
    pub fn new(state_id: impl Into<String>) -> Self {
        Self {
            state_id: state_id.into(),
            consecutive_failures: 0,
            last_failure_at: None,
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Backoff state as of the last failure (or `now` when healthy).
    pub fn state(&self, policy: &BackoffPolicy, now: DateTime<Utc>) -> BackoffState {
        let anchor = self.last_failure_at.unwrap_or(now);
        let mut state = compute(&self.state_id, self.consecutive_failures, anchor, policy);
        state.last_failure_at = self.last_failure_at;
        state
    }
}

/// Delay for the n-th consecutive failure: `base * 2^(n-1)`, capped.
pub fn delay_for(failures: u32, policy: &BackoffPolicy) -> Duration {
    if failures == 0 {
        return Duration::zero();
    }
    let cap_minutes = policy.max_delay_hours.saturating_mul(60);
    let exponent = (failures - 1).min(30);
    let minutes = policy
        .base_delay_minutes
        .saturating_mul(1_i64 << exponent)
        .min(cap_minutes);
    Duration::minutes(minutes)
}

/// Compute the backoff state for `consecutive_failures` failures, the most
/// recent of which happened at `now`.
pub fn compute(
    state_id: &str,
    consecutive_failures: u32,
    now: DateTime<Utc>,
    policy: &BackoffPolicy,
) -> BackoffState {
    if consecutive_failures == 0 {
        return BackoffState {
            state_id: state_id.to_string(),
            consecutive_failures: 0,
            last_failure_at: None,
            next_retry_at: RetryAt::At { at: now },
            current_delay_ms: Some(0),
            paused: false,
            reason: "healthy".to_string(),
        };
    }

    if consecutive_failures >= policy.pause_after_failures {
        return BackoffState {
            state_id: state_id.to_string(),
            consecutive_failures,
            last_failure_at: Some(now),
            next_retry_at: RetryAt::Paused,
            current_delay_ms: None,
            paused: true,
            reason: format!(
                "paused after {consecutive_failures} consecutive failures: \
                 manual investigation required"
            ),
        };
    }

    let delay = delay_for(consecutive_failures, policy);
    BackoffState {
        state_id: state_id.to_string(),
        consecutive_failures,
        last_failure_at: Some(now),
        next_retry_at: RetryAt::At { at: now + delay },
        current_delay_ms: Some(delay.num_milliseconds().max(0) as u64),
        paused: false,
        reason: format!(
            "{consecutive_failures} consecutive {}, retrying in {} minutes",
            if consecutive_failures == 1 { "failure" } else { "failures" },
            delay.num_minutes()
        ),
    }
}
