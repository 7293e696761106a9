use crate::error::AirlockError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DataCategory
// ---------------------------------------------------------------------------

/// A class of regulatory data that is crawled on its own cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Fees,
    Deadlines,
    Regulations,
    DrawOdds,
}

impl DataCategory {
    pub fn all() -> &'static [DataCategory] {
        &[
            DataCategory::Fees,
            DataCategory::Deadlines,
            DataCategory::Regulations,
            DataCategory::DrawOdds,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Fees => "fees",
            DataCategory::Deadlines => "deadlines",
            DataCategory::Regulations => "regulations",
            DataCategory::DrawOdds => "draw_odds",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataCategory {
    type Err = AirlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fees" => Ok(DataCategory::Fees),
            "deadlines" => Ok(DataCategory::Deadlines),
            "regulations" => Ok(DataCategory::Regulations),
            "draw_odds" => Ok(DataCategory::DrawOdds),
            _ => Err(AirlockError::InvalidValue {
                kind: "data category",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// CrawlFrequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlFrequency {
    #[serde(rename = "6_hours")]
    SixHours,
    Daily,
    TwiceWeek,
    Weekly,
    /// No timer: the crawl waits for an external signal (a press release).
    OnTrigger,
}

impl CrawlFrequency {
    /// Interval until the next crawl. `None` for `OnTrigger`.
    pub fn interval(self) -> Option<Duration> {
        match self {
            CrawlFrequency::SixHours => Some(Duration::hours(6)),
            CrawlFrequency::Daily => Some(Duration::days(1)),
            // 3.5 days
            CrawlFrequency::TwiceWeek => Some(Duration::hours(84)),
            CrawlFrequency::Weekly => Some(Duration::days(7)),
            CrawlFrequency::OnTrigger => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CrawlFrequency::SixHours => "6_hours",
            CrawlFrequency::Daily => "daily",
            CrawlFrequency::TwiceWeek => "twice_week",
            CrawlFrequency::Weekly => "weekly",
            CrawlFrequency::OnTrigger => "on_trigger",
        }
    }
}

impl fmt::Display for CrawlFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Classification of one detected change. Ordered so that `max()` over a
/// set of diffs yields the aggregate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pass,
    Warn,
    Block,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Pass => "pass",
            Severity::Warn => "warn",
            Severity::Block => "block",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an evaluated batch.
///
/// Transitions: `AutoApproved` (terminal), `Quarantined → Approved | Rejected`.
/// A batch without a queue record is implicitly still in staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    AutoApproved,
    Quarantined,
    Approved,
    Rejected,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::AutoApproved => "auto_approved",
            QueueStatus::Quarantined => "quarantined",
            QueueStatus::Approved => "approved",
            QueueStatus::Rejected => "rejected",
        }
    }

    /// True once the batch's data has reached the production baseline.
    pub fn is_promoted(self) -> bool {
        matches!(self, QueueStatus::AutoApproved | QueueStatus::Approved)
    }

    /// Check a human resolution of a batch currently in `self`.
    ///
    /// Returns `Ok(true)` when the status changes, `Ok(false)` when the batch
    /// is already where the caller wants it (promote and reject are
    /// idempotent), and an error for transitions the lifecycle forbids.
    pub fn check_transition(self, to: QueueStatus) -> Result<bool, AirlockError> {
        let invalid = |reason: &str| AirlockError::InvalidTransition {
            from: self.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: reason.to_string(),
        };
        match (self, to) {
            (_, QueueStatus::AutoApproved | QueueStatus::Quarantined) => {
                Err(invalid("only evaluation assigns this status"))
            }
            (QueueStatus::Quarantined, _) => Ok(true),
            (from, to) if from == to => Ok(false),
            (QueueStatus::AutoApproved, QueueStatus::Approved) => Ok(false),
            (QueueStatus::AutoApproved | QueueStatus::Approved, QueueStatus::Rejected) => {
                Err(invalid("batch is already in production"))
            }
            (QueueStatus::Rejected, _) => Err(invalid("batch was rejected")),
            _ => Err(invalid("unsupported transition")),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = AirlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_approved" => Ok(QueueStatus::AutoApproved),
            "quarantined" => Ok(QueueStatus::Quarantined),
            "approved" => Ok(QueueStatus::Approved),
            "rejected" => Ok(QueueStatus::Rejected),
            _ => Err(AirlockError::InvalidValue {
                kind: "queue status",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RowStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Staging,
    Approved,
    Rejected,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Staging => "staging",
            RowStatus::Approved => "approved",
            RowStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
