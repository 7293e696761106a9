use crate::output::print_json;
use airlock_core::freshness::{self, VerificationMethod};
use chrono::{DateTime, Utc};

pub fn run(
    state: &str,
    field: &str,
    verified_at: DateTime<Utc>,
    source_url: &str,
    method: VerificationMethod,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let stamp = freshness::stamp(state, field, verified_at, source_url, method, now);
    if json {
        return print_json(&stamp);
    }
    println!("{} {}: {}", stamp.state_id, stamp.field, stamp.freshness_label);
    Ok(())
}
