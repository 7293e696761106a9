use crate::output::{print_json, print_table, severity_tag};
use airlock_core::airlock::AirlockVerdict;
use airlock_core::pipeline::{EvaluationOutcome, Pipeline};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;

pub fn run(
    root: &Path,
    state: &str,
    batch: &str,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root).context("failed to open airlock")?;
    let outcome = pipeline
        .evaluate_batch(state, batch, now)
        .with_context(|| format!("failed to evaluate batch '{batch}'"))?;

    if json {
        return print_json(&outcome);
    }

    let entry = outcome.entry();
    match &outcome {
        EvaluationOutcome::Evaluated { .. } => {
            println!("Batch '{batch}' evaluated: {}", entry.status)
        }
        EvaluationOutcome::AlreadyEvaluated { .. } => {
            println!("Batch '{batch}' was already evaluated: {}", entry.status)
        }
    }
    print_verdict(&entry.verdict);
    Ok(())
}

/// Human rendering of a verdict, shared by `evaluate` and `diff`.
pub fn print_verdict(verdict: &AirlockVerdict) {
    println!("{}", verdict.summary);
    let rows: Vec<Vec<String>> = verdict
        .diffs
        .iter()
        .map(|d| {
            vec![
                severity_tag(d.severity).to_string(),
                d.category.to_string(),
                d.label.clone(),
                d.change_description.clone(),
            ]
        })
        .collect();
    if !rows.is_empty() {
        println!();
        print_table(&["SEVERITY", "CATEGORY", "FIELD", "CHANGE"], &rows);
    }
    if let Some(action) = &verdict.required_action {
        println!();
        println!("Action: {action}");
    }
}
