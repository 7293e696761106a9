use airlock_core::types::Severity;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Left-aligned columns sized to the widest cell.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    println!("{}", format_row(headers.iter().copied(), &widths));
    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));
    for row in rows {
        println!("{}", format_row(row.iter().map(String::as_str), &widths));
    }
}

fn format_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

pub fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Pass => "PASS",
        Severity::Warn => "WARN",
        Severity::Block => "BLOCK",
    }
}

pub fn fmt_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}
