//! Terminal output utilities.
//!
//! Formatting helpers plus the end-of-run reconciliation summary.

use crate::models::{CheckResult, StageName};
use crate::processing::{JournalEntry, Outcome};
use colored::Colorize;
use itertools::Itertools;

/// Format a value as a quoted, right-aligned field.
///
/// # Arguments
/// * `value` - The value to format
/// * `width` - The minimum width of the field
///
/// # Returns
/// A quoted, right-aligned string
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let value_str = value.to_string();
    let quoted = format!("\"{value_str}\"");
    let quoted_len = quoted.len();

    if quoted_len >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

fn colour_outcome(outcome: Outcome) -> String {
    let text = format!("{outcome:>9}");
    match outcome {
        Outcome::Created => text.green().to_string(),
        Outcome::Updated => text.cyan().to_string(),
        Outcome::Adopted => text.yellow().to_string(),
        Outcome::NoOp => text.dimmed().to_string(),
    }
}

/// One line per reconciled resource, then a count per outcome.
pub fn render_summary(stage: StageName, journal: &[JournalEntry]) -> String {
    let mut lines = vec![format!("== {stage}: {} resource(s) ==", journal.len()).bold().to_string()];
    for entry in journal {
        let mut line = format!(
            "{} {} {}",
            colour_outcome(entry.outcome),
            format_field(entry.kind, 14),
            format_field(&entry.id, 40)
        );
        if let Some(note) = &entry.note {
            line.push_str(&format!("  ({note})"));
        }
        lines.push(line);
    }
    let counts = journal
        .iter()
        .map(|e| e.outcome.to_string())
        .sorted()
        .dedup_with_count()
        .map(|(n, outcome)| format!("{outcome}={n}"))
        .join(", ");
    lines.push(format!("totals: {counts}"));
    lines.join("\n")
}

pub fn render_checks(checks: &[CheckResult]) -> String {
    checks
        .iter()
        .map(|c| {
            let mark = if c.passed { "PASS".green() } else { "WARN".yellow() };
            format!("{mark} {} {}", format_field(&c.name, 24), c.detail)
        })
        .join("\n")
}

pub fn print_summary(stage: StageName, journal: &[JournalEntry]) {
    println!("{}", render_summary(stage, journal));
}
