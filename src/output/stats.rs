//! Run summary display
//!
//! This module formats the counters collected during a harvest run for the
//! terminal.

use crate::state::RunSummary;
use crate::storage::Checkpoint;
use std::fmt::Write;

/// Maximum number of dropped identities listed individually
const MAX_DROPPED_SHOWN: usize = 20;

/// Renders a run summary as plain text
///
/// # Arguments
///
/// * `summary` - The counters of a finished (or failed) run
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let exit = summary
        .exit
        .map(|e| e.to_string())
        .unwrap_or_else(|| "running".to_string());

    // Writing to a String cannot fail
    let _ = writeln!(out, "=== Harvest Summary ===\n");
    let _ = writeln!(out, "Exit: {}", exit);
    let _ = writeln!(out, "  Started: {}", summary.started_at.to_rfc3339());
    if let Some(finished) = summary.finished_at {
        let _ = writeln!(out, "  Finished: {}", finished.to_rfc3339());
    }
    let _ = writeln!(out, "  Duration: {:.1}s", summary.elapsed.as_secs_f64());
    let _ = writeln!(out);

    let _ = writeln!(out, "Pages:");
    let _ = writeln!(out, "  Processed this run: {}", summary.pages_processed);
    let _ = writeln!(out, "  Last flushed page: {}", summary.last_page);
    let _ = writeln!(out);

    let _ = writeln!(out, "Items:");
    let _ = writeln!(out, "  Written: {}", summary.items_written);
    let _ = writeln!(out, "  Dropped: {}", summary.items_dropped.len());
    let _ = writeln!(out, "  Duplicates skipped: {}", summary.duplicates_skipped);
    let _ = writeln!(out, "  Peak busy sessions: {}", summary.peak_busy_sessions);

    if !summary.items_dropped.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Dropped Items ({}):", summary.items_dropped.len());
        for (identity, reason) in summary.items_dropped.iter().take(MAX_DROPPED_SHOWN) {
            let _ = writeln!(out, "  - {}: {}", identity, reason);
        }
        if summary.items_dropped.len() > MAX_DROPPED_SHOWN {
            let _ = writeln!(
                out,
                "  ... and {} more",
                summary.items_dropped.len() - MAX_DROPPED_SHOWN
            );
        }
    }

    out
}

/// Prints a run summary to stdout
pub fn print_summary(summary: &RunSummary) {
    print!("{}", format_summary(summary));
}

/// Prints a saved checkpoint to stdout
pub fn print_checkpoint(checkpoint: &Checkpoint) {
    println!("=== Checkpoint ===\n");
    println!("  Last flushed page: {}", checkpoint.last_page);
    println!(
        "  Processed identities: {}",
        checkpoint.processed_identities.len()
    );
    if let Some(saved_at) = checkpoint.saved_at {
        println!("  Saved at: {}", saved_at.to_rfc3339());
    }
    if let Some(fingerprint) = &checkpoint.fingerprint {
        println!("  Search fingerprint: {}", fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Identity;
    use crate::state::ExitReason;

    #[test]
    fn test_format_summary() {
        let mut summary = RunSummary::new();
        summary.pages_processed = 3;
        summary.last_page = 3;
        summary.items_written = 42;
        summary.items_dropped = vec![(
            Identity::new("https://example.com/firm/9"),
            "timed out".to_string(),
        )];
        summary.finish(ExitReason::Exhausted);

        let text = format_summary(&summary);
        assert!(text.contains("Exit: listing exhausted"));
        assert!(text.contains("Written: 42"));
        assert!(text.contains("Dropped: 1"));
        assert!(text.contains("https://example.com/firm/9: timed out"));
    }

    #[test]
    fn test_dropped_list_is_truncated() {
        let mut summary = RunSummary::new();
        summary.items_dropped = (0..25)
            .map(|i| (Identity::new(format!("https://example.com/{}", i)), "x".to_string()))
            .collect();

        let text = format_summary(&summary);
        assert!(text.contains("... and 5 more"));
        assert!(text.contains("Exit: running"));
    }
}
