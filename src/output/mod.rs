//! Output module for reporting cycle progress
//!
//! This module handles:
//! - Summarizing what an invocation did
//! - Loading and printing cycle statistics for `--stats`

pub mod stats;

pub use stats::{load_statistics, print_statistics, CycleStatistics};

use crate::build::InvocationOutcome;
use crate::state::Phase;

/// Builds a one-line summary of an invocation
pub fn summarize_outcome(outcome: &InvocationOutcome) -> String {
    let detail = match outcome.phase {
        Phase::Fetching => match &outcome.fetch {
            Some(report) => format!(
                "{} queries, {} unexpected errors, {} splits, {} demoted, {} not found",
                report.queries,
                report.unexpected_errors,
                report.batches_split,
                report.names_demoted,
                report.not_found.len()
            ),
            None => String::new(),
        },
        Phase::Merging => format!(
            "{} entries, {} cross-shard duplicates",
            outcome.merged_entries.unwrap_or(0),
            outcome.merge_duplicates.len()
        ),
        Phase::Init | Phase::Publishing | Phase::Done => String::new(),
    };

    if detail.is_empty() {
        format!(
            "cycle {}: {} done, next {}",
            outcome.cycle, outcome.phase, outcome.next_phase
        )
    } else {
        format!(
            "cycle {}: {} done ({}), next {}",
            outcome.cycle, outcome.phase, detail, outcome.next_phase
        )
    }
}
