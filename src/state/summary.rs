use crate::extract::Identity;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Why a harvest run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No pagination strategy could reach another page
    Exhausted,
    /// The configured page bound was reached
    MaxPages,
    /// The configured item limit was reached
    ItemLimit,
    /// The run was cancelled from outside
    Cancelled,
    /// The run stopped on a fatal error
    Failed,
}

impl ExitReason {
    /// Returns true if the run ended without an error
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exhausted | Self::MaxPages | Self::ItemLimit)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Exhausted => "listing exhausted",
            Self::MaxPages => "page bound reached",
            Self::ItemLimit => "item limit reached",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{}", text)
    }
}

/// Counters collected over one harvest run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run stopped (None while running)
    pub finished_at: Option<DateTime<Utc>>,

    /// Pages extracted in this run (replayed pages are not counted)
    pub pages_processed: u32,

    /// Last page whose output and checkpoint were flushed
    pub last_page: u32,

    /// Rows appended to the output
    pub items_written: usize,

    /// Items that failed enrichment, with the reason
    pub items_dropped: Vec<(Identity, String)>,

    /// Items skipped because their identity was already seen
    pub duplicates_skipped: usize,

    /// Why the run stopped
    pub exit: Option<ExitReason>,

    /// Highest number of pooled sessions busy at once
    pub peak_busy_sessions: usize,

    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            pages_processed: 0,
            last_page: 0,
            items_written: 0,
            items_dropped: Vec::new(),
            duplicates_skipped: 0,
            exit: None,
            peak_busy_sessions: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Records the end of the run
    pub fn finish(&mut self, exit: ExitReason) {
        let finished_at = Utc::now();
        self.elapsed = (finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.finished_at = Some(finished_at);
        self.exit = Some(exit);
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
