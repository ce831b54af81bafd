/// Run state definitions for the harvest loop
///
/// This module defines every state a harvest run passes through and which
/// transitions between them are legal.
use std::fmt;

/// Represents the current state of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    // ===== Active States =====
    /// Loading the checkpoint, building the pool and opening the listing
    Init,

    /// Replaying pagination up to the last flushed page
    NavigateToCheckpoint,

    /// Extracting, enriching and persisting the current page
    ProcessPage,

    /// Moving the listing to the next page
    Advance,

    // ===== Terminal States =====
    /// The run stopped normally (exhausted, page bound or item limit)
    Done,

    /// The run stopped on a fatal error; the checkpoint is left in place
    Failed,
}

impl RunState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// Any active state may fail. Terminal states never transition.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;

        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, NavigateToCheckpoint) => true,
            (NavigateToCheckpoint, ProcessPage) => true,
            (ProcessPage, Advance) => true,
            (Advance, ProcessPage | Done) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::NavigateToCheckpoint => "navigate_to_checkpoint",
            Self::ProcessPage => "process_page",
            Self::Advance => "advance",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
