use std::fmt;

use async_trait::async_trait;
use chatline_types::ChatEvent;

use crate::error::PipelineResult;

// ---------------------------------------------------------------------------
// ProcessingOutcome
// ---------------------------------------------------------------------------

/// What happened when one stage saw one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The stage did its work.
    Processed,
    /// The guard had already seen this event; the stage did not run.
    SkippedDuplicate,
    /// The event is not for this stage.
    SkippedNotApplicable,
    /// The stage errored; the event must be processed again.
    Failed(String),
}

impl ProcessingOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the event should be remembered as handled.
    pub fn marks_guard(&self) -> bool {
        matches!(self, Self::Processed | Self::SkippedNotApplicable)
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => f.write_str("processed"),
            Self::SkippedDuplicate => f.write_str("skipped (duplicate)"),
            Self::SkippedNotApplicable => f.write_str("skipped (not applicable)"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One consumer of inserted chat events.
///
/// The dispatcher hands every decoded event to every stage, in registration
/// order, behind a per-stage idempotency guard. Returning `Err` leaves the
/// guard unmarked so the event is processed again on redelivery.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name, used in reports and logs.
    fn name(&self) -> &str;

    async fn process(&self, event: &ChatEvent) -> PipelineResult<ProcessingOutcome>;
}
