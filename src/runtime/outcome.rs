/// Step and run outcomes
///
/// Failure and skip propagation is driven by these explicit values: the
/// scheduler inspects upstream outcomes instead of catching errors.

use crate::error::ErrorInfo;
use crate::events::{EventType, Materialization, RunEvent};
use crate::runtime::RunId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a step never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A direct or transitive upstream step failed
    UpstreamFailed { failed_step: String },
    /// The run was cancelled before the step started
    RunCanceled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { failed_step } => write!(f, "upstream step '{}' failed", failed_step),
            Self::RunCanceled => write!(f, "run canceled"),
        }
    }
}

/// Terminal result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Success,
    Failure { error: ErrorInfo },
    Skipped { reason: SkipReason },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Scheduler-side state of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }
}

impl From<&StepOutcome> for StepState {
    fn from(outcome: &StepOutcome) -> Self {
        match outcome {
            StepOutcome::Success => Self::Success,
            StepOutcome::Failure { .. } => Self::Failure,
            StepOutcome::Skipped { .. } => Self::Skipped,
        }
    }
}

/// Aggregate terminal status of a run
///
/// Ordered from best to worst; the run reports the worst it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Canceled,
    Failure,
}

/// Everything a finished run reports back
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Outcome per step key
    pub outcomes: BTreeMap<String, StepOutcome>,
    /// The run's events as read back from the event log
    pub events: Vec<RunEvent>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn outcome(&self, step_key: &str) -> Option<&StepOutcome> {
        self.outcomes.get(step_key)
    }

    /// Events of one type, in log order
    pub fn events_of_type(&self, event_type: EventType) -> impl Iterator<Item = &RunEvent> {
        self.events.iter().filter(move |e| e.event_type() == event_type)
    }

    /// Materialization payloads, in log order
    pub fn materializations(&self) -> Vec<&Materialization> {
        self.events.iter().filter_map(RunEvent::materialization).collect()
    }

    /// Materialization events emitted by one step, in log order
    pub fn step_materializations(&self, step_key: &str) -> Vec<&Materialization> {
        self.events
            .iter()
            .filter(|e| e.step_key.as_deref() == Some(step_key))
            .filter_map(RunEvent::materialization)
            .collect()
    }
}
