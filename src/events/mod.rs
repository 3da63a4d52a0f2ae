/// Run events
///
/// Every step transition and every materialized asset partition becomes one
/// `RunEvent`. Events are immutable once created and are appended to an
/// [`EventLog`] in the order they happen within a step.

// Append-only event log capability and in-memory implementation
pub mod log;

use crate::definition::asset::{AssetKey, AssetRelation};
use crate::definition::metadata::MetadataEntry;
use crate::error::ErrorInfo;
use crate::runtime::outcome::SkipReason;
use crate::runtime::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use log::{EventFilter, EventLog, InMemoryEventLog};

/// Discriminant of a [`RunEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunStart,
    RunSuccess,
    RunFailure,
    RunCanceled,
    StepStart,
    StepSuccess,
    StepFailure,
    StepSkipped,
    StepMaterialization,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "RUN_START",
            Self::RunSuccess => "RUN_SUCCESS",
            Self::RunFailure => "RUN_FAILURE",
            Self::RunCanceled => "RUN_CANCELED",
            Self::StepStart => "STEP_START",
            Self::StepSuccess => "STEP_SUCCESS",
            Self::StepFailure => "STEP_FAILURE",
            Self::StepSkipped => "STEP_SKIPPED",
            Self::StepMaterialization => "STEP_MATERIALIZATION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assertion that an asset (partition) was produced, with its parents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materialization {
    pub asset_key: AssetKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Parent assets in collection order
    pub parents: Vec<AssetRelation>,
    /// Output metadata followed by the partition's own entries
    pub metadata: Vec<MetadataEntry>,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RunStart { plan: String, step_count: usize },
    RunSuccess,
    RunFailure { failed_steps: Vec<String> },
    RunCanceled,
    StepStart,
    StepSuccess { duration_ms: u64 },
    StepFailure { error: ErrorInfo },
    StepSkipped { reason: SkipReason },
    StepMaterialization(Materialization),
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStart { .. } => EventType::RunStart,
            Self::RunSuccess => EventType::RunSuccess,
            Self::RunFailure { .. } => EventType::RunFailure,
            Self::RunCanceled => EventType::RunCanceled,
            Self::StepStart => EventType::StepStart,
            Self::StepSuccess { .. } => EventType::StepSuccess,
            Self::StepFailure { .. } => EventType::StepFailure,
            Self::StepSkipped { .. } => EventType::StepSkipped,
            Self::StepMaterialization(_) => EventType::StepMaterialization,
        }
    }
}

/// One entry of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    /// None for run-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RunEvent {
    /// Run-level event stamped now
    pub fn run(run_id: RunId, kind: EventKind) -> Self {
        Self {
            run_id,
            step_key: None,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Step-level event stamped now
    pub fn step(run_id: RunId, step_key: impl Into<String>, kind: EventKind) -> Self {
        Self {
            run_id,
            step_key: Some(step_key.into()),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn materialization(&self) -> Option<&Materialization> {
        match &self.kind {
            EventKind::StepMaterialization(m) => Some(m),
            _ => None,
        }
    }

    /// Partition id of a materialization event
    pub fn partition(&self) -> Option<&str> {
        self.materialization().and_then(|m| m.partition.as_deref())
    }
}
