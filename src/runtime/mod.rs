/// Run Execution Runtime
///
/// This module runs compiled execution plans. It handles:
/// - Dependency-ordered, concurrent scheduling of steps
/// - Failure isolation and skip propagation to dependents
/// - Per-step input loading, output writes and lineage emission
/// - Run-level cancellation

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Run-level cancellation signal
pub mod cancel;

// Concurrent scheduler driving a plan to completion
pub mod engine;

// Single step execution: inputs, compute, writes, lineage
pub mod executor;

// Step and run outcome types
pub mod outcome;

// Re-export main types
pub use cancel::{CancellationFlag, RunCanceller};
pub use engine::{ExecutionEngine, RunOptions};
pub use outcome::{RunResult, RunStatus, SkipReason, StepOutcome};

/// Identifier of one run of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Fresh random run id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
