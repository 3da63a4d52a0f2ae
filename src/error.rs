/// Error taxonomy for plan compilation and run execution
///
/// Compile-time defects surface as `Configuration` and abort before any step runs.
/// Everything else is raised inside a single step and is recorded on that step's
/// STEP_FAILURE event instead of crashing the scheduler.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// The result type used throughout assetflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the definition model, compiler and executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Static defect in the graph or its resource bindings.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description naming the offending op/output.
        message: String,
    },

    /// A context resolver or IO-manager delegation failed while resolving an asset key.
    #[error("asset key resolution failed for {step_key}.{output}: {source}")]
    Resolution {
        /// Step that owns the output.
        step_key: String,
        /// Output being resolved.
        output: String,
        /// Underlying failure reported by the resolver.
        #[source]
        source: anyhow::Error,
    },

    /// The op's own computation failed.
    #[error("step '{step_key}' failed: {source}")]
    StepExecution {
        /// Failing step.
        step_key: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// An IO manager `write` or `read` call failed.
    #[error("io manager {operation} failed in step '{step_key}' for output {output}: {source}")]
    IoManager {
        /// Step that issued the call.
        step_key: String,
        /// `write` or `read`.
        operation: IoOperation,
        /// Handle (`op.output`) of the output written, or of the upstream output read.
        output: String,
        /// Underlying failure reported by the IO manager.
        #[source]
        source: anyhow::Error,
    },

    /// The event log rejected an append or query.
    #[error("event log error: {message}")]
    EventLog {
        /// Description of the failure.
        message: String,
    },

    /// Scheduler internal fault (lost worker task, poisoned state).
    #[error("engine error: {message}")]
    Engine {
        /// Description of the failure.
        message: String,
    },
}

/// IO manager capability that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoOperation {
    /// Persisting an output value.
    Write,
    /// Loading an input value.
    Read,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Serializable discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// See [`Error::Configuration`].
    Configuration,
    /// See [`Error::Resolution`].
    Resolution,
    /// See [`Error::StepExecution`].
    StepExecution,
    /// See [`Error::IoManager`].
    IoManager,
    /// See [`Error::EventLog`].
    EventLog,
    /// See [`Error::Engine`].
    Engine,
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new event log error.
    #[must_use]
    pub fn event_log(message: impl Into<String>) -> Self {
        Self::EventLog {
            message: message.into(),
        }
    }

    /// Creates a new engine error.
    #[must_use]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Returns the serializable discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::StepExecution { .. } => ErrorKind::StepExecution,
            Self::IoManager { .. } => ErrorKind::IoManager,
            Self::EventLog { .. } => ErrorKind::EventLog,
            Self::Engine { .. } => ErrorKind::Engine,
        }
    }

    /// Returns true for static defects that must abort a run before it starts.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Error detail retained on STEP_FAILURE events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error category.
    pub kind: ErrorKind,
    /// Top-level message.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    pub causes: Vec<String>,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        let mut causes = Vec::new();
        let mut current = std::error::Error::source(err);
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }
        Self {
            kind: err.kind(),
            message: err.to_string(),
            causes,
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Run a plugin call, turning a panic into an ordinary error
///
/// Ops, resolvers and IO managers are foreign code; a panic in any of them
/// must fail only the step that made the call.
pub(crate) fn catch_panic<T>(call: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))))
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
