/// Assetflow: data-pipeline orchestration core
///
/// This library compiles op graphs into execution plans, runs their steps
/// concurrently with failure isolation, and derives asset lineage into an
/// append-only event log.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by compiler and runtime
pub mod error;

// Tracing subscriber initialization
pub mod logging;

// Definition model - ops, inputs/outputs, graph wiring
pub mod definition;

// IO manager boundary and the default in-memory IO manager
pub mod io;

// Execution plan compiler, asset key resolver and job registry
pub mod plan;

// Lineage tracker - parent derivation and partition fan-out
pub mod lineage;

// Run events and the append-only event log
pub mod events;

// Runtime execution engine - concurrent step scheduling
pub mod runtime;

// Re-export commonly used types for external consumers
pub use config::{Config, ExecutorConfig, LoggingConfig};
pub use definition::{
    AssetKey, AssetRelation, Graph, InputDefinition, MetadataEntry, MetadataValue, OpContext, OpDefinition, Output,
    OutputDefinition, OutputHandle, PartitionSet,
};
pub use error::{Error, ErrorInfo, ErrorKind, Result};
pub use events::{EventFilter, EventKind, EventLog, EventType, InMemoryEventLog, Materialization, RunEvent};
pub use io::{InMemoryIoManager, InputContext, IoManager, OutputContext};
pub use lineage::AssetGraph;
pub use plan::registry::JobRegistry;
pub use plan::{ExecutionPlan, Resources};
pub use runtime::{ExecutionEngine, RunCanceller, RunId, RunOptions, RunResult, RunStatus, SkipReason, StepOutcome};
