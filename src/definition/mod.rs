/// Definition Model
///
/// Immutable description of ops, their inputs and outputs, and the wiring
/// that composes op instances into a graph. Builders validate at
/// construction time and fail with ConfigurationError; nothing here runs.

// Asset keys, partition sets and asset relations
pub mod asset;

// Op graph composition and validation
pub mod graph;

// Typed metadata entries attached to outputs
pub mod metadata;

// Op, input and output definitions
pub mod op;

// Re-export main types
pub use asset::{AssetKey, AssetRelation, PartitionScope, PartitionSet};
pub use graph::{Graph, GraphBuilder, InputHandle, OpInstance, OutputHandle, Wire};
pub use metadata::{MetadataEntry, MetadataValue, PartitionMetadataEntry};
pub use op::{
    InputDefinition, InputValues, LineageSource, OpCompute, OpContext, OpDefinition, OpDefinitionBuilder, Output,
    OutputDefinition,
};
