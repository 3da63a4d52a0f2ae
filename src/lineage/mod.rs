/// Lineage Tracker
///
/// Derives the parent assets of a step's materializations by walking the
/// compiled plan backward from the step's inputs:
/// - An edge whose producing output resolved to an asset key yields a parent
/// - An edge from a lineage-transparent output is walked through, continuing
///   at the producing step's own inputs
/// - An input carrying an asset-key override yields that key and stops the walk
///
/// Each input is walked with an explicit stack and its own visited set of
/// producing outputs, so arbitrarily long transparent chains never grow the
/// call stack.

// Asset-level view over materialization events
pub mod asset_graph;

use crate::definition::asset::{AssetKey, AssetRelation, PartitionScope, PartitionSet};
use crate::definition::graph::OutputHandle;
use crate::definition::metadata::MetadataEntry;
use crate::definition::op::Output;
use crate::events::Materialization;
use crate::plan::resolver::ResolvedKeys;
use crate::plan::{ExecutionPlan, ExecutionStep, StepEdge, StepInput};
use std::collections::HashSet;

pub use asset_graph::{AssetGraph, AssetNode};

/// Parent asset found by the backward walk, before partition scoping
#[derive(Debug, Clone, PartialEq)]
pub struct ParentCandidate {
    pub asset_key: AssetKey,
    /// Producing output, or None for an input asset-key override
    pub origin: Option<OutputHandle>,
    /// Partitions of the parent consumed along the edge
    pub scope: PartitionScope,
    /// Partitions the parent output declares
    pub upstream_partitions: Option<PartitionSet>,
}

impl ParentCandidate {
    /// Relation to this parent for a materialization of `partition`
    ///
    /// A constrained edge narrows to the emitted partition when it consumes it.
    /// A constrained edge that does not consume the emitted partition keeps its
    /// whole subset: consumer and parent partitions need not share ids, and an
    /// empty relation would erase the dependency the edge records. An
    /// unconstrained edge narrows to the emitted partition only when the parent
    /// declares it.
    pub fn relation_for(&self, partition: Option<&str>) -> AssetRelation {
        let key = self.asset_key.clone();
        match (&self.scope, partition) {
            (PartitionScope::Subset(subset), Some(p)) if subset.contains(p) => {
                AssetRelation::with_partitions(key, PartitionSet::single(p))
            }
            (PartitionScope::Subset(subset), _) => AssetRelation::with_partitions(key, subset.clone()),
            (PartitionScope::All, Some(p))
                if self.upstream_partitions.as_ref().is_some_and(|declared| declared.contains(p)) =>
            {
                AssetRelation::with_partitions(key, PartitionSet::single(p))
            }
            (PartitionScope::All, _) => AssetRelation::new(key),
        }
    }
}

enum Frame<'a> {
    Edge(&'a StepEdge),
    Override(ParentCandidate),
}

/// Read-only lineage view over one run of a plan
#[derive(Debug)]
pub struct LineageTracker<'a> {
    plan: &'a ExecutionPlan,
    keys: &'a ResolvedKeys,
}

impl<'a> LineageTracker<'a> {
    pub fn new(plan: &'a ExecutionPlan, keys: &'a ResolvedKeys) -> Self {
        Self { plan, keys }
    }

    /// Parent candidates of `step`, in input declaration order
    ///
    /// Every input contributes its own parents, with its own partition scope.
    /// Within one input's walk an upstream output reached on several
    /// transparent paths contributes once. Distinct outputs resolving to
    /// structurally equal keys are kept apart.
    pub fn parents(&self, step: &'a ExecutionStep) -> Vec<ParentCandidate> {
        let mut parents = Vec::new();
        let mut visited: HashSet<&OutputHandle> = HashSet::new();
        let mut stack: Vec<Frame<'a>> = Vec::new();

        for input in &step.inputs {
            visited.clear();
            if let Some(frame) = Self::input_frame(input) {
                stack.push(frame);
            }
            while let Some(frame) = stack.pop() {
                let edge = match frame {
                    Frame::Override(candidate) => {
                        parents.push(candidate);
                        continue;
                    }
                    Frame::Edge(edge) => edge,
                };
                if !visited.insert(&edge.from) {
                    continue;
                }

                match self.keys.get(&edge.from).flatten() {
                    Some(asset_key) => parents.push(ParentCandidate {
                        asset_key,
                        origin: Some(edge.from.clone()),
                        scope: edge.scope.clone(),
                        upstream_partitions: edge.upstream_partitions.clone(),
                    }),
                    None => {
                        let Some(producer) = self.plan.step(&edge.from.op) else {
                            tracing::warn!("⚠️ Lineage walk reached unknown step '{}'", edge.from.op);
                            continue;
                        };
                        tracing::debug!("🔍 Walking through lineage-transparent output {}", edge.from);
                        // Reversed so the stack pops inputs in declared order
                        stack.extend(producer.inputs.iter().rev().filter_map(Self::input_frame));
                    }
                }
            }
        }

        parents
    }

    fn input_frame(input: &'a StepInput) -> Option<Frame<'a>> {
        match (&input.asset_key, &input.source) {
            (Some(asset_key), edge) => Some(Frame::Override(ParentCandidate {
                asset_key: asset_key.clone(),
                origin: None,
                scope: edge.as_ref().map(|e| e.scope.clone()).unwrap_or(PartitionScope::All),
                upstream_partitions: edge.as_ref().and_then(|e| e.upstream_partitions.clone()),
            })),
            (None, Some(edge)) => Some(Frame::Edge(edge)),
            (None, None) => None,
        }
    }
}

/// Materializations for one written output: one per declared partition, in
/// declared order, or a single unpartitioned one
pub fn materializations(
    step_key: &str,
    asset_key: &AssetKey,
    partitions: Option<&PartitionSet>,
    output: &Output,
    parents: &[ParentCandidate],
) -> Vec<Materialization> {
    for entry in &output.partition_metadata {
        let declared = partitions.is_some_and(|set| set.contains(&entry.partition));
        if !declared {
            tracing::warn!(
                "⚠️ Ignoring metadata '{}' for undeclared partition '{}' on {}.{}",
                entry.entry.label, entry.partition, step_key, output.name
            );
        }
    }

    let build = |partition: Option<&str>| Materialization {
        asset_key: asset_key.clone(),
        partition: partition.map(str::to_string),
        parents: parents.iter().map(|parent| parent.relation_for(partition)).collect(),
        metadata: merged_metadata(output, partition),
    };

    match partitions {
        Some(set) => set.iter().map(|p| build(Some(p))).collect(),
        None => vec![build(None)],
    }
}

/// Output metadata followed by the entries bound to `partition`
fn merged_metadata(output: &Output, partition: Option<&str>) -> Vec<MetadataEntry> {
    let mut entries = output.metadata.clone();
    if let Some(partition) = partition {
        entries.extend(
            output
                .partition_metadata
                .iter()
                .filter(|entry| entry.partition == partition)
                .map(|entry| entry.entry.clone()),
        );
    }
    entries
}
