/// Execution Plan Compiler
///
/// Lowers a validated op graph plus resource bindings into physical steps:
/// - Topologically ordered steps (one per op instance)
/// - Resolved IO-manager binding and lineage source per output
/// - Inbound edges carrying the consumer's partition constraint
///
/// Every static defect is reported here, before any step runs.

// Hot-reload registry of compiled jobs
pub mod registry;

// Runtime asset key resolution for compiled outputs
pub mod resolver;

use crate::definition::asset::{AssetKey, PartitionScope, PartitionSet};
use crate::definition::graph::{Graph, InputHandle, OpInstance, OutputHandle};
use crate::definition::op::{LineageSource, DEFAULT_IO_MANAGER_KEY};
use crate::error::{Error, Result};
use crate::io::{InMemoryIoManager, IoManager, IoManagerHandle};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Binding tables supplied by the resource-resolution collaborator
///
/// - IO-manager key → IO manager instance
/// - Output → IO-manager key overrides (otherwise the output definition's key is used)
#[derive(Debug, Clone)]
pub struct Resources {
    io_managers: BTreeMap<String, IoManagerHandle>,
    output_bindings: HashMap<OutputHandle, String>,
}

impl Default for Resources {
    /// Bindings with the in-memory IO manager under the default key
    fn default() -> Self {
        Self::empty().io_manager(DEFAULT_IO_MANAGER_KEY, Arc::new(InMemoryIoManager::new()))
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings without any IO manager, not even the default one
    pub fn empty() -> Self {
        Self {
            io_managers: BTreeMap::new(),
            output_bindings: HashMap::new(),
        }
    }

    /// Bind an IO manager instance under `key`, replacing any previous binding
    ///
    /// Binding one instance under several keys shares a single call gate.
    pub fn io_manager(mut self, key: impl Into<String>, manager: Arc<dyn IoManager>) -> Self {
        let handle = self
            .io_managers
            .values()
            .find(|existing| existing.same_instance(&manager))
            .cloned()
            .unwrap_or_else(|| IoManagerHandle::new(manager));
        self.io_managers.insert(key.into(), handle);
        self
    }

    /// Route one output to a different IO-manager key
    pub fn bind_output(mut self, output: OutputHandle, key: impl Into<String>) -> Self {
        self.output_bindings.insert(output, key.into());
        self
    }

    pub fn io_manager_keys(&self) -> impl Iterator<Item = &str> {
        self.io_managers.keys().map(String::as_str)
    }

    fn handle(&self, key: &str) -> Option<&IoManagerHandle> {
        self.io_managers.get(key)
    }
}

/// Physical dependency edge into a step input
#[derive(Debug, Clone)]
pub struct StepEdge {
    /// Producing output
    pub from: OutputHandle,
    /// Upstream partitions consumed by this edge
    pub scope: PartitionScope,
    /// Partitions declared by the producing output
    pub upstream_partitions: Option<PartitionSet>,
}

/// Input of a compiled step
#[derive(Debug, Clone)]
pub struct StepInput {
    pub name: String,
    /// Asset-key override declared on the input
    pub asset_key: Option<AssetKey>,
    pub default_value: Option<Value>,
    /// None when the input is a graph source
    pub source: Option<StepEdge>,
}

/// Output of a compiled step
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub name: String,
    pub io_manager_key: String,
    pub io_manager: IoManagerHandle,
    pub partitions: Option<PartitionSet>,
    /// Resolved lineage source; None means lineage-transparent
    pub lineage: Option<LineageSource>,
}

/// Physical step: one op instance with its resolved bindings
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub key: String,
    pub op: OpInstance,
    pub inputs: Vec<StepInput>,
    pub outputs: Vec<StepOutput>,
}

impl ExecutionStep {
    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn output_position(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name == name)
    }
}

/// Compiled, immutable execution plan
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    name: String,
    steps: Vec<ExecutionStep>,
    index: HashMap<String, usize>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Compile `graph` against `resources`
    ///
    /// Fails with a ConfigurationError on:
    /// - an output bound to an unknown IO-manager key
    /// - more than one lineage source on an output, including a static key or
    ///   resolver on an output whose IO manager provides asset keys
    /// - explicit delegation to an IO manager that provides no asset keys
    /// - a partition constraint on an unpartitioned upstream output, or naming
    ///   partitions the upstream output does not declare
    pub fn compile(graph: &Graph, resources: &Resources) -> Result<Self> {
        tracing::debug!("🔧 Compiling execution plan for graph '{}'", graph.name);

        let mut steps = Vec::with_capacity(graph.ops().len());
        for op in graph.topological_order() {
            let outputs = op
                .definition
                .outputs
                .iter()
                .map(|output| {
                    output.validate_lineage(&op.name)?;

                    let handle = OutputHandle::new(&op.name, &output.name);
                    let io_manager_key = resources
                        .output_bindings
                        .get(&handle)
                        .cloned()
                        .unwrap_or_else(|| output.io_manager_key.clone());
                    let io_manager = resources.handle(&io_manager_key).cloned().ok_or_else(|| {
                        Error::configuration(format!(
                            "output {} is bound to io manager '{}' which is not provided (available: {})",
                            handle,
                            io_manager_key,
                            resources.io_manager_keys().collect::<Vec<_>>().join(", ")
                        ))
                    })?;

                    let lineage = resolve_lineage_source(
                        &handle,
                        output.lineage_source(),
                        &io_manager_key,
                        &io_manager,
                    )?;

                    Ok(StepOutput {
                        name: output.name.clone(),
                        io_manager_key,
                        io_manager,
                        partitions: output.partitions.clone(),
                        lineage,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let inputs = op
                .definition
                .inputs
                .iter()
                .map(|input| {
                    let handle = InputHandle::new(&op.name, &input.name);
                    let source = match graph.source_of(&handle) {
                        Some(from) => Some(compile_edge(graph, &handle, from, input.partitions.as_ref())?),
                        None => None,
                    };
                    Ok(StepInput {
                        name: input.name.clone(),
                        asset_key: input.asset_key.clone(),
                        default_value: input.default_value.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            steps.push(ExecutionStep {
                key: op.name.clone(),
                op: op.clone(),
                inputs,
                outputs,
            });
        }

        let index: HashMap<String, usize> = steps
            .iter()
            .enumerate()
            .map(|(idx, step)| (step.key.clone(), idx))
            .collect();

        let mut upstream = vec![Vec::new(); steps.len()];
        let mut downstream = vec![Vec::new(); steps.len()];
        for (idx, step) in steps.iter().enumerate() {
            for input in &step.inputs {
                let Some(edge) = &input.source else { continue };
                let producer = index.get(&edge.from.op).copied().ok_or_else(|| {
                    Error::configuration(format!("step '{}' depends on unknown step '{}'", step.key, edge.from.op))
                })?;
                if !upstream[idx].contains(&producer) {
                    upstream[idx].push(producer);
                    downstream[producer].push(idx);
                }
            }
        }

        tracing::info!("📋 Compiled plan '{}' with {} steps", graph.name, steps.len());
        tracing::debug!("📋 Step order: {:?}", steps.iter().map(|s| s.key.as_str()).collect::<Vec<_>>());

        Ok(Self {
            name: graph.name.clone(),
            steps,
            index,
            upstream,
            downstream,
        })
    }

    /// Name of the graph this plan was compiled from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in topological order
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, key: &str) -> Option<&ExecutionStep> {
        self.index.get(key).map(|&idx| &self.steps[idx])
    }

    pub fn step_index(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Direct upstream step indices of step `idx`
    pub fn upstream_of(&self, idx: usize) -> &[usize] {
        &self.upstream[idx]
    }

    /// Direct downstream step indices of step `idx`
    pub fn downstream_of(&self, idx: usize) -> &[usize] {
        &self.downstream[idx]
    }

    /// Compiled output behind a handle
    pub fn output(&self, handle: &OutputHandle) -> Option<&StepOutput> {
        self.step(&handle.op).and_then(|step| step.output(&handle.output))
    }
}

/// Decide the single lineage source of an output against its IO-manager binding
fn resolve_lineage_source(
    handle: &OutputHandle,
    declared: Option<&LineageSource>,
    io_manager_key: &str,
    io_manager: &IoManagerHandle,
) -> Result<Option<LineageSource>> {
    let delegates = io_manager.provides_asset_keys();
    match declared {
        Some(LineageSource::Delegated) if !delegates => Err(Error::configuration(format!(
            "output {} delegates its asset key to io manager '{}', which does not provide asset keys",
            handle, io_manager_key
        ))),
        Some(source @ (LineageSource::Static(_) | LineageSource::Resolver(_))) if delegates => {
            Err(Error::configuration(format!(
                "output {} configures both a {} and io manager '{}' which provides asset keys; \
                 only one asset key source is allowed",
                handle,
                source.mechanism(),
                io_manager_key
            )))
        }
        Some(source) => Ok(Some(source.clone())),
        None if delegates => Ok(Some(LineageSource::Delegated)),
        None => Ok(None),
    }
}

/// Build the physical edge for a wired input, propagating its partition constraint
fn compile_edge(
    graph: &Graph,
    input: &InputHandle,
    from: &OutputHandle,
    constraint: Option<&PartitionSet>,
) -> Result<StepEdge> {
    let upstream_partitions = graph
        .op(&from.op)
        .and_then(|op| op.definition.output(&from.output))
        .and_then(|output| output.partitions.clone());

    if let Some(wanted) = constraint {
        match &upstream_partitions {
            None => {
                return Err(Error::configuration(format!(
                    "input {} constrains partitions of {}, which declares no partitions",
                    input, from
                )));
            }
            Some(declared) => {
                let missing = wanted.difference(declared);
                if !missing.is_empty() {
                    return Err(Error::configuration(format!(
                        "input {} consumes partitions {:?} that {} does not declare",
                        input, missing, from
                    )));
                }
            }
        }
    }

    Ok(StepEdge {
        from: from.clone(),
        scope: PartitionScope::from_constraint(constraint),
        upstream_partitions,
    })
}
