/// Op graph: op instances plus explicit output → input wiring
///
/// The builder validates the wiring eagerly: unique instance names, wiring that
/// points at real outputs/inputs, at most one producer per input, and no cycles
/// (checked with petgraph's toposort).

use crate::definition::op::OpDefinition;
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Names one output of one op instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputHandle {
    pub op: String,
    pub output: String,
}

impl OutputHandle {
    pub fn new(op: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.op, self.output)
    }
}

/// Names one input of one op instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputHandle {
    pub op: String,
    pub input: String,
}

impl InputHandle {
    pub fn new(op: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            input: input.into(),
        }
    }
}

impl fmt::Display for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.op, self.input)
    }
}

/// One use of an op definition inside a graph
#[derive(Debug, Clone)]
pub struct OpInstance {
    /// Alias, unique within the graph; doubles as the step key
    pub name: String,
    pub definition: Arc<OpDefinition>,
}

/// Directed data dependency from a producing output to a consuming input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Wire {
    pub from: OutputHandle,
    pub to: InputHandle,
}

/// Validated op DAG
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    ops: Vec<OpInstance>,
    wires: Vec<Wire>,
    /// Consuming input → producing output
    sources: HashMap<InputHandle, OutputHandle>,
    /// Op instance indices in a valid topological order
    topo_order: Vec<usize>,
}

impl Graph {
    pub fn builder(name: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            name: name.into(),
            ops: Vec::new(),
            wires: Vec::new(),
        }
    }

    /// Op instances in insertion order
    pub fn ops(&self) -> &[OpInstance] {
        &self.ops
    }

    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    pub fn op(&self, name: &str) -> Option<&OpInstance> {
        self.ops.iter().find(|op| op.name == name)
    }

    /// Output wired into `input`, or None for a graph source
    pub fn source_of(&self, input: &InputHandle) -> Option<&OutputHandle> {
        self.sources.get(input)
    }

    /// Op instances in a valid topological order
    pub fn topological_order(&self) -> impl Iterator<Item = &OpInstance> {
        self.topo_order.iter().map(|&idx| &self.ops[idx])
    }
}

/// Incremental graph builder
#[derive(Debug)]
pub struct GraphBuilder {
    name: String,
    ops: Vec<OpInstance>,
    wires: Vec<Wire>,
}

impl GraphBuilder {
    /// Add an instance named after its definition
    pub fn op(self, definition: &Arc<OpDefinition>) -> Self {
        let alias = definition.name.clone();
        self.op_as(alias, definition)
    }

    /// Add an instance under an alias
    pub fn op_as(mut self, alias: impl Into<String>, definition: &Arc<OpDefinition>) -> Self {
        self.ops.push(OpInstance {
            name: alias.into(),
            definition: Arc::clone(definition),
        });
        self
    }

    /// Wire `from_op.output` into `to_op.input`
    pub fn wire(
        mut self,
        (from_op, output): (&str, &str),
        (to_op, input): (&str, &str),
    ) -> Self {
        self.wires.push(Wire {
            from: OutputHandle::new(from_op, output),
            to: InputHandle::new(to_op, input),
        });
        self
    }

    /// Validate and freeze the graph
    pub fn build(self) -> Result<Graph> {
        tracing::debug!("🏗️ Building graph '{}' with {} ops and {} wires",
            self.name, self.ops.len(), self.wires.len());

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut op_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for (idx, op) in self.ops.iter().enumerate() {
            if op.name.is_empty() {
                return Err(Error::configuration(format!(
                    "graph '{}' contains an op instance with an empty name",
                    self.name
                )));
            }
            if op_to_index.insert(op.name.as_str(), graph.add_node(idx)).is_some() {
                return Err(Error::configuration(format!(
                    "op name '{}' is used more than once in graph '{}'",
                    op.name, self.name
                )));
            }
        }

        let mut sources = HashMap::new();
        let mut edges = HashSet::new();
        for wire in &self.wires {
            let from = op_to_index.get(wire.from.op.as_str()).ok_or_else(|| {
                Error::configuration(format!(
                    "wire {} → {} references unknown op '{}'",
                    wire.from, wire.to, wire.from.op
                ))
            })?;
            let to = op_to_index.get(wire.to.op.as_str()).ok_or_else(|| {
                Error::configuration(format!(
                    "wire {} → {} references unknown op '{}'",
                    wire.from, wire.to, wire.to.op
                ))
            })?;

            let producer = &self.ops[graph[*from]];
            if producer.definition.output(&wire.from.output).is_none() {
                return Err(Error::configuration(format!(
                    "op '{}' has no output '{}' (wired into {})",
                    wire.from.op, wire.from.output, wire.to
                )));
            }
            let consumer = &self.ops[graph[*to]];
            if consumer.definition.input(&wire.to.input).is_none() {
                return Err(Error::configuration(format!(
                    "op '{}' has no input '{}' (wired from {})",
                    wire.to.op, wire.to.input, wire.from
                )));
            }

            if let Some(existing) = sources.insert(wire.to.clone(), wire.from.clone()) {
                return Err(Error::configuration(format!(
                    "input {} is wired to both {} and {}",
                    wire.to, existing, wire.from
                )));
            }

            // Several wires between the same two ops collapse into one dependency edge
            if edges.insert((*from, *to)) {
                graph.add_edge(*from, *to, ());
            }
        }

        let topo = toposort(&graph, None).map_err(|cycle| {
            let op = &self.ops[graph[cycle.node_id()]];
            tracing::error!("❌ Graph '{}' contains a cycle through op '{}'", self.name, op.name);
            Error::configuration(format!(
                "graph '{}' contains a cycle through op '{}'",
                self.name, op.name
            ))
        })?;
        let topo_order = topo.into_iter().map(|node| graph[node]).collect();

        tracing::debug!("✅ Graph '{}' validated - no cycles detected", self.name);

        Ok(Graph {
            name: self.name,
            ops: self.ops,
            wires: self.wires,
            sources,
            topo_order,
        })
    }
}
