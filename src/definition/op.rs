/// Op definitions: typed inputs, outputs and the compute function
///
/// Definitions are immutable once built and shared behind `Arc` so that one
/// definition can be instantiated several times in a graph under different aliases.

use crate::definition::asset::{AssetKey, PartitionSet};
use crate::definition::metadata::{MetadataEntry, PartitionMetadataEntry};
use crate::error::{Error, Result};
use crate::io::OutputContext;
use crate::runtime::cancel::CancellationFlag;
use crate::runtime::RunId;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Output name given to ops that declare no outputs
pub const DEFAULT_OUTPUT: &str = "result";

/// IO-manager key used when an output does not name one
pub const DEFAULT_IO_MANAGER_KEY: &str = "io_manager";

/// Context resolver: derives an asset key from the runtime output context
pub type AssetKeyFn = Arc<dyn Fn(&OutputContext) -> anyhow::Result<AssetKey> + Send + Sync>;

/// Where an output's asset identity comes from
///
/// At most one source may be configured per output.
#[derive(Clone)]
pub enum LineageSource {
    /// Literal key, no computation.
    Static(AssetKey),
    /// Pure function of the runtime output context.
    Resolver(AssetKeyFn),
    /// Ask the bound IO manager through `resolve_output_asset_key`.
    Delegated,
}

impl LineageSource {
    pub fn mechanism(&self) -> &'static str {
        match self {
            Self::Static(_) => "static asset key",
            Self::Resolver(_) => "asset key resolver",
            Self::Delegated => "io manager delegation",
        }
    }
}

impl fmt::Debug for LineageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(key) => f.debug_tuple("Static").field(key).finish(),
            Self::Resolver(_) => f.write_str("Resolver(<fn>)"),
            Self::Delegated => f.write_str("Delegated"),
        }
    }
}

/// Declared input of an op
#[derive(Debug, Clone)]
pub struct InputDefinition {
    pub name: String,
    /// Asset this input reads, overriding the backward lineage walk
    pub asset_key: Option<AssetKey>,
    /// Partitions of the upstream output consumed (None = all)
    pub partitions: Option<PartitionSet>,
    /// Value handed to the op when the input is not wired
    pub default_value: Option<Value>,
}

impl InputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_key: None,
            partitions: None,
            default_value: None,
        }
    }

    pub fn asset_key(mut self, key: AssetKey) -> Self {
        self.asset_key = Some(key);
        self
    }

    pub fn partitions(mut self, partitions: PartitionSet) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Declared output of an op
#[derive(Debug, Clone)]
pub struct OutputDefinition {
    pub name: String,
    /// Selects the IO manager instance that persists this output
    pub io_manager_key: String,
    /// Partitions materialized by this output (None = unpartitioned)
    pub partitions: Option<PartitionSet>,
    pub description: Option<String>,
    // Every configured source is kept so that conflicts can be reported
    // instead of one silently winning.
    lineage: Vec<LineageSource>,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            io_manager_key: DEFAULT_IO_MANAGER_KEY.to_string(),
            partitions: None,
            description: None,
            lineage: Vec::new(),
        }
    }

    /// Attach a literal asset key
    pub fn asset_key(mut self, key: AssetKey) -> Self {
        self.lineage.push(LineageSource::Static(key));
        self
    }

    /// Derive the asset key from the runtime context
    pub fn asset_key_fn<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&OutputContext) -> anyhow::Result<AssetKey> + Send + Sync + 'static,
    {
        self.lineage.push(LineageSource::Resolver(Arc::new(resolver)));
        self
    }

    /// Require the bound IO manager to supply the asset key
    pub fn delegate_asset_key(mut self) -> Self {
        self.lineage.push(LineageSource::Delegated);
        self
    }

    pub fn io_manager_key(mut self, key: impl Into<String>) -> Self {
        self.io_manager_key = key.into();
        self
    }

    pub fn partitions(mut self, partitions: PartitionSet) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The configured lineage source, if any
    pub fn lineage_source(&self) -> Option<&LineageSource> {
        self.lineage.first()
    }

    /// Fail if more than one lineage source was configured
    pub fn validate_lineage(&self, op_name: &str) -> Result<()> {
        if self.lineage.len() > 1 {
            let mechanisms: Vec<_> = self.lineage.iter().map(LineageSource::mechanism).collect();
            return Err(Error::configuration(format!(
                "output '{}' of op '{}' configures more than one asset key source: {}",
                self.name,
                op_name,
                mechanisms.join(" and ")
            )));
        }
        Ok(())
    }
}

/// Value yielded by an op for one of its outputs
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub value: Value,
    pub metadata: Vec<MetadataEntry>,
    pub partition_metadata: Vec<PartitionMetadataEntry>,
}

impl Output {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            metadata: Vec::new(),
            partition_metadata: Vec::new(),
        }
    }

    /// Output for the default `result` name
    pub fn result(value: Value) -> Self {
        Self::new(DEFAULT_OUTPUT, value)
    }

    pub fn with_metadata(mut self, entry: MetadataEntry) -> Self {
        self.metadata.push(entry);
        self
    }

    pub fn with_partition_metadata(mut self, partition: impl Into<String>, entry: MetadataEntry) -> Self {
        self.partition_metadata.push(PartitionMetadataEntry::new(partition, entry));
        self
    }
}

/// Runtime information handed to an op's compute function
#[derive(Debug, Clone)]
pub struct OpContext {
    pub run_id: RunId,
    pub step_key: String,
    /// Instance name of the op in the graph
    pub op_name: String,
    /// Name of the underlying definition
    pub definition_name: String,
    cancellation: CancellationFlag,
}

impl OpContext {
    pub(crate) fn new(
        run_id: RunId,
        step_key: String,
        op_name: String,
        definition_name: String,
        cancellation: CancellationFlag,
    ) -> Self {
        Self {
            run_id,
            step_key,
            op_name,
            definition_name,
            cancellation,
        }
    }

    /// True once the run has been asked to cancel; long computations should poll this
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Loaded input values in declared input order
#[derive(Debug, Clone, Default)]
pub struct InputValues(Vec<(String, Value)>);

impl InputValues {
    pub(crate) fn push(&mut self, name: String, value: Value) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Computation performed by an op
pub trait OpCompute: Send + Sync {
    fn compute(&self, context: &OpContext, inputs: &InputValues) -> anyhow::Result<Vec<Output>>;
}

impl<F> OpCompute for F
where
    F: Fn(&OpContext, &InputValues) -> anyhow::Result<Vec<Output>> + Send + Sync,
{
    fn compute(&self, context: &OpContext, inputs: &InputValues) -> anyhow::Result<Vec<Output>> {
        self(context, inputs)
    }
}

/// Immutable op definition
pub struct OpDefinition {
    pub name: String,
    pub description: Option<String>,
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<OutputDefinition>,
    compute: Arc<dyn OpCompute>,
}

impl fmt::Debug for OpDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDefinition")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl OpDefinition {
    pub fn builder(name: impl Into<String>) -> OpDefinitionBuilder {
        OpDefinitionBuilder {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute: None,
        }
    }

    pub fn input(&self, name: &str) -> Option<&InputDefinition> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputDefinition> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub(crate) fn compute(&self) -> &dyn OpCompute {
        self.compute.as_ref()
    }
}

/// Builder validating an [`OpDefinition`] at construction time
pub struct OpDefinitionBuilder {
    name: String,
    description: Option<String>,
    inputs: Vec<InputDefinition>,
    outputs: Vec<OutputDefinition>,
    compute: Option<Arc<dyn OpCompute>>,
}

impl OpDefinitionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn compute<F>(mut self, compute: F) -> Self
    where
        F: Fn(&OpContext, &InputValues) -> anyhow::Result<Vec<Output>> + Send + Sync + 'static,
    {
        self.compute = Some(Arc::new(compute));
        self
    }

    /// Use a stateful [`OpCompute`] implementation
    pub fn compute_with(mut self, compute: Arc<dyn OpCompute>) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Validate and freeze the definition
    ///
    /// Ops without declared outputs get the single default `result` output.
    /// Ops without a compute function yield `null` for every declared output.
    pub fn build(self) -> Result<Arc<OpDefinition>> {
        if self.name.is_empty() {
            return Err(Error::configuration("op name must not be empty"));
        }

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(Error::configuration(format!(
                    "op '{}' declares input '{}' more than once",
                    self.name, input.name
                )));
            }
            if input.partitions.as_ref().is_some_and(PartitionSet::is_empty) {
                return Err(Error::configuration(format!(
                    "input '{}' of op '{}' has an empty partition constraint",
                    input.name, self.name
                )));
            }
        }

        let mut outputs = self.outputs;
        if outputs.is_empty() {
            outputs.push(OutputDefinition::new(DEFAULT_OUTPUT));
        }

        let mut seen = HashSet::new();
        for output in &outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(Error::configuration(format!(
                    "op '{}' declares output '{}' more than once",
                    self.name, output.name
                )));
            }
            output.validate_lineage(&self.name)?;
        }

        let compute = match self.compute {
            Some(compute) => compute,
            None => {
                let names: Vec<String> = outputs.iter().map(|o| o.name.clone()).collect();
                Arc::new(
                    move |_: &OpContext, _: &InputValues| -> anyhow::Result<Vec<Output>> {
                        Ok(names.iter().map(|n| Output::new(n.clone(), Value::Null)).collect())
                    },
                ) as Arc<dyn OpCompute>
            }
        };

        Ok(Arc::new(OpDefinition {
            name: self.name,
            description: self.description,
            inputs: self.inputs,
            outputs,
            compute,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_without_outputs_gets_default_result() {
        let op = OpDefinition::builder("solidX")
            .input(InputDefinition::new("_input"))
            .build()
            .unwrap();
        assert_eq!(op.outputs.len(), 1);
        assert_eq!(op.outputs[0].name, DEFAULT_OUTPUT);
        assert_eq!(op.outputs[0].io_manager_key, DEFAULT_IO_MANAGER_KEY);
        assert!(op.outputs[0].lineage_source().is_none());
    }

    #[test]
    fn duplicate_output_names_are_rejected() {
        let err = OpDefinition::builder("dup")
            .output(OutputDefinition::new("a"))
            .output(OutputDefinition::new("a"))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn static_and_resolver_on_one_output_is_rejected() {
        let key = AssetKey::new(["x"]).unwrap();
        let err = OpDefinition::builder("fail_op")
            .output(
                OutputDefinition::new("out")
                    .asset_key(key)
                    .asset_key_fn(|_| AssetKey::new(["y"]).map_err(Into::into)),
            )
            .build()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fail_op"));
        assert!(msg.contains("static asset key and asset key resolver"));
    }

    #[test]
    fn empty_partition_constraint_is_rejected() {
        let err = OpDefinition::builder("consumer")
            .input(InputDefinition::new("in").partitions(PartitionSet::default()))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
