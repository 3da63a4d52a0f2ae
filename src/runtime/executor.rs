/// Step execution
///
/// Runs one physical step to completion on a blocking worker thread:
/// - Loads inputs through the upstream outputs' IO managers
/// - Invokes the op's compute function (panics become step failures)
/// - Resolves each output's asset key, writes it, and emits its materializations
///
/// Every failure is caught here and turned into a STEP_FAILURE event plus a
/// `StepOutcome::Failure`; nothing propagates into the scheduler.

use crate::definition::graph::OutputHandle;
use crate::definition::op::{InputValues, OpContext, Output};
use crate::error::{catch_panic, panic_message, Error, ErrorInfo, IoOperation, Result};
use crate::events::{EventKind, EventLog, RunEvent};
use crate::io::{InputContext, OutputContext};
use crate::lineage::{self, LineageTracker, ParentCandidate};
use crate::plan::resolver::ResolvedKeys;
use crate::plan::{ExecutionPlan, ExecutionStep, StepInput};
use crate::runtime::cancel::CancellationFlag;
use crate::runtime::outcome::StepOutcome;
use crate::runtime::RunId;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// State shared by every step of one run
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub plan: Arc<ExecutionPlan>,
    pub event_log: Arc<dyn EventLog>,
    /// Asset keys resolved so far in this run
    pub resolved_keys: ResolvedKeys,
    pub cancellation: CancellationFlag,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        plan: Arc<ExecutionPlan>,
        event_log: Arc<dyn EventLog>,
        cancellation: CancellationFlag,
    ) -> Self {
        Self {
            run_id,
            plan,
            event_log,
            resolved_keys: ResolvedKeys::new(),
            cancellation,
        }
    }

    /// Append a step event; a rejected append is logged, never fatal to the run
    pub(crate) fn emit(&self, step_key: &str, kind: EventKind) {
        let event_type = kind.event_type();
        if let Err(e) = self.event_log.append(RunEvent::step(self.run_id, step_key, kind)) {
            tracing::error!("❌ Failed to append {} for step '{}': {}", event_type, step_key, e);
        }
    }

    fn output_context(&self, step: &ExecutionStep, output: &crate::plan::StepOutput) -> OutputContext {
        OutputContext {
            run_id: self.run_id,
            step_key: step.key.clone(),
            op_name: step.op.name.clone(),
            name: output.name.clone(),
            io_manager_key: output.io_manager_key.clone(),
            partitions: output.partitions.clone(),
            asset_key: None,
        }
    }
}

/// Executes individual steps of a run
#[derive(Debug, Clone)]
pub struct StepExecutor {
    run: Arc<RunContext>,
}

impl StepExecutor {
    pub fn new(run: Arc<RunContext>) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// Execute the step at `idx`, recording STEP_START and its terminal event
    ///
    /// Blocking: call from a worker thread.
    pub fn execute(&self, idx: usize) -> StepOutcome {
        let step = &self.run.plan.steps()[idx];
        tracing::info!("🚀 Starting step '{}' (op: {})", step.key, step.op.definition.name);
        self.run.emit(&step.key, EventKind::StepStart);

        let start_time = Instant::now();
        // Plugin calls are guarded individually; this catches anything else in the step
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute_step(step))).unwrap_or_else(|payload| {
            Err(Error::StepExecution {
                step_key: step.key.clone(),
                source: anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())),
            })
        });
        let duration = start_time.elapsed();

        match result {
            Ok(()) => {
                tracing::info!("✅ Step '{}' completed in {:?}", step.key, duration);
                self.run.emit(
                    &step.key,
                    EventKind::StepSuccess {
                        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    },
                );
                StepOutcome::Success
            }
            Err(e) => {
                tracing::error!("❌ Step '{}' failed in {:?} - Error: {}", step.key, duration, e);
                let error = ErrorInfo::from(&e);
                self.run.emit(&step.key, EventKind::StepFailure { error: error.clone() });
                StepOutcome::Failure { error }
            }
        }
    }

    fn execute_step(&self, step: &ExecutionStep) -> Result<()> {
        let inputs = self.load_inputs(step)?;
        tracing::debug!("📥 Step '{}' loaded {} inputs", step.key, inputs.len());

        let context = OpContext::new(
            self.run.run_id,
            step.key.clone(),
            step.op.name.clone(),
            step.op.definition.name.clone(),
            self.run.cancellation.clone(),
        );
        let compute = step.op.definition.compute();
        let yielded = catch_panic(|| compute.compute(&context, &inputs))
            .map_err(|source| Error::StepExecution {
                step_key: step.key.clone(),
                source,
            })?;

        let mut outputs = match_outputs(step, yielded)?;

        // Parents are shared by every output of the step; computed once, on first need
        let mut parents: Option<Vec<ParentCandidate>> = None;
        for (position, declared) in step.outputs.iter().enumerate() {
            let Some(output) = outputs[position].take() else { continue };
            let handle = OutputHandle::new(&step.key, &declared.name);

            let mut context = self.run.output_context(step, declared);
            let asset_key = self.run.resolved_keys.resolve_once(&handle, declared, &context)?;
            context.asset_key = asset_key.clone();

            catch_panic(|| declared.io_manager.write(&context, &output.value)).map_err(|source| Error::IoManager {
                step_key: step.key.clone(),
                operation: IoOperation::Write,
                output: handle.to_string(),
                source,
            })?;
            tracing::debug!("💾 Wrote {} via io manager '{}'", handle, declared.io_manager_key);

            let Some(asset_key) = asset_key else {
                tracing::debug!("👻 Output {} is lineage-transparent", handle);
                continue;
            };
            let parents = parents.get_or_insert_with(|| {
                LineageTracker::new(&self.run.plan, &self.run.resolved_keys).parents(step)
            });
            for materialization in
                lineage::materializations(&step.key, &asset_key, declared.partitions.as_ref(), &output, parents)
            {
                tracing::info!("📦 Materialized {}{} from step '{}'",
                    materialization.asset_key,
                    materialization.partition.as_deref().map(|p| format!(" [{p}]")).unwrap_or_default(),
                    step.key);
                self.run.event_log.append(RunEvent::step(
                    self.run.run_id,
                    &step.key,
                    EventKind::StepMaterialization(materialization),
                ))?;
            }
        }

        Ok(())
    }

    fn load_inputs(&self, step: &ExecutionStep) -> Result<InputValues> {
        let mut values = InputValues::default();
        for input in &step.inputs {
            let value = match &input.source {
                Some(_) => self.load_input(step, input)?,
                None => input.default_value.clone().unwrap_or(Value::Null),
            };
            values.push(input.name.clone(), value);
        }
        Ok(values)
    }

    fn load_input(&self, step: &ExecutionStep, input: &StepInput) -> Result<Value> {
        let Some(edge) = &input.source else {
            return Err(Error::StepExecution {
                step_key: step.key.clone(),
                source: anyhow::anyhow!("input '{}' is not wired", input.name),
            });
        };
        let read_error = |source: anyhow::Error| Error::IoManager {
            step_key: step.key.clone(),
            operation: IoOperation::Read,
            output: edge.from.to_string(),
            source: source.context(format!("loading input '{}'", input.name)),
        };
        let (Some(producer), Some(upstream)) = (self.run.plan.step(&edge.from.op), self.run.plan.output(&edge.from))
        else {
            return Err(read_error(anyhow::anyhow!("upstream output {} is not in the plan", edge.from)));
        };

        let mut upstream_output = self.run.output_context(producer, upstream);
        upstream_output.asset_key = self.run.resolved_keys.get(&edge.from).flatten();
        let context = InputContext {
            run_id: self.run.run_id,
            step_key: step.key.clone(),
            op_name: step.op.name.clone(),
            name: input.name.clone(),
            partitions: edge.scope.clone(),
            upstream_output,
        };
        catch_panic(|| upstream.io_manager.read(&context)).map_err(read_error)
    }
}

/// Pair yielded outputs with declared outputs, by declared position
///
/// Undeclared, duplicated or missing outputs fail the step.
fn match_outputs(step: &ExecutionStep, yielded: Vec<Output>) -> Result<Vec<Option<Output>>> {
    let step_error = |message: String| Error::StepExecution {
        step_key: step.key.clone(),
        source: anyhow::anyhow!(message),
    };

    let mut slots: Vec<Option<Output>> = step.outputs.iter().map(|_| None).collect();
    let positions: HashMap<&str, usize> = step
        .outputs
        .iter()
        .enumerate()
        .map(|(i, o)| (o.name.as_str(), i))
        .collect();

    for output in yielded {
        let Some(&position) = positions.get(output.name.as_str()) else {
            return Err(step_error(format!("op yielded undeclared output '{}'", output.name)));
        };
        if slots[position].is_some() {
            return Err(step_error(format!("op yielded output '{}' more than once", output.name)));
        }
        slots[position] = Some(output);
    }

    let missing: Vec<&str> = step
        .outputs
        .iter()
        .zip(&slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(declared, _)| declared.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(step_error(format!("op did not yield declared outputs: {}", missing.join(", "))));
    }

    Ok(slots)
}
