/// Concurrent step scheduler
///
/// Drives a compiled plan to completion. Steps become eligible once every
/// upstream step succeeded and run on tokio's blocking pool, at most
/// `max_concurrent_steps` at a time. A failure marks all transitive
/// dependents SKIPPED; independent branches keep going. Cancellation stops
/// promotion of PENDING steps and awaits the RUNNING ones.

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::events::{EventKind, EventLog, InMemoryEventLog, RunEvent};
use crate::plan::registry::JobRegistry;
use crate::plan::ExecutionPlan;
use crate::runtime::cancel::RunCanceller;
use crate::runtime::executor::{RunContext, StepExecutor};
use crate::runtime::outcome::{RunResult, RunStatus, SkipReason, StepOutcome, StepState};
use crate::runtime::RunId;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: RunId,
    pub canceller: RunCanceller,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn canceller(mut self, canceller: RunCanceller) -> Self {
        self.canceller = canceller;
        self
    }
}

/// Plan execution engine
///
/// Stateless between runs apart from the shared event log.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: ExecutorConfig,
    event_log: Arc<dyn EventLog>,
}

impl Default for ExecutionEngine {
    /// Engine with env-derived concurrency and an in-memory event log
    fn default() -> Self {
        Self::new(ExecutorConfig::default(), Arc::new(InMemoryEventLog::new()))
    }
}

/// Scheduler bookkeeping for one run
struct Schedule<'a> {
    plan: &'a ExecutionPlan,
    run: &'a RunContext,
    states: Vec<StepState>,
    outcomes: Vec<Option<StepOutcome>>,
    /// Upstream steps not yet succeeded, per step
    waiting_on: Vec<usize>,
    ready: VecDeque<usize>,
}

impl<'a> Schedule<'a> {
    fn new(plan: &'a ExecutionPlan, run: &'a RunContext) -> Self {
        let waiting_on: Vec<usize> = (0..plan.len()).map(|idx| plan.upstream_of(idx).len()).collect();
        let ready = (0..plan.len()).filter(|&idx| waiting_on[idx] == 0).collect();
        Self {
            plan,
            run,
            states: vec![StepState::Pending; plan.len()],
            outcomes: vec![None; plan.len()],
            waiting_on,
            ready,
        }
    }

    fn complete(&mut self, idx: usize, outcome: StepOutcome) {
        self.states[idx] = StepState::from(&outcome);
        match &outcome {
            StepOutcome::Success => {
                for &next in self.plan.downstream_of(idx) {
                    self.waiting_on[next] = self.waiting_on[next].saturating_sub(1);
                    if self.waiting_on[next] == 0 && self.states[next] == StepState::Pending {
                        self.ready.push_back(next);
                    }
                }
            }
            StepOutcome::Failure { .. } => self.skip_dependents_of(idx),
            StepOutcome::Skipped { .. } => {}
        }
        self.outcomes[idx] = Some(outcome);
    }

    /// Mark every PENDING transitive dependent of a failed step SKIPPED
    fn skip_dependents_of(&mut self, failed: usize) {
        let failed_step = self.plan.steps()[failed].key.clone();
        let mut queue: VecDeque<usize> = self.plan.downstream_of(failed).iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if self.states[idx] != StepState::Pending {
                continue;
            }
            self.skip(
                idx,
                SkipReason::UpstreamFailed {
                    failed_step: failed_step.clone(),
                },
            );
            queue.extend(self.plan.downstream_of(idx).iter().copied());
        }
    }

    fn skip(&mut self, idx: usize, reason: SkipReason) {
        let step_key = &self.plan.steps()[idx].key;
        tracing::warn!("⏭️ Skipping step '{}': {}", step_key, reason);
        self.run.emit(step_key, EventKind::StepSkipped { reason: reason.clone() });
        self.states[idx] = StepState::Skipped;
        self.outcomes[idx] = Some(StepOutcome::Skipped { reason });
    }

    /// Skip everything that never started
    fn cancel_pending(&mut self) {
        self.ready.clear();
        for idx in 0..self.plan.len() {
            if self.states[idx] == StepState::Pending {
                self.skip(idx, SkipReason::RunCanceled);
            }
        }
    }

    fn failed_steps(&self) -> Vec<String> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == StepState::Failure)
            .map(|(idx, _)| self.plan.steps()[idx].key.clone())
            .collect()
    }

    fn into_outcomes(self) -> BTreeMap<String, StepOutcome> {
        let plan = self.plan;
        self.outcomes
            .into_iter()
            .enumerate()
            .filter_map(|(idx, outcome)| outcome.map(|o| (plan.steps()[idx].key.clone(), o)))
            .collect()
    }
}

impl ExecutionEngine {
    pub fn new(config: ExecutorConfig, event_log: Arc<dyn EventLog>) -> Self {
        Self { config, event_log }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.event_log
    }

    /// Execute `plan` under a fresh run id
    pub async fn execute(&self, plan: Arc<ExecutionPlan>) -> Result<RunResult> {
        self.execute_with(plan, RunOptions::default()).await
    }

    /// Execute a job registered in `registry`
    pub async fn execute_job(&self, registry: &JobRegistry, name: &str) -> Result<RunResult> {
        let plan = registry.require(name)?;
        self.execute(plan).await
    }

    /// Execute `plan` with an explicit run id and cancellation handle
    ///
    /// Step failures never surface as `Err`; they are reported through the
    /// returned `RunResult`. `Err` means the run itself could not be driven
    /// (event log rejected a run-level event, a worker task was lost).
    pub async fn execute_with(&self, plan: Arc<ExecutionPlan>, options: RunOptions) -> Result<RunResult> {
        let span = tracing::info_span!("run", run_id = %options.run_id, plan = plan.name());
        self.run(plan, options).instrument(span).await
    }

    async fn run(&self, plan: Arc<ExecutionPlan>, options: RunOptions) -> Result<RunResult> {
        let run_start_time = std::time::Instant::now();
        let run_id = options.run_id;
        let mut cancellation = options.canceller.flag();
        let run = Arc::new(RunContext::new(
            run_id,
            Arc::clone(&plan),
            Arc::clone(&self.event_log),
            options.canceller.flag(),
        ));
        let executor = StepExecutor::new(Arc::clone(&run));
        let limit = self.config.effective_concurrency();

        tracing::info!("🚀 Starting run {} of '{}' ({} steps, concurrency {})",
            run_id, plan.name(), plan.len(), limit);
        self.event_log.append(RunEvent::run(
            run_id,
            EventKind::RunStart {
                plan: plan.name().to_string(),
                step_count: plan.len(),
            },
        ))?;

        let mut schedule = Schedule::new(&plan, &run);
        let mut tasks: JoinSet<(usize, StepOutcome)> = JoinSet::new();
        let mut canceled = false;

        loop {
            if !canceled && cancellation.is_cancelled() {
                canceled = true;
            }
            if canceled {
                schedule.cancel_pending();
            } else {
                while tasks.len() < limit {
                    let Some(idx) = schedule.ready.pop_front() else { break };
                    schedule.states[idx] = StepState::Running;
                    let executor = executor.clone();
                    tasks.spawn_blocking(move || (idx, executor.execute(idx)));
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, outcome))) => schedule.complete(idx, outcome),
                    Some(Err(e)) => {
                        tracing::error!("❌ Lost step worker task: {}", e);
                        return Err(Error::engine(format!("step worker task failed: {e}")));
                    }
                    None => break,
                },
                _ = cancellation.cancelled(), if !canceled => {
                    tracing::warn!("🛑 Run {} canceled, awaiting {} running steps", run_id, tasks.len());
                    canceled = true;
                }
            }
        }

        // Cancellation observed only after the last launch still leaves pending steps behind
        if canceled {
            schedule.cancel_pending();
        }

        let failed_steps = schedule.failed_steps();
        let status = if !failed_steps.is_empty() {
            RunStatus::Failure
        } else if canceled {
            RunStatus::Canceled
        } else {
            RunStatus::Success
        };
        let terminal = match status {
            RunStatus::Success => EventKind::RunSuccess,
            RunStatus::Failure => EventKind::RunFailure {
                failed_steps: failed_steps.clone(),
            },
            RunStatus::Canceled => EventKind::RunCanceled,
        };
        self.event_log.append(RunEvent::run(run_id, terminal))?;

        let outcomes = schedule.into_outcomes();
        let duration = run_start_time.elapsed();
        match status {
            RunStatus::Success => tracing::info!("🎉 Run {} of '{}' succeeded in {:?}", run_id, plan.name(), duration),
            RunStatus::Failure => tracing::error!("💥 Run {} of '{}' failed in {:?}; failed steps: {:?}",
                run_id, plan.name(), duration, failed_steps),
            RunStatus::Canceled => tracing::warn!("🛑 Run {} of '{}' canceled after {:?}", run_id, plan.name(), duration),
        }

        Ok(RunResult {
            run_id,
            status,
            outcomes,
            events: self.event_log.read(run_id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::graph::Graph;
    use crate::definition::op::{InputDefinition, InputValues, OpContext, OpDefinition, Output};
    use crate::events::EventType;
    use crate::plan::Resources;
    use serde_json::json;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(ExecutorConfig::with_concurrency(4), Arc::new(InMemoryEventLog::new()))
    }

    #[tokio::test]
    async fn empty_plan_succeeds_with_run_events_only() {
        let graph = Graph::builder("empty").build().unwrap();
        let plan = Arc::new(ExecutionPlan::compile(&graph, &Resources::new()).unwrap());
        let result = engine().execute(plan).await.unwrap();

        assert!(result.is_success());
        let types: Vec<_> = result.events.iter().map(RunEvent::event_type).collect();
        assert_eq!(types, vec![EventType::RunStart, EventType::RunSuccess]);
    }

    #[tokio::test]
    async fn failure_skips_dependents_transitively() {
        let fail = OpDefinition::builder("fail")
            .compute(|_: &OpContext, _: &InputValues| -> anyhow::Result<Vec<Output>> {
                anyhow::bail!("source unavailable")
            })
            .build()
            .unwrap();
        let hop = OpDefinition::builder("hop")
            .input(InputDefinition::new("in"))
            .build()
            .unwrap();
        let graph = Graph::builder("g")
            .op(&fail)
            .op_as("a", &hop)
            .op_as("b", &hop)
            .wire(("fail", "result"), ("a", "in"))
            .wire(("a", "result"), ("b", "in"))
            .build()
            .unwrap();
        let plan = Arc::new(ExecutionPlan::compile(&graph, &Resources::new()).unwrap());
        let result = engine().execute(plan).await.unwrap();

        assert_eq!(result.status, RunStatus::Failure);
        assert!(result.outcome("fail").unwrap().is_failure());
        assert_eq!(
            result.outcome("b"),
            Some(&StepOutcome::Skipped {
                reason: SkipReason::UpstreamFailed {
                    failed_step: "fail".into()
                }
            })
        );
        assert_eq!(result.events_of_type(EventType::StepSkipped).count(), 2);
        assert_eq!(
            result.events.last().map(|e| e.kind.clone()),
            Some(EventKind::RunFailure {
                failed_steps: vec!["fail".into()]
            })
        );
    }

    #[tokio::test]
    async fn cancel_before_start_skips_everything() {
        let op = OpDefinition::builder("only")
            .compute(|_: &OpContext, _: &InputValues| -> anyhow::Result<Vec<Output>> {
                Ok(vec![Output::result(json!(1))])
            })
            .build()
            .unwrap();
        let graph = Graph::builder("g").op(&op).build().unwrap();
        let plan = Arc::new(ExecutionPlan::compile(&graph, &Resources::new()).unwrap());
        let canceller = RunCanceller::new();
        canceller.cancel();

        let result = engine()
            .execute_with(plan, RunOptions::new().canceller(canceller))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Canceled);
        assert_eq!(
            result.outcome("only"),
            Some(&StepOutcome::Skipped {
                reason: SkipReason::RunCanceled
            })
        );
        assert_eq!(result.events_of_type(EventType::StepStart).count(), 0);
        assert_eq!(result.events.last().map(RunEvent::event_type), Some(EventType::RunCanceled));
    }

    #[tokio::test]
    async fn execute_job_requires_registration() {
        let registry = JobRegistry::new();
        let err = engine().execute_job(&registry, "nightly").await.unwrap_err();
        assert!(err.is_configuration());
    }
}
