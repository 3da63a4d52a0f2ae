/// Hot-reload job registry using ArcSwap
///
/// Holds compiled execution plans by job name. Every update compiles first
/// and then swaps the whole map pointer, so readers never block and a
/// defective graph never replaces a working plan.

use crate::definition::graph::Graph;
use crate::error::{Error, Result};
use crate::plan::{ExecutionPlan, Resources};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free registry of compiled jobs
#[derive(Debug, Default)]
pub struct JobRegistry {
    /// Key: job name, Value: compiled plan
    jobs: ArcSwap<HashMap<String, Arc<ExecutionPlan>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `graph` against `resources` and register it as `name`
    ///
    /// Replaces an existing job of the same name. Compilation errors leave the
    /// registry untouched.
    pub fn register(&self, name: impl Into<String>, graph: &Graph, resources: &Resources) -> Result<Arc<ExecutionPlan>> {
        let plan = Arc::new(ExecutionPlan::compile(graph, resources)?);
        self.insert(name.into(), Arc::clone(&plan));
        Ok(plan)
    }

    /// Register an already compiled plan
    pub fn register_plan(&self, name: impl Into<String>, plan: Arc<ExecutionPlan>) {
        self.insert(name.into(), plan);
    }

    fn insert(&self, name: String, plan: Arc<ExecutionPlan>) {
        let steps = plan.len();
        self.jobs.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(name.clone(), Arc::clone(&plan));
            next
        });
        tracing::info!("🔄 Registered job '{}' ({} steps)", name, steps);
    }

    /// Lock-free lookup
    pub fn get(&self, name: &str) -> Option<Arc<ExecutionPlan>> {
        self.jobs.load().get(name).cloned()
    }

    /// Lookup that fails with a ConfigurationError for unknown jobs
    pub fn require(&self, name: &str) -> Result<Arc<ExecutionPlan>> {
        self.get(name)
            .ok_or_else(|| Error::configuration(format!("job '{}' is not registered", name)))
    }

    /// Remove a job; returns whether it existed
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        self.jobs.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(name).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed job '{}' from registry", name);
        }
        removed
    }

    /// Registered job names, sorted
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.load().is_empty()
    }
}
