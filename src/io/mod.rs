/// IO Manager boundary
///
/// IO managers persist step outputs and load step inputs. They are external
/// collaborators; the core only calls the capabilities declared here and
/// serializes calls per instance unless the instance says it is safe for
/// concurrent use.

// Default in-memory IO manager bound under `io_manager`
pub mod memory;

use crate::definition::asset::{AssetKey, PartitionScope, PartitionSet};
use crate::runtime::RunId;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};

pub use memory::InMemoryIoManager;

/// Context for persisting one output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContext {
    pub run_id: RunId,
    pub step_key: String,
    /// Op instance name
    pub op_name: String,
    /// Output name
    pub name: String,
    pub io_manager_key: String,
    /// Partitions declared on the output
    pub partitions: Option<PartitionSet>,
    /// Asset key resolved for the output, once known
    pub asset_key: Option<AssetKey>,
}

/// Context for loading one input
#[derive(Debug, Clone, PartialEq)]
pub struct InputContext {
    pub run_id: RunId,
    pub step_key: String,
    pub op_name: String,
    /// Input name
    pub name: String,
    /// Partitions of the upstream output this input consumes
    pub partitions: PartitionScope,
    /// Context the upstream output was written with
    pub upstream_output: OutputContext,
}

/// Storage plugin servicing outputs bound to its key
pub trait IoManager: Send + Sync + fmt::Debug {
    /// Persist an output value
    fn write(&self, context: &OutputContext, value: &Value) -> anyhow::Result<()>;

    /// Load the value of an upstream output for a downstream input
    fn read(&self, context: &InputContext) -> anyhow::Result<Value>;

    /// Derive the asset key of an output this manager stores
    ///
    /// Only consulted for outputs whose lineage source is delegation.
    fn resolve_output_asset_key(&self, _context: &OutputContext) -> anyhow::Result<Option<AssetKey>> {
        Ok(None)
    }

    /// Whether this manager supplies asset keys for the outputs it stores
    ///
    /// Outputs bound to such a manager resolve their key by delegation and must
    /// not also configure a static key or resolver.
    fn provides_asset_keys(&self) -> bool {
        false
    }

    /// Whether concurrent `write`/`read` calls on this instance are allowed
    fn is_concurrent_safe(&self) -> bool {
        false
    }
}

/// Shared handle to a bound IO manager instance
///
/// Wraps the instance with a call gate so that at most one `write`/`read`
/// is in flight at a time unless the instance is concurrent-safe.
#[derive(Debug, Clone)]
pub struct IoManagerHandle {
    manager: Arc<dyn IoManager>,
    gate: Option<Arc<Mutex<()>>>,
}

impl IoManagerHandle {
    pub fn new(manager: Arc<dyn IoManager>) -> Self {
        let gate = if manager.is_concurrent_safe() {
            None
        } else {
            Some(Arc::new(Mutex::new(())))
        };
        Self { manager, gate }
    }

    /// True when both handles wrap the same instance
    pub fn same_instance(&self, manager: &Arc<dyn IoManager>) -> bool {
        Arc::ptr_eq(&self.manager, manager)
    }

    pub fn manager(&self) -> &Arc<dyn IoManager> {
        &self.manager
    }

    pub fn write(&self, context: &OutputContext, value: &Value) -> anyhow::Result<()> {
        self.gated(|| self.manager.write(context, value))
    }

    pub fn read(&self, context: &InputContext) -> anyhow::Result<Value> {
        self.gated(|| self.manager.read(context))
    }

    pub fn resolve_output_asset_key(&self, context: &OutputContext) -> anyhow::Result<Option<AssetKey>> {
        self.manager.resolve_output_asset_key(context)
    }

    pub fn provides_asset_keys(&self) -> bool {
        self.manager.provides_asset_keys()
    }

    fn gated<T>(&self, call: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
        match &self.gate {
            Some(gate) => {
                // A panic inside an earlier call poisons the gate but leaves no state behind it
                let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                call()
            }
            None => call(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Records the peak number of overlapping writes
    #[derive(Debug, Default)]
    struct OverlapProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        concurrent_safe: bool,
    }

    impl IoManager for OverlapProbe {
        fn write(&self, _context: &OutputContext, _value: &Value) -> anyhow::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn read(&self, _context: &InputContext) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }

        fn is_concurrent_safe(&self) -> bool {
            self.concurrent_safe
        }
    }

    fn context(step: &str) -> OutputContext {
        OutputContext {
            run_id: RunId::new(),
            step_key: step.to_string(),
            op_name: step.to_string(),
            name: "result".to_string(),
            io_manager_key: "probe".to_string(),
            partitions: None,
            asset_key: None,
        }
    }

    fn hammer(probe: Arc<OverlapProbe>) -> usize {
        let handle = IoManagerHandle::new(probe.clone());
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let handle = handle.clone();
                thread::spawn(move || handle.write(&context(&format!("s{i}")), &Value::Null))
            })
            .collect();
        for t in threads {
            t.join().unwrap().unwrap();
        }
        probe.peak.load(Ordering::SeqCst)
    }

    #[test]
    fn calls_are_serialized_for_unsafe_managers() {
        let probe = Arc::new(OverlapProbe::default());
        assert_eq!(hammer(probe), 1);
    }

    #[test]
    fn concurrent_safe_managers_are_not_gated() {
        let probe = Arc::new(OverlapProbe {
            concurrent_safe: true,
            ..OverlapProbe::default()
        });
        let handle = IoManagerHandle::new(probe.clone());
        assert!(handle.gate.is_none());
    }
}
