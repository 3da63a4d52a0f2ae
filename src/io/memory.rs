/// In-memory IO manager
///
/// Keeps output values in a map keyed by (run id, step key, output name).
/// Bound under the default `io_manager` key so graphs run without any storage set up.

use crate::io::{InputContext, IoManager, OutputContext};
use crate::runtime::RunId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

type ValueKey = (RunId, String, String);

#[derive(Debug, Default)]
pub struct InMemoryIoManager {
    values: RwLock<HashMap<ValueKey, Value>>,
}

impl InMemoryIoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values across all runs
    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IoManager for InMemoryIoManager {
    fn write(&self, context: &OutputContext, value: &Value) -> anyhow::Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory io manager lock poisoned"))?;
        values.insert(
            (context.run_id, context.step_key.clone(), context.name.clone()),
            value.clone(),
        );
        tracing::debug!("💾 Stored {}.{} in memory", context.step_key, context.name);
        Ok(())
    }

    fn read(&self, context: &InputContext) -> anyhow::Result<Value> {
        let upstream = &context.upstream_output;
        let values = self
            .values
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory io manager lock poisoned"))?;
        values
            .get(&(upstream.run_id, upstream.step_key.clone(), upstream.name.clone()))
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no value stored for {}.{} in run {}",
                    upstream.step_key,
                    upstream.name,
                    upstream.run_id
                )
            })
    }

    fn is_concurrent_safe(&self) -> bool {
        true
    }
}
