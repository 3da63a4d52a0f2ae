/// Asset Key Resolver
///
/// Resolves an output's asset key at the moment its step runs. Exactly one
/// strategy applies per output (the compiler guarantees it):
/// 1. Static key - returned as is
/// 2. Context resolver - called with the runtime output context
/// 3. IO-manager delegation - `resolve_output_asset_key` on the bound instance
///
/// Outputs with no strategy are lineage-transparent.

use crate::definition::asset::AssetKey;
use crate::definition::graph::OutputHandle;
use crate::definition::op::LineageSource;
use crate::error::{catch_panic, Error, Result};
use crate::io::OutputContext;
use crate::plan::StepOutput;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolve the asset key of a compiled output
pub fn resolve_asset_key(output: &StepOutput, context: &OutputContext) -> Result<Option<AssetKey>> {
    let resolved = match &output.lineage {
        None => Ok(None),
        Some(LineageSource::Static(key)) => Ok(Some(key.clone())),
        Some(LineageSource::Resolver(resolver)) => catch_panic(|| resolver(context)).map(Some),
        Some(LineageSource::Delegated) => catch_panic(|| output.io_manager.resolve_output_asset_key(context)),
    };
    resolved.map_err(|source| Error::Resolution {
        step_key: context.step_key.clone(),
        output: output.name.clone(),
        source,
    })
}

/// Run-scoped table of resolved asset keys
///
/// Each output is resolved at most once per run; later lookups (the write,
/// lineage emission, downstream lineage walks) all see the same value.
/// Failed resolutions are not recorded.
#[derive(Debug, Default)]
pub struct ResolvedKeys {
    keys: RwLock<HashMap<OutputHandle, Option<AssetKey>>>,
}

impl ResolvedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously resolved key; outer None means not resolved yet
    pub fn get(&self, handle: &OutputHandle) -> Option<Option<AssetKey>> {
        self.keys
            .read()
            .ok()
            .and_then(|keys| keys.get(handle).cloned())
    }

    /// Resolve `output` unless already resolved, and remember the result
    pub fn resolve_once(
        &self,
        handle: &OutputHandle,
        output: &StepOutput,
        context: &OutputContext,
    ) -> Result<Option<AssetKey>> {
        if let Some(known) = self.get(handle) {
            return Ok(known);
        }

        let resolved = resolve_asset_key(output, context)?;
        let mut keys = self
            .keys
            .write()
            .map_err(|_| Error::engine("resolved asset key table lock poisoned"))?;
        // A concurrent resolver may have won the race; keep the first value
        let stored = keys.entry(handle.clone()).or_insert(resolved);
        tracing::debug!("🔑 Resolved asset key for {}: {:?}", handle,
            stored.as_ref().map(AssetKey::to_user_string));
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoManagerHandle, InMemoryIoManager};
    use crate::runtime::RunId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn context() -> OutputContext {
        OutputContext {
            run_id: RunId::new(),
            step_key: "solid1".into(),
            op_name: "solid1".into(),
            name: "output1".into(),
            io_manager_key: "io_manager".into(),
            partitions: None,
            asset_key: None,
        }
    }

    fn output(lineage: Option<LineageSource>) -> StepOutput {
        StepOutput {
            name: "output1".into(),
            io_manager_key: "io_manager".into(),
            io_manager: IoManagerHandle::new(Arc::new(InMemoryIoManager::new())),
            partitions: None,
            lineage,
        }
    }

    #[test]
    fn transparent_output_resolves_to_none() {
        assert_eq!(resolve_asset_key(&output(None), &context()).unwrap(), None);
    }

    #[test]
    fn resolver_sees_runtime_context() {
        let out = output(Some(LineageSource::Resolver(Arc::new(|ctx: &OutputContext| -> anyhow::Result<AssetKey> {
            Ok(AssetKey::new(["tables", ctx.step_key.as_str()])?)
        }))));
        let key = resolve_asset_key(&out, &context()).unwrap();
        assert_eq!(key, Some(AssetKey::new(["tables", "solid1"]).unwrap()));
    }

    #[test]
    fn resolver_failure_becomes_resolution_error() {
        let out = output(Some(LineageSource::Resolver(Arc::new(|_: &OutputContext| -> anyhow::Result<AssetKey> {
            Err(anyhow::anyhow!("catalog unavailable"))
        }))));
        let err = resolve_asset_key(&out, &context()).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().contains("solid1.output1"));
    }

    #[test]
    fn panicking_resolver_becomes_resolution_error() {
        let out = output(Some(LineageSource::Resolver(Arc::new(|_: &OutputContext| -> anyhow::Result<AssetKey> {
            panic!("catalog client crashed")
        }))));
        let err = resolve_asset_key(&out, &context()).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().contains("catalog client crashed"));
    }

    #[test]
    fn resolve_once_is_idempotent_within_a_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let out = output(Some(LineageSource::Resolver(Arc::new(move |_: &OutputContext| -> anyhow::Result<AssetKey> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(AssetKey::new([format!("table{n}")])?)
        }))));
        let keys = ResolvedKeys::new();
        let handle = OutputHandle::new("solid1", "output1");

        let first = keys.resolve_once(&handle, &out, &context()).unwrap();
        let second = keys.resolve_once(&handle, &out, &context()).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(keys.get(&handle), Some(first));
    }
}
