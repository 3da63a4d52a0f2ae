//! Property-based tests for lineage invariants.
//!
//! These tests use proptest to check that transparent chains of any length
//! collapse to the same parent relation.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use assetflow::definition::op::InputValues;
use assetflow::{
    AssetKey, AssetRelation, ExecutionEngine, ExecutionPlan, ExecutorConfig, Graph, InMemoryEventLog, InputDefinition,
    OpContext, OpDefinition, Output, OutputDefinition, Resources, RunResult,
};
use proptest::prelude::*;

fn chain_graph(transparent_hops: usize) -> Graph {
    let head = OpDefinition::builder("solid1")
        .output(OutputDefinition::new("output1").asset_key(AssetKey::new(["table1"]).unwrap()))
        .build()
        .unwrap();
    let hop = OpDefinition::builder("solidX")
        .input(InputDefinition::new("_input"))
        .compute(|_: &OpContext, inputs: &InputValues| -> anyhow::Result<Vec<Output>> {
            Ok(vec![Output::result(inputs.get("_input").cloned().unwrap_or_default())])
        })
        .build()
        .unwrap();
    let tail = OpDefinition::builder("solid3")
        .input(InputDefinition::new("_input"))
        .output(OutputDefinition::new("output3").asset_key(AssetKey::new(["table3"]).unwrap()))
        .build()
        .unwrap();

    let mut builder = Graph::builder("chain").op(&head);
    let mut previous = ("solid1".to_string(), "output1");
    for i in 0..transparent_hops {
        let alias = format!("solidX_{i}");
        builder = builder
            .op_as(&alias, &hop)
            .wire((previous.0.as_str(), previous.1), (alias.as_str(), "_input"));
        previous = (alias, "result");
    }
    builder
        .op(&tail)
        .wire((previous.0.as_str(), previous.1), ("solid3", "_input"))
        .build()
        .unwrap()
}

fn execute(graph: &Graph, concurrency: usize) -> RunResult {
    let plan = Arc::new(ExecutionPlan::compile(graph, &Resources::new()).unwrap());
    let engine = ExecutionEngine::new(
        ExecutorConfig::with_concurrency(concurrency),
        Arc::new(InMemoryEventLog::new()),
    );
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
        .block_on(engine.execute(plan))
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Lineage through any number of transparent hops resolves to the head asset.
    #[test]
    fn transparent_chain_has_two_materializations(hops in 0usize..60, concurrency in 1usize..4) {
        let result = execute(&chain_graph(hops), concurrency);
        prop_assert!(result.is_success());

        let materializations = result.materializations();
        prop_assert_eq!(materializations.len(), 2);
        prop_assert_eq!(&materializations[0].asset_key, &AssetKey::new(["table1"]).unwrap());
        prop_assert!(materializations[0].parents.is_empty());
        prop_assert_eq!(&materializations[1].asset_key, &AssetKey::new(["table3"]).unwrap());
        prop_assert_eq!(
            &materializations[1].parents,
            &vec![AssetRelation::new(AssetKey::new(["table1"]).unwrap())]
        );
    }
}

#[test]
fn very_long_transparent_chain_does_not_overflow() {
    let result = execute(&chain_graph(2_000), 4);
    let materializations = result.materializations();
    assert_eq!(materializations.len(), 2);
    assert_eq!(
        materializations[1].parents,
        vec![AssetRelation::new(AssetKey::new(["table1"]).unwrap())]
    );
}
