/// Asset-level lineage graph
///
/// Folds materialization events into a petgraph DiGraph of assets (parent →
/// child) for upstream/downstream queries. Assets seen only as parents are
/// nodes without producers.

use crate::definition::asset::AssetKey;
use crate::events::{Materialization, RunEvent};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// One observed asset
#[derive(Debug, Clone)]
pub struct AssetNode {
    pub asset_key: AssetKey,
    /// Step keys that materialized this asset
    pub producers: BTreeSet<String>,
    /// Distinct partitions materialized
    pub partitions: BTreeSet<String>,
    pub materialization_count: usize,
    /// Most recent materialization event, by log order
    pub latest: Option<RunEvent>,
}

/// Lineage graph over asset keys
#[derive(Debug, Default)]
pub struct AssetGraph {
    graph: DiGraph<AssetNode, ()>,
    index: HashMap<AssetKey, NodeIndex>,
}

impl AssetGraph {
    /// Build from events in log order; non-materialization events are ignored
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a RunEvent>) -> Self {
        let mut graph = Self::default();
        for event in events {
            if let Some(materialization) = event.materialization() {
                graph.record(event, materialization);
            }
        }
        tracing::debug!("🕸️ Asset graph built with {} assets and {} edges",
            graph.graph.node_count(), graph.graph.edge_count());
        graph
    }

    fn record(&mut self, event: &RunEvent, materialization: &Materialization) {
        let child = self.node_index(&materialization.asset_key);
        {
            let node = &mut self.graph[child];
            if let Some(step_key) = &event.step_key {
                node.producers.insert(step_key.clone());
            }
            if let Some(partition) = &materialization.partition {
                node.partitions.insert(partition.clone());
            }
            node.materialization_count += 1;
            node.latest = Some(event.clone());
        }

        for parent in &materialization.parents {
            let parent_idx = self.node_index(&parent.asset_key);
            if parent_idx != child && self.graph.find_edge(parent_idx, child).is_none() {
                self.graph.add_edge(parent_idx, child, ());
            }
        }
    }

    fn node_index(&mut self, asset_key: &AssetKey) -> NodeIndex {
        if let Some(&idx) = self.index.get(asset_key) {
            return idx;
        }
        let idx = self.graph.add_node(AssetNode {
            asset_key: asset_key.clone(),
            producers: BTreeSet::new(),
            partitions: BTreeSet::new(),
            materialization_count: 0,
            latest: None,
        });
        self.index.insert(asset_key.clone(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, asset_key: &AssetKey) -> bool {
        self.index.contains_key(asset_key)
    }

    pub fn node(&self, asset_key: &AssetKey) -> Option<&AssetNode> {
        self.index.get(asset_key).map(|&idx| &self.graph[idx])
    }

    /// All asset keys, sorted
    pub fn asset_keys(&self) -> Vec<&AssetKey> {
        let mut keys: Vec<_> = self.index.keys().collect();
        keys.sort();
        keys
    }

    /// Latest materialization of an asset
    pub fn latest_materialization(&self, asset_key: &AssetKey) -> Option<&Materialization> {
        self.node(asset_key)
            .and_then(|node| node.latest.as_ref())
            .and_then(RunEvent::materialization)
    }

    /// Direct parents, sorted
    pub fn parents(&self, asset_key: &AssetKey) -> Vec<&AssetKey> {
        self.neighbors(asset_key, Direction::Incoming)
    }

    /// Direct children, sorted
    pub fn children(&self, asset_key: &AssetKey) -> Vec<&AssetKey> {
        self.neighbors(asset_key, Direction::Outgoing)
    }

    /// Every transitive ancestor, sorted
    pub fn upstream(&self, asset_key: &AssetKey) -> Vec<&AssetKey> {
        self.reachable(asset_key, Direction::Incoming)
    }

    /// Every transitive descendant, sorted
    pub fn downstream(&self, asset_key: &AssetKey) -> Vec<&AssetKey> {
        self.reachable(asset_key, Direction::Outgoing)
    }

    fn neighbors(&self, asset_key: &AssetKey, direction: Direction) -> Vec<&AssetKey> {
        let Some(&idx) = self.index.get(asset_key) else {
            return Vec::new();
        };
        let mut keys: Vec<_> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| &self.graph[n].asset_key)
            .collect();
        keys.sort();
        keys
    }

    /// BFS from `asset_key`, excluding the start node
    fn reachable(&self, asset_key: &AssetKey, direction: Direction) -> Vec<&AssetKey> {
        let Some(&start) = self.index.get(asset_key) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut keys = Vec::new();
        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, direction) {
                if seen.insert(next) {
                    keys.push(&self.graph[next].asset_key);
                    queue.push_back(next);
                }
            }
        }
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::asset::AssetRelation;
    use crate::events::EventKind;
    use crate::runtime::RunId;

    fn key(path: &str) -> AssetKey {
        AssetKey::parse(path).unwrap()
    }

    fn materialized(run_id: RunId, step: &str, asset: &str, partition: Option<&str>, parents: &[&str]) -> RunEvent {
        RunEvent::step(
            run_id,
            step,
            EventKind::StepMaterialization(Materialization {
                asset_key: key(asset),
                partition: partition.map(str::to_string),
                parents: parents.iter().map(|p| AssetRelation::new(key(p))).collect(),
                metadata: vec![],
            }),
        )
    }

    #[test]
    fn diamond_queries() {
        let run_id = RunId::new();
        let events = vec![
            materialized(run_id, "produce", "produce/outputA", None, &[]),
            materialized(run_id, "produce", "produce/outputB", None, &[]),
            RunEvent::step(run_id, "combine", EventKind::StepStart),
            materialized(run_id, "combine", "combine/outputC", None, &["produce/outputA", "produce/outputB"]),
            materialized(run_id, "report", "report", None, &["combine/outputC"]),
        ];
        let graph = AssetGraph::from_events(&events);

        assert_eq!(graph.len(), 4);
        assert_eq!(
            graph.parents(&key("combine/outputC")),
            vec![&key("produce/outputA"), &key("produce/outputB")]
        );
        assert_eq!(graph.children(&key("produce/outputA")), vec![&key("combine/outputC")]);
        assert_eq!(graph.upstream(&key("report")).len(), 3);
        assert_eq!(
            graph.downstream(&key("produce/outputB")),
            vec![&key("combine/outputC"), &key("report")]
        );
        assert!(graph.upstream(&key("missing")).is_empty());
    }

    #[test]
    fn latest_materialization_and_partitions() {
        let first = RunId::new();
        let second = RunId::new();
        let events = vec![
            materialized(first, "solid1", "table1", Some("0"), &[]),
            materialized(first, "solid1", "table1", Some("1"), &[]),
            materialized(second, "solid1_again", "table1", Some("0"), &["external"]),
        ];
        let graph = AssetGraph::from_events(&events);
        let node = graph.node(&key("table1")).unwrap();

        assert_eq!(node.materialization_count, 3);
        assert_eq!(node.partitions.len(), 2);
        assert_eq!(node.producers.len(), 2);
        assert_eq!(node.latest.as_ref().map(|e| e.run_id), Some(second));
        assert_eq!(graph.latest_materialization(&key("table1")).unwrap().parents.len(), 1);

        let external = graph.node(&key("external")).unwrap();
        assert!(external.producers.is_empty());
        assert!(external.latest.is_none());
    }
}
