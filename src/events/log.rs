/// Append-only event log
///
/// The core only appends and reads; it never mutates or removes entries.
/// Persistence engines are external collaborators implementing [`EventLog`];
/// `InMemoryEventLog` is the in-process implementation.

use crate::definition::asset::AssetKey;
use crate::error::{Error, Result};
use crate::events::{EventType, RunEvent};
use crate::runtime::RunId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Criteria for [`EventLog::query`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub run_id: Option<RunId>,
    pub event_type: Option<EventType>,
    /// Only materializations of this asset
    pub asset_key: Option<AssetKey>,
    /// Only materializations of one of these partitions
    pub partitions: Option<Vec<String>>,
    /// Only events strictly before this instant
    pub before: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Materializations of `asset_key`
    pub fn asset(mut self, asset_key: AssetKey) -> Self {
        self.event_type = Some(EventType::StepMaterialization);
        self.asset_key = Some(asset_key);
        self
    }

    pub fn partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = Some(partitions.into_iter().map(Into::into).collect());
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every criterion except `limit`
    pub fn matches(&self, event: &RunEvent) -> bool {
        if self.run_id.is_some_and(|run_id| run_id != event.run_id) {
            return false;
        }
        if self.event_type.is_some_and(|t| t != event.event_type()) {
            return false;
        }
        if self.before.is_some_and(|before| event.timestamp >= before) {
            return false;
        }
        if let Some(asset_key) = &self.asset_key {
            match event.materialization() {
                Some(m) if &m.asset_key == asset_key => {}
                _ => return false,
            }
        }
        if let Some(partitions) = &self.partitions {
            match event.partition() {
                Some(p) if partitions.iter().any(|wanted| wanted == p) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Append-only, run-scoped event store
///
/// `append` must be safe to call concurrently from several steps.
pub trait EventLog: Send + Sync + fmt::Debug {
    /// Append one event to its run's log
    fn append(&self, event: RunEvent) -> Result<()>;

    /// Every event of a run, in append order
    fn read(&self, run_id: RunId) -> Result<Vec<RunEvent>>;

    /// Events across runs matching `filter`, in append order
    fn query(&self, filter: &EventFilter) -> Result<Vec<RunEvent>>;
}

/// Event log kept in process memory
///
/// Events live in one global sequence so cross-run queries keep append order;
/// a per-run index gives O(run size) reads.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    inner: RwLock<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<RunEvent>,
    by_run: HashMap<RunId, Vec<usize>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across runs
    pub fn len(&self) -> usize {
        self.inner.read().map(|state| state.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, event: RunEvent) -> Result<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| Error::event_log("event log lock poisoned"))?;
        let position = state.events.len();
        state.by_run.entry(event.run_id).or_default().push(position);
        state.events.push(event);
        Ok(())
    }

    fn read(&self, run_id: RunId) -> Result<Vec<RunEvent>> {
        let state = self
            .inner
            .read()
            .map_err(|_| Error::event_log("event log lock poisoned"))?;
        Ok(state
            .by_run
            .get(&run_id)
            .map(|positions| positions.iter().map(|&i| state.events[i].clone()).collect())
            .unwrap_or_default())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<RunEvent>> {
        let candidates = match filter.run_id {
            Some(run_id) => self.read(run_id)?,
            None => self
                .inner
                .read()
                .map_err(|_| Error::event_log("event log lock poisoned"))?
                .events
                .clone(),
        };
        let mut matched: Vec<RunEvent> = candidates.into_iter().filter(|e| filter.matches(e)).collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Materialization};
    use std::sync::Arc;

    fn materialization(run_id: RunId, key: &str, partition: Option<&str>) -> RunEvent {
        RunEvent::step(
            run_id,
            "producer",
            EventKind::StepMaterialization(Materialization {
                asset_key: AssetKey::new([key]).unwrap(),
                partition: partition.map(str::to_string),
                parents: vec![],
                metadata: vec![],
            }),
        )
    }

    #[test]
    fn read_returns_only_the_run_in_append_order() {
        let log = InMemoryEventLog::new();
        let run_a = RunId::new();
        let run_b = RunId::new();
        log.append(RunEvent::step(run_a, "s1", EventKind::StepStart)).unwrap();
        log.append(RunEvent::step(run_b, "s1", EventKind::StepStart)).unwrap();
        log.append(RunEvent::step(run_a, "s1", EventKind::StepSuccess { duration_ms: 3 })).unwrap();

        let events = log.read(run_a).unwrap();
        let types: Vec<_> = events.iter().map(RunEvent::event_type).collect();
        assert_eq!(types, vec![EventType::StepStart, EventType::StepSuccess]);
        assert!(log.read(RunId::new()).unwrap().is_empty());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn query_by_asset_partition_and_limit() {
        let log = InMemoryEventLog::new();
        let first = RunId::new();
        let second = RunId::new();
        for p in ["0", "1", "2"] {
            log.append(materialization(first, "table1", Some(p))).unwrap();
        }
        log.append(materialization(first, "table2", None)).unwrap();
        log.append(materialization(second, "table1", Some("0"))).unwrap();

        let table1 = AssetKey::new(["table1"]).unwrap();
        let all = log.query(&EventFilter::new().asset(table1.clone())).unwrap();
        assert_eq!(all.len(), 4);

        let zero = log
            .query(&EventFilter::new().asset(table1.clone()).partitions(["0"]))
            .unwrap();
        assert_eq!(zero.len(), 2);

        let latest = log.query(&EventFilter::new().asset(table1).limit(1)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, second);
    }

    #[test]
    fn query_before_timestamp() {
        let log = InMemoryEventLog::new();
        let run_id = RunId::new();
        log.append(RunEvent::step(run_id, "s", EventKind::StepStart)).unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(60);
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(log.query(&EventFilter::new().before(cutoff)).unwrap().len(), 1);
        assert!(log.query(&EventFilter::new().before(past)).unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let log = Arc::new(InMemoryEventLog::new());
        let run_id = RunId::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        log.append(RunEvent::step(run_id, format!("s{i}"), EventKind::StepStart))
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(log.read(run_id).unwrap().len(), 400);
    }
}
