/// Asset identity and partition types
///
/// AssetKeys are structural path identifiers; partition sets keep the order in
/// which partitions were declared so fan-out emits events deterministically.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Path-structured identifier of a persistent data artifact
///
/// Equality, ordering and hashing are structural over the path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    /// Build a key from path segments
    ///
    /// Fails with a ConfigurationError if the path or any segment is empty.
    pub fn new<I, S>(path: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = path.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(Error::configuration("asset key must have at least one path segment"));
        }
        if let Some(pos) = segments.iter().position(String::is_empty) {
            return Err(Error::configuration(format!(
                "asset key segment {} is empty in {:?}",
                pos, segments
            )));
        }
        Ok(Self(segments))
    }

    /// Parse a slash-separated user string such as `produce/outputA`
    pub fn parse(path: &str) -> Result<Self> {
        Self::new(path.split('/'))
    }

    /// Path segments, outermost first
    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// Slash-joined representation used in logs and queries
    pub fn to_user_string(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

/// Ordered set of partition identifiers
///
/// Iteration follows declaration order; duplicates are dropped on construction.
/// Equality is set equality so `{0,1}` and `{1,0}` compare equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSet(Vec<String>);

impl PartitionSet {
    /// Build a set from partition ids in declared order
    pub fn new<I, S>(partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for partition in partitions.into_iter().map(Into::into) {
            if seen.insert(partition.clone()) {
                ordered.push(partition);
            }
        }
        Self(ordered)
    }

    /// Set holding exactly one partition
    pub fn single(partition: impl Into<String>) -> Self {
        Self(vec![partition.into()])
    }

    pub fn contains(&self, partition: &str) -> bool {
        self.0.iter().any(|p| p == partition)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Partition ids in declared order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when every partition of `self` is also in `other`
    pub fn is_subset(&self, other: &PartitionSet) -> bool {
        self.iter().all(|p| other.contains(p))
    }

    /// Partitions of `self` missing from `other`, in declared order
    pub fn difference<'a>(&'a self, other: &'a PartitionSet) -> Vec<&'a str> {
        self.iter().filter(|p| !other.contains(p)).collect()
    }
}

impl PartialEq for PartitionSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset(other)
    }
}

impl Eq for PartitionSet {}

impl<S: Into<String>> FromIterator<S> for PartitionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Which partitions of an upstream output an edge consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScope {
    /// Every partition the upstream output produces (or the whole unpartitioned value).
    All,
    /// Only the listed partitions.
    Subset(PartitionSet),
}

impl PartitionScope {
    pub fn from_constraint(constraint: Option<&PartitionSet>) -> Self {
        match constraint {
            Some(set) => Self::Subset(set.clone()),
            None => Self::All,
        }
    }
}

/// A parent asset consumed by a materialization
///
/// `partitions == None` means all partitions of the parent were consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRelation {
    pub asset_key: AssetKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionSet>,
}

impl AssetRelation {
    /// Relation over every partition of `asset_key`
    pub fn new(asset_key: AssetKey) -> Self {
        Self {
            asset_key,
            partitions: None,
        }
    }

    /// Relation scoped to a partition subset
    pub fn with_partitions(asset_key: AssetKey, partitions: PartitionSet) -> Self {
        Self {
            asset_key,
            partitions: Some(partitions),
        }
    }
}

impl fmt::Display for AssetRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partitions {
            Some(parts) => write!(
                f,
                "{}[{}]",
                self.asset_key,
                parts.iter().collect::<Vec<_>>().join(",")
            ),
            None => write!(f, "{}", self.asset_key),
        }
    }
}
