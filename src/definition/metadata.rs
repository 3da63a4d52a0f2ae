/// Metadata entries attached to outputs and materialization events

use crate::definition::asset::AssetKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Json(Value),
    Path(String),
    Url(String),
    Asset(AssetKey),
}

impl MetadataValue {
    /// Stable name of the value type, used in comparison keys
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bool(_) => "bool",
            Self::Json(_) => "json",
            Self::Path(_) => "path",
            Self::Url(_) => "url",
            Self::Asset(_) => "asset",
        }
    }

    /// Canonical rendering of the value
    pub fn render(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) | Self::Path(v) | Self::Url(v) => v.clone(),
            Self::Bool(v) => v.to_string(),
            Self::Json(v) => v.to_string(),
            Self::Asset(key) => key.to_user_string(),
        }
    }
}

/// A labelled metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: String,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn new(label: impl Into<String>, value: MetadataValue) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }

    pub fn int(label: impl Into<String>, value: i64) -> Self {
        Self::new(label, MetadataValue::Int(value))
    }

    pub fn float(label: impl Into<String>, value: f64) -> Self {
        Self::new(label, MetadataValue::Float(value))
    }

    pub fn text(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, MetadataValue::Text(value.into()))
    }

    pub fn json(label: impl Into<String>, value: Value) -> Self {
        Self::new(label, MetadataValue::Json(value))
    }

    pub fn path(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, MetadataValue::Path(value.into()))
    }

    /// Declared comparison key: (label, value type, rendered value)
    ///
    /// Entries carry floats so they have no total order of their own; anything
    /// that compares entry lists sorts by this key first.
    pub fn sort_key(&self) -> (String, &'static str, String) {
        (self.label.clone(), self.value.type_name(), self.value.render())
    }
}

/// Sort entries by [`MetadataEntry::sort_key`], stable for equal keys
pub fn sort_entries(entries: &mut [MetadataEntry]) {
    entries.sort_by_cached_key(MetadataEntry::sort_key);
}

/// A metadata entry that applies to only one partition of a partitioned output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetadataEntry {
    pub partition: String,
    pub entry: MetadataEntry,
}

impl PartitionMetadataEntry {
    pub fn new(partition: impl Into<String>, entry: MetadataEntry) -> Self {
        Self {
            partition: partition.into(),
            entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_entries_orders_by_label_then_type() {
        let mut entries = vec![
            MetadataEntry::float("some value", 3.21),
            MetadataEntry::int("nrows", 123),
            MetadataEntry::text("nrows", "123"),
        ];
        sort_entries(&mut entries);
        let keys: Vec<_> = entries.iter().map(MetadataEntry::sort_key).collect();
        assert_eq!(keys[0], ("nrows".to_string(), "int", "123".to_string()));
        assert_eq!(keys[1], ("nrows".to_string(), "text", "123".to_string()));
        assert_eq!(keys[2].0, "some value");
    }

    #[test]
    fn metadata_value_serializes_tagged() {
        let entry = MetadataEntry::int("partition count", 492);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"label": "partition count", "value": {"type": "int", "value": 492}})
        );
    }
}
