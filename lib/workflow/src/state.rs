//! Run-scoped execution state.

use crate::node::NodeId;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Key holding the event payload that started the run.
pub const TRIGGER_KEY: &str = "trigger";

/// Accumulated results of one workflow run.
///
/// Seeded with the trigger payload under `"trigger"`; the engine appends one
/// entry per completed node, keyed by node id. Keys keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExecutionState {
    entries: IndexMap<String, JsonValue>,
}

impl ExecutionState {
    /// Creates state for a new run.
    #[must_use]
    pub fn new(trigger: JsonValue) -> Self {
        let mut entries = IndexMap::new();
        entries.insert(TRIGGER_KEY.to_string(), trigger);
        Self { entries }
    }

    /// Returns the trigger payload.
    #[must_use]
    pub fn trigger(&self) -> &JsonValue {
        &self.entries[TRIGGER_KEY]
    }

    /// Returns the value stored under a namespace key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    /// Returns the output of a completed node.
    #[must_use]
    pub fn output(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.entries.get(node_id.as_str())
    }

    /// Walks a dotted path such as `trigger.items.0.name`.
    ///
    /// The first segment names a key; the rest select object fields, or array
    /// elements when numeric.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&JsonValue> {
        let mut segments = path.split('.');
        let mut current = self.entries.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns keys in creation order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record(&mut self, node_id: &NodeId, output: JsonValue) {
        self.entries.insert(node_id.to_string(), output);
    }
}
