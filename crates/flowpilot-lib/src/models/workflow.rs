// Workflow document models
//
// Value types for the remote workflow API: full documents as fetched and
// republished, and the partial fragments proposed by the assistant. Unknown
// fields on documents and nodes are retained through `serde(flatten)` so the
// sanitizer decides what reaches the remote API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connection lists keyed by source node id.
pub type ConnectionMap = BTreeMap<String, Vec<ConnectionSpec>>;

fn default_type_version() -> f64 {
    1.0
}

fn default_position() -> [f64; 2] {
    [0.0, 0.0]
}

/// A single node in a workflow document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default = "default_type_version")]
    pub type_version: f64,
    #[serde(default = "default_position")]
    pub position: [f64; 2],
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_fail: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Fields the remote service attaches that are not part of the accepted
    /// write schema. Stripped by the sanitizer.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            node_type: String::new(),
            type_version: default_type_version(),
            position: default_position(),
            parameters: Map::new(),
            continue_on_fail: None,
            disabled: None,
            notes: None,
            extra: Map::new(),
        }
    }
}

/// One outgoing connection entry under a source node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSpec {
    /// Target node id
    pub node: String,
    /// Connection type, e.g. "main"
    #[serde(rename = "type")]
    pub connection_type: String,
    /// Input index on the target node
    #[serde(default)]
    pub index: i64,
}

/// A partial workflow proposed by the assistant.
///
/// Transient: parsed out of assistant text, merged into a document once, then
/// discarded. Never trusted as-is; always sanitized before leaving the
/// process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowFragment {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: ConnectionMap,
}

impl WorkflowFragment {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.connections.is_empty()
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A full remote workflow document.
///
/// Treated as a value: fetched, transformed, republished. Never held as a
/// mutable reference across calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: ConnectionMap,
    #[serde(default = "empty_object")]
    pub settings: Value,
    #[serde(default = "empty_object")]
    pub static_data: Value,
    /// Read-only fields returned by the remote service (id, active, tags, ...)
    /// that must not be echoed back on writes. Stripped by the sanitizer.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDocument {
    /// An empty document, used when creating a workflow remotely before the
    /// first merge.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            connections: ConnectionMap::new(),
            settings: empty_object(),
            static_data: empty_object(),
            extra: Map::new(),
        }
    }
}

impl Default for WorkflowDocument {
    fn default() -> Self {
        Self::empty("")
    }
}
