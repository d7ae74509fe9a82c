// Workflow sanitizer
//
// Coerces workflow data to exactly the field set the remote API accepts.
// Two jobs:
// - `sanitize` strips a document down to the writable schema before a PUT,
//   defaulting anything missing so a malformed document cannot produce a
//   request the API rejects outright.
// - `fragment_from_value` turns untrusted assistant JSON into a fragment,
//   coercing field types instead of failing on them.

use serde_json::{Map, Value};

use crate::models::workflow::{
    ConnectionMap, ConnectionSpec, NodeSpec, WorkflowDocument, WorkflowFragment,
};

const DEFAULT_WORKFLOW_NAME: &str = "Untitled Workflow";
const DEFAULT_NODE_NAME: &str = "Node";
const DEFAULT_NODE_TYPE: &str = "n8n-nodes-base.start";
const DEFAULT_CONNECTION_TYPE: &str = "main";

pub struct WorkflowSanitizer;

impl WorkflowSanitizer {
    /// Reduce `doc` to the writable schema: `name`, `nodes`, `connections`,
    /// `settings`, `staticData`, with every field coerced or defaulted.
    /// Anything outside that set is dropped. Idempotent.
    pub fn sanitize(doc: &WorkflowDocument) -> WorkflowDocument {
        let name = if doc.name.trim().is_empty() {
            DEFAULT_WORKFLOW_NAME.to_string()
        } else {
            doc.name.clone()
        };

        let nodes = doc.nodes.iter().map(Self::sanitize_node).collect();

        let mut connections = ConnectionMap::new();
        for (source, entries) in &doc.connections {
            connections.insert(
                source.clone(),
                entries.iter().map(Self::sanitize_connection).collect(),
            );
        }

        WorkflowDocument {
            name,
            nodes,
            connections,
            settings: Self::object_or_empty(&doc.settings),
            static_data: Self::object_or_empty(&doc.static_data),
            extra: Map::new(),
        }
    }

    fn sanitize_node(node: &NodeSpec) -> NodeSpec {
        NodeSpec {
            id: node.id.clone(),
            name: if node.name.is_empty() {
                DEFAULT_NODE_NAME.to_string()
            } else {
                node.name.clone()
            },
            node_type: if node.node_type.is_empty() {
                DEFAULT_NODE_TYPE.to_string()
            } else {
                node.node_type.clone()
            },
            type_version: if node.type_version.is_finite() && node.type_version > 0.0 {
                node.type_version
            } else {
                1.0
            },
            position: node.position,
            parameters: node.parameters.clone(),
            continue_on_fail: node.continue_on_fail,
            disabled: node.disabled,
            notes: node.notes.clone(),
            extra: Map::new(),
        }
    }

    fn sanitize_connection(entry: &ConnectionSpec) -> ConnectionSpec {
        ConnectionSpec {
            node: entry.node.clone(),
            connection_type: if entry.connection_type.is_empty() {
                DEFAULT_CONNECTION_TYPE.to_string()
            } else {
                entry.connection_type.clone()
            },
            index: entry.index.max(0),
        }
    }

    fn object_or_empty(value: &Value) -> Value {
        match value {
            Value::Object(_) => value.clone(),
            _ => Value::Object(Map::new()),
        }
    }

    /// Best-effort coercion of untrusted JSON into a fragment.
    ///
    /// Returns `None` when the value holds no usable structure (no nodes and
    /// no connections). Connection entries without a target node are dropped,
    /// matching the remote schema's requirements.
    pub fn fragment_from_value(value: &Value) -> Option<WorkflowFragment> {
        let obj = value.as_object()?;

        let nodes: Vec<NodeSpec> = obj
            .get("nodes")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::node_from_value).collect())
            .unwrap_or_default();

        let mut connections = ConnectionMap::new();
        if let Some(conn_obj) = obj.get("connections").and_then(Value::as_object) {
            for (source, entries) in conn_obj {
                let Some(entries) = entries.as_array() else {
                    continue;
                };
                let list: Vec<ConnectionSpec> = entries
                    .iter()
                    .filter_map(Self::connection_from_value)
                    .collect();
                if !list.is_empty() {
                    connections.insert(source.clone(), list);
                }
            }
        }

        let fragment = WorkflowFragment { nodes, connections };
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }

    fn node_from_value(value: &Value) -> Option<NodeSpec> {
        let obj = value.as_object()?;
        Some(NodeSpec {
            id: Self::coerce_string(obj.get("id")).unwrap_or_default(),
            name: Self::coerce_string(obj.get("name"))
                .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            node_type: Self::coerce_string(obj.get("type"))
                .unwrap_or_else(|| DEFAULT_NODE_TYPE.to_string()),
            type_version: Self::coerce_number(obj.get("typeVersion")).unwrap_or(1.0),
            position: Self::coerce_position(obj.get("position")),
            parameters: obj
                .get("parameters")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            continue_on_fail: obj.get("continueOnFail").and_then(Value::as_bool),
            disabled: obj.get("disabled").and_then(Value::as_bool),
            notes: Self::coerce_string(obj.get("notes")),
            extra: Map::new(),
        })
    }

    fn connection_from_value(value: &Value) -> Option<ConnectionSpec> {
        let obj = value.as_object()?;
        let node = Self::coerce_string(obj.get("node")).filter(|n| !n.is_empty())?;
        Some(ConnectionSpec {
            node,
            connection_type: Self::coerce_string(obj.get("type"))
                .unwrap_or_else(|| DEFAULT_CONNECTION_TYPE.to_string()),
            index: Self::coerce_number(obj.get("index")).unwrap_or(0.0) as i64,
        })
    }

    fn coerce_string(value: Option<&Value>) -> Option<String> {
        match value? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn coerce_number(value: Option<&Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Accept `[x, y]` arrays or `{x, y}` objects; anything else lands at the
    /// origin (the merger re-lays incoming nodes out anyway).
    fn coerce_position(value: Option<&Value>) -> [f64; 2] {
        match value {
            Some(Value::Array(items)) if items.len() >= 2 => [
                Self::coerce_number(items.first()).unwrap_or(0.0),
                Self::coerce_number(items.get(1)).unwrap_or(0.0),
            ],
            Some(Value::Object(obj)) => [
                Self::coerce_number(obj.get("x")).unwrap_or(0.0),
                Self::coerce_number(obj.get("y")).unwrap_or(0.0),
            ],
            _ => [0.0, 0.0],
        }
    }
}
