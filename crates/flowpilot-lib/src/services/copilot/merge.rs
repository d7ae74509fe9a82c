// Workflow merger
//
// Folds an assistant-proposed fragment into an existing workflow document:
// fresh row layout for the incoming nodes, id/name collision avoidance, and
// append-only connection handling. Pure transform; the existing document is
// never mutated.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::models::workflow::{NodeSpec, WorkflowDocument, WorkflowFragment};

/// Horizontal gap between the last existing node and the new row, and between
/// nodes within the row.
const X_SPACING: f64 = 200.0;
/// Vertical gap below the lowest existing node.
const Y_SPACING: f64 = 50.0;
/// Where the row starts on an empty canvas.
const EMPTY_CANVAS_ORIGIN: f64 = 100.0;

pub struct WorkflowMerger;

impl WorkflowMerger {
    /// Merge `fragment` into `existing`, returning the combined document.
    ///
    /// Incoming nodes are laid out in a single row to the right of and below
    /// every existing node; their proposed coordinates are discarded. Ids and
    /// names are made unique within the merged document, and fragment
    /// connections are re-keyed to any rewritten ids before being appended to
    /// the existing connection lists.
    pub fn merge(existing: &WorkflowDocument, fragment: &WorkflowFragment) -> WorkflowDocument {
        let mut result = existing.clone();

        let (offset_x, offset_y) = Self::layout_offsets(&result.nodes);

        let mut used_ids: HashSet<String> = result.nodes.iter().map(|n| n.id.clone()).collect();
        let mut used_names: HashSet<String> = result.nodes.iter().map(|n| n.name.clone()).collect();
        let mut renamed_ids: HashMap<String, String> = HashMap::new();

        for (index, incoming) in fragment.nodes.iter().enumerate() {
            let mut node = incoming.clone();
            node.position = [offset_x + index as f64 * X_SPACING, offset_y];

            let original_id = node.id.clone();
            node.id = Self::unique_id(&node.id, &mut used_ids);
            if !original_id.is_empty() && original_id != node.id {
                renamed_ids.insert(original_id, node.id.clone());
            }
            node.name = Self::unique_name(&node.name, &mut used_names);

            result.nodes.push(node);
        }

        for (source, entries) in &fragment.connections {
            let source = renamed_ids.get(source).unwrap_or(source).clone();
            let list = result.connections.entry(source).or_default();
            for entry in entries {
                let mut entry = entry.clone();
                if let Some(new_id) = renamed_ids.get(&entry.node) {
                    entry.node = new_id.clone();
                }
                list.push(entry);
            }
        }

        result
    }

    /// Row origin derived from the bounding extent of the existing nodes.
    fn layout_offsets(nodes: &[NodeSpec]) -> (f64, f64) {
        let mut max_x: f64 = 0.0;
        let mut max_y: f64 = 0.0;
        for node in nodes {
            max_x = max_x.max(node.position[0]);
            max_y = max_y.max(node.position[1]);
        }

        let offset_x = if max_x > 0.0 {
            max_x + X_SPACING
        } else {
            EMPTY_CANVAS_ORIGIN
        };
        let offset_y = if max_y > 0.0 {
            max_y + Y_SPACING
        } else {
            EMPTY_CANVAS_ORIGIN
        };
        (offset_x, offset_y)
    }

    /// Pick an id not yet in `used`, registering the result. Empty ids get a
    /// generated UUID; colliding ids get a numeric suffix.
    fn unique_id(id: &str, used: &mut HashSet<String>) -> String {
        let candidate = if id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };

        let unique = if used.contains(&candidate) {
            let mut n = 2;
            loop {
                let suffixed = format!("{}-{}", candidate, n);
                if !used.contains(&suffixed) {
                    break suffixed;
                }
                n += 1;
            }
        } else {
            candidate
        };

        used.insert(unique.clone());
        unique
    }

    /// Pick a display name not yet in `used`, registering the result.
    fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
        let base = if name.is_empty() { "Node" } else { name };

        let unique = if used.contains(base) {
            let mut n = 2;
            loop {
                let suffixed = format!("{} {}", base, n);
                if !used.contains(&suffixed) {
                    break suffixed;
                }
                n += 1;
            }
        } else {
            base.to_string()
        };

        used.insert(unique.clone());
        unique
    }
}
