//! Graph data model and the delta algebra
//!
//! Every mutation in the engine — UI intents, agent writes, filesystem
//! events — is expressed as a `GraphDelta`: an ordered sequence of node
//! upserts and deletes. Applying a delta is deterministic and composable:
//! applying `a` then `b` equals applying their concatenation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{NodeId, Position};

/// A directed edge from its source node to `target`.
///
/// Edge order within a source is author-visible (first occurrence in the
/// Markdown body). The target may be dangling — either link-form text that
/// has not resolved yet, or the id of a node that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub target: NodeId,
    pub label: String,
}

impl Edge {
    pub fn new(target: impl Into<NodeId>) -> Self {
        Self {
            target: target.into(),
            label: String::new(),
        }
    }

    pub fn labeled(target: impl Into<NodeId>, label: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            label: label.into(),
        }
    }
}

/// UI-facing node metadata, round-tripped through YAML frontmatter.
///
/// `title` is derived (frontmatter `title`, else first short heading, else
/// cleaned filename) and is never serialized back to YAML. Unrecognized
/// frontmatter keys survive verbatim in `additional_yaml_props`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
    pub color: Option<String>,
    pub position: Option<Position>,
    pub title: String,
    pub is_context_node: bool,
    pub contained_node_ids: Option<Vec<NodeId>>,
    pub additional_yaml_props: IndexMap<String, String>,
}

/// A node of the vault graph, keyed by its absolute file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    /// Body text with YAML stripped and each wikilink replaced by a
    /// `[target]*` placeholder, so body edits and edge edits compose.
    pub content: String,
    /// Ordered outgoing edges; duplicates by target are forbidden per source.
    pub outgoing_edges: Vec<Edge>,
    pub metadata: NodeMetadata,
}

impl GraphNode {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            outgoing_edges: Vec::new(),
            metadata: NodeMetadata::default(),
        }
    }

    /// Append an edge unless the target is already linked from this node.
    pub fn push_edge_deduped(&mut self, edge: Edge) {
        if !self.outgoing_edges.iter().any(|e| e.target == edge.target) {
            self.outgoing_edges.push(edge);
        }
    }

    pub fn has_edge_to(&self, target: &NodeId) -> bool {
        self.outgoing_edges.iter().any(|e| &e.target == target)
    }
}

/// One element of a `GraphDelta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDelta {
    /// Replace (or create) the node under its id. `previous` is the state
    /// of the node immediately before the delta applies, `None` on first
    /// appearance; it lets the incoming-edge index update incrementally.
    Upsert {
        node: GraphNode,
        previous: Option<GraphNode>,
    },
    /// Remove the node. Callers are expected to pre-expand deletes with the
    /// transitive edge rewrites so incoming edges skip over the deleted node.
    Delete { node_id: NodeId },
}

impl NodeDelta {
    pub fn node_id(&self) -> &NodeId {
        match self {
            NodeDelta::Upsert { node, .. } => &node.id,
            NodeDelta::Delete { node_id } => node_id,
        }
    }
}

/// An ordered sequence of node deltas, applied atomically from the UI's
/// perspective: one broadcast message carries the whole delta.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDelta {
    pub deltas: Vec<NodeDelta>,
}

impl GraphDelta {
    pub fn new(deltas: Vec<NodeDelta>) -> Self {
        Self { deltas }
    }

    pub fn single(delta: NodeDelta) -> Self {
        Self {
            deltas: vec![delta],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDelta> {
        self.deltas.iter()
    }

    pub fn push(&mut self, delta: NodeDelta) {
        self.deltas.push(delta);
    }

    pub fn extend(&mut self, other: GraphDelta) {
        self.deltas.extend(other.deltas);
    }
}

/// The in-memory vault graph: a mapping from node id to node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: HashMap<NodeId, GraphNode>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn insert(&mut self, node: GraphNode) -> Option<GraphNode> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<GraphNode> {
        self.nodes.remove(id)
    }

    /// Node ids in lexicographic order, for deterministic traversals.
    pub fn sorted_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fold a delta into the graph in element order.
    ///
    /// Upserts replace the node under its id (creating if absent); deletes
    /// remove it. Edges pointing at a deleted node simply become dangling
    /// unless the delta carries the expanded rewrites.
    pub fn apply_delta(&mut self, delta: &GraphDelta) {
        for d in delta.iter() {
            match d {
                NodeDelta::Upsert { node, .. } => {
                    self.nodes.insert(node.id.clone(), node.clone());
                }
                NodeDelta::Delete { node_id } => {
                    self.nodes.remove(node_id);
                }
            }
        }
    }
}
