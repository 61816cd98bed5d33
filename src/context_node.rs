//! Context nodes: materialized ego-neighborhood snapshots
//!
//! A context node freezes the BFS neighborhood of a seed node into a new
//! Markdown file: an ASCII spanning tree of the neighborhood followed by
//! each member's body in pre-order, with the captured id set recorded in
//! `containedNodeIds`. Agents later diff the frozen set against the live
//! graph to learn which nodes appeared near their topic since the snapshot.

use crate::codec;
use crate::contracts::UnseenNode;
use crate::errors::VaultError;
use crate::graph::{Graph, GraphNode, NodeMetadata};
use crate::graph_ops::{ascii_tree, bfs_neighborhood, graph_to_spanning_tree, tree_preorder};
use crate::types::{NodeId, Position};

/// Default BFS radius for context capture.
pub const DEFAULT_RADIUS: usize = 2;

/// Frontmatter keys recording the capture parameters.
pub const SEED_PROP: &str = "seedNodeId";
pub const RADIUS_PROP: &str = "contextRadius";

/// Build a context node capturing the neighborhood of `seed` up to
/// `radius` undirected hops. The node has no outgoing edges; its position
/// is the centroid of the positioned members.
pub fn build_context_node(
    graph: &Graph,
    seed: &NodeId,
    radius: usize,
    fresh_id: NodeId,
) -> Result<GraphNode, VaultError> {
    if !graph.contains(seed) {
        return Err(VaultError::unknown_node(seed.as_str()));
    }
    let contained = bfs_neighborhood(graph, seed, radius);

    let induced = {
        let mut sub = Graph::new();
        for id in &contained {
            let mut node = graph.nodes[id].clone();
            node.outgoing_edges
                .retain(|e| contained.contains(&e.target));
            sub.insert(node);
        }
        sub
    };
    let tree = graph_to_spanning_tree(&induced, seed);

    let mut body = ascii_tree(&tree, seed);
    body.push('\n');
    for id in tree_preorder(&tree, seed) {
        let member = codec::strip_placeholders(&graph.nodes[&id].content);
        let member = member.trim_end();
        if !member.is_empty() {
            body.push_str(member);
            body.push_str("\n\n");
        }
    }

    let positions: Vec<Position> = contained
        .iter()
        .filter_map(|id| graph.nodes[id].metadata.position)
        .collect();

    let mut metadata = NodeMetadata {
        is_context_node: true,
        contained_node_ids: Some(contained),
        position: Position::centroid(&positions),
        ..NodeMetadata::default()
    };
    metadata
        .additional_yaml_props
        .insert(SEED_PROP.to_string(), seed.to_string());
    metadata
        .additional_yaml_props
        .insert(RADIUS_PROP.to_string(), radius.to_string());
    metadata.title = codec::derive_title(None, "", &fresh_id);

    Ok(GraphNode {
        id: fresh_id,
        content: body,
        outgoing_edges: Vec::new(),
        metadata,
    })
}

/// The seed a context node was captured around: the recorded frontmatter
/// key when present, else the first contained id.
pub fn anchor_of(ctx: &GraphNode) -> Result<NodeId, VaultError> {
    if let Some(seed) = ctx.metadata.additional_yaml_props.get(SEED_PROP) {
        return Ok(NodeId::new(seed.clone()));
    }
    ctx.metadata
        .contained_node_ids
        .as_ref()
        .and_then(|ids| ids.first().cloned())
        .ok_or_else(|| VaultError::Integrity {
            node_id: ctx.id.to_string(),
            detail: "context node has no recorded seed".to_string(),
        })
}

fn radius_of(ctx: &GraphNode) -> usize {
    ctx.metadata
        .additional_yaml_props
        .get(RADIUS_PROP)
        .and_then(|r| r.parse().ok())
        .unwrap_or(DEFAULT_RADIUS)
}

/// Diff the live graph against a context node's frozen capture: nodes now
/// inside the recomputed neighborhood that were not contained at capture
/// time, in BFS order, with plain-text bodies.
pub fn unseen_nodes(graph: &Graph, ctx: &GraphNode) -> Result<Vec<UnseenNode>, VaultError> {
    let contained = ctx
        .metadata
        .contained_node_ids
        .as_ref()
        .ok_or_else(|| VaultError::Integrity {
            node_id: ctx.id.to_string(),
            detail: "node is not a context node".to_string(),
        })?;
    let anchor = anchor_of(ctx)?;
    let radius = radius_of(ctx);

    let current = bfs_neighborhood(graph, &anchor, radius);
    Ok(current
        .into_iter()
        .filter(|id| *id != ctx.id && !contained.contains(id))
        .map(|id| UnseenNode {
            body: codec::strip_placeholders(&graph.nodes[&id].content),
            id,
        })
        .collect())
}
