//! Intent-to-delta derivation
//!
//! Converts high-level intents ("user created a child", "this file now has
//! that content", "delete this node") into minimal `GraphDelta`s, including
//! the ripple edits to neighbors. Parenthood is encoded as an outgoing edge
//! from child to parent. All functions are pure over their inputs.

use std::collections::{HashSet, VecDeque};

use crate::codec;
use crate::errors::VaultError;
use crate::graph::{Edge, Graph, GraphDelta, GraphNode, NodeDelta};
use crate::graph_ops::{ascii_tree, graph_to_spanning_tree, tree_preorder, IncomingIndex};
use crate::types::{NodeId, Position};

/// Resolve link-form edge targets against the graph by stem, preferring the
/// lexicographically smallest match. Path-form targets are left alone even
/// when dangling: they re-resolve only when the exact id returns.
pub fn resolve_edges(graph: &Graph, edges: &[Edge]) -> Vec<Edge> {
    edges
        .iter()
        .map(|edge| {
            if graph.contains(&edge.target) || !edge.target.is_link_form() {
                return edge.clone();
            }
            let mut candidates: Vec<&NodeId> = graph
                .nodes
                .keys()
                .filter(|id| id.matches_link(edge.target.as_str()))
                .collect();
            candidates.sort();
            match candidates.first() {
                Some(id) => Edge::labeled((*id).clone(), edge.label.clone()),
                None => edge.clone(),
            }
        })
        .collect()
}

/// A new child pointing at its parent, plus a no-op upsert of the parent so
/// one broadcast carries both ends of the new edge.
pub fn create_child(parent: &GraphNode, fresh_id: NodeId, position: Option<Position>) -> GraphDelta {
    let mut child = GraphNode::new(fresh_id);
    child.outgoing_edges = vec![Edge::new(parent.id.clone())];
    child.metadata.position = position;
    child.metadata.title = codec::derive_title(None, "", &child.id);

    GraphDelta::new(vec![
        NodeDelta::Upsert {
            node: child,
            previous: None,
        },
        NodeDelta::Upsert {
            node: parent.clone(),
            previous: Some(parent.clone()),
        },
    ])
}

/// A free-standing node with no edges at the supplied position.
pub fn create_orphan(fresh_id: NodeId, position: Position) -> GraphDelta {
    let mut node = GraphNode::new(fresh_id);
    node.metadata.position = Some(position);
    node.metadata.title = codec::derive_title(None, "", &node.id);
    GraphDelta::single(NodeDelta::Upsert {
        node,
        previous: None,
    })
}

/// Re-derive a node from a new body: wikilinks are re-extracted into edges
/// (resolved against the graph) and the title re-derived. Incoming edges
/// are unaffected, so no ripple is needed.
pub fn content_change(graph: &Graph, current: &GraphNode, new_body: &str) -> GraphDelta {
    let (content, edges) = codec::extract_links(new_body);
    let mut node = current.clone();
    node.outgoing_edges = resolve_edges(graph, &edges);
    node.metadata.title = codec::derive_title(
        node.metadata.additional_yaml_props.get("title").map(String::as_str),
        &content,
        &node.id,
    );
    node.content = content;
    GraphDelta::single(NodeDelta::Upsert {
        node,
        previous: Some(current.clone()),
    })
}

/// Delete `z` while preserving reachability: every incomer's edge to `z` is
/// replaced by edges to each of `z`'s outgoing targets (label preserved,
/// deduplicated against the incomer's existing edges), then `z` itself is
/// deleted. Upserts precede the delete so the renderer never observes a
/// dangling rewrite.
pub fn delete_maintaining_transitive_edges(
    graph: &Graph,
    index: &IncomingIndex,
    z: &NodeId,
) -> Result<GraphDelta, VaultError> {
    let node = graph.get(z).ok_or_else(|| VaultError::unknown_node(z.as_str()))?;

    let children: Vec<Edge> = node
        .outgoing_edges
        .iter()
        .filter(|e| e.target != *z)
        .cloned()
        .collect();

    let mut incomers: Vec<NodeId> = index
        .incomers(z)
        .iter()
        .filter(|p| *p != z && graph.contains(p))
        .cloned()
        .collect();
    incomers.sort();

    let child_displays: Vec<String> = children.iter().map(|c| edge_display(&c.target)).collect();

    let mut delta = GraphDelta::default();
    for incomer_id in incomers {
        let incomer = &graph.nodes[&incomer_id];
        let mut rewritten = incomer.clone();
        rewritten.outgoing_edges = Vec::new();
        for edge in &incomer.outgoing_edges {
            if edge.target == *z {
                for child in &children {
                    if child.target == incomer_id {
                        continue;
                    }
                    rewritten.push_edge_deduped(Edge::labeled(
                        child.target.clone(),
                        edge.label.clone(),
                    ));
                }
            } else {
                rewritten.push_edge_deduped(edge.clone());
            }
        }
        // Keep the body's link text in step with the rewritten edges.
        rewritten.content =
            codec::rewrite_links(&incomer.content, |t| z.matches_link(t), &child_displays);
        delta.push(NodeDelta::Upsert {
            node: rewritten,
            previous: Some(incomer.clone()),
        });
    }
    delta.push(NodeDelta::Delete { node_id: z.clone() });
    Ok(delta)
}

/// Merge a set of nodes into a representative.
///
/// The representative is the member with the most ancestors inside the
/// induced subgraph (following child-to-parent edges), ties broken by
/// lexicographic id. Its body becomes an ASCII spanning tree of the merged
/// set followed by each member's body in pre-order; its edges are the union
/// of edges leaving the set; its position is the centroid of positioned
/// members. External edges into the set are redirected to the
/// representative, and the other members are deleted.
pub fn merge(graph: &Graph, ids: &[NodeId]) -> Result<GraphDelta, VaultError> {
    if ids.len() < 2 {
        return Err(VaultError::Integrity {
            node_id: ids.first().map(|i| i.to_string()).unwrap_or_default(),
            detail: "merge requires at least two nodes".to_string(),
        });
    }
    for id in ids {
        if !graph.contains(id) {
            return Err(VaultError::unknown_node(id.as_str()));
        }
    }

    let set: HashSet<NodeId> = ids.iter().cloned().collect();
    let induced = induced_subgraph(graph, &set);
    let representative = pick_representative(&induced);

    // Body: spanning-tree header plus member bodies in pre-order.
    let tree = graph_to_spanning_tree(&induced, &representative);
    let mut order = tree_preorder(&tree, &representative);
    let mut missing: Vec<NodeId> = set
        .iter()
        .filter(|id| !order.contains(id))
        .cloned()
        .collect();
    missing.sort();
    order.extend(missing);

    let mut body = ascii_tree(&tree, &representative);
    body.push('\n');
    for id in &order {
        let member_body = codec::strip_placeholders(&graph.nodes[id].content);
        let member_body = member_body.trim_end();
        if !member_body.is_empty() {
            body.push_str(member_body);
            body.push_str("\n\n");
        }
    }

    // Outgoing edges: union of edges leaving the set, representative first.
    let mut merged = graph.nodes[&representative].clone();
    merged.outgoing_edges = Vec::new();
    let mut member_order: Vec<NodeId> = vec![representative.clone()];
    let mut rest: Vec<NodeId> = set
        .iter()
        .filter(|id| **id != representative)
        .cloned()
        .collect();
    rest.sort();
    member_order.extend(rest.clone());
    for member in &member_order {
        for edge in &graph.nodes[member].outgoing_edges {
            if !set.contains(&edge.target) {
                merged.push_edge_deduped(edge.clone());
            }
        }
    }

    let positions: Vec<Position> = member_order
        .iter()
        .filter_map(|id| graph.nodes[id].metadata.position)
        .collect();
    merged.metadata.position = Position::centroid(&positions).or(merged.metadata.position);
    merged.content = body;
    merged.metadata.title = codec::derive_title(
        merged
            .metadata
            .additional_yaml_props
            .get("title")
            .map(String::as_str),
        &merged.content,
        &merged.id,
    );

    let mut delta = GraphDelta::single(NodeDelta::Upsert {
        node: merged,
        previous: Some(graph.nodes[&representative].clone()),
    });

    // Redirect external incomers of any member to the representative.
    let mut externals: Vec<NodeId> = graph
        .nodes
        .keys()
        .filter(|id| !set.contains(id))
        .filter(|id| {
            graph.nodes[*id]
                .outgoing_edges
                .iter()
                .any(|e| set.contains(&e.target))
        })
        .cloned()
        .collect();
    externals.sort();
    let rep_display = vec![edge_display(&representative)];
    for external_id in externals {
        let external = &graph.nodes[&external_id];
        let mut rewritten = external.clone();
        rewritten.outgoing_edges = Vec::new();
        for edge in &external.outgoing_edges {
            if set.contains(&edge.target) {
                rewritten.push_edge_deduped(Edge::labeled(
                    representative.clone(),
                    edge.label.clone(),
                ));
            } else {
                rewritten.push_edge_deduped(edge.clone());
            }
        }
        rewritten.content = codec::rewrite_links(
            &external.content,
            |t| set.iter().any(|member| member.matches_link(t)),
            &rep_display,
        );
        delta.push(NodeDelta::Upsert {
            node: rewritten,
            previous: Some(external.clone()),
        });
    }

    for member in rest {
        delta.push(NodeDelta::Delete { node_id: member });
    }
    Ok(delta)
}

/// Link text a body placeholder should carry for an edge target.
fn edge_display(target: &NodeId) -> String {
    if target.is_link_form() {
        target.as_str().to_string()
    } else {
        target.stem().to_string()
    }
}

fn induced_subgraph(graph: &Graph, set: &HashSet<NodeId>) -> Graph {
    let mut sub = Graph::new();
    for id in set {
        let mut node = graph.nodes[id].clone();
        node.outgoing_edges.retain(|e| set.contains(&e.target));
        sub.insert(node);
    }
    sub
}

/// Ancestor count of `n` inside the induced subgraph: members reachable
/// from `n` via outgoing (child-to-parent) edges, excluding `n` itself.
fn ancestor_count(induced: &Graph, start: &NodeId) -> usize {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(start.clone());
    while let Some(current) = queue.pop_front() {
        if let Some(node) = induced.get(&current) {
            for edge in &node.outgoing_edges {
                if edge.target != *start && seen.insert(edge.target.clone()) {
                    queue.push_back(edge.target.clone());
                }
            }
        }
    }
    seen.len()
}

fn pick_representative(induced: &Graph) -> NodeId {
    let mut best: Option<(usize, NodeId)> = None;
    for id in induced.sorted_ids() {
        let count = ancestor_count(induced, &id);
        match &best {
            Some((best_count, _)) if *best_count >= count => {}
            _ => best = Some((count, id.clone())),
        }
    }
    best.expect("merge set is non-empty").1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph_with(edges: &[(&str, &str)], extra: &[&str]) -> Graph {
        let mut g = Graph::new();
        for (s, t) in edges {
            for id in [s, t] {
                if !g.contains(&NodeId::new(*id)) {
                    g.insert(GraphNode::new(*id));
                }
            }
            g.nodes
                .get_mut(&NodeId::new(*s))
                .unwrap()
                .push_edge_deduped(Edge::new(*t));
        }
        for id in extra {
            g.insert(GraphNode::new(*id));
        }
        g
    }

    #[test]
    fn create_child_points_child_at_parent() {
        let parent = GraphNode::new("/v/parent.md");
        let delta = create_child(&parent, NodeId::new("/v/child.md"), None);
        assert_eq!(delta.len(), 2);
        let NodeDelta::Upsert { node: child, previous } = &delta.deltas[0] else {
            panic!("expected upsert");
        };
        assert!(previous.is_none());
        assert_eq!(child.outgoing_edges, vec![Edge::new("/v/parent.md")]);
    }

    #[test]
    fn content_change_recomputes_edges_and_title() {
        let g = graph_with(&[], &["/v/a.md", "/v/B.md"]);
        let current = g.nodes[&NodeId::new("/v/a.md")].clone();
        let delta = content_change(&g, &current, "# New Title\n\nlink [[B]]\n");
        let NodeDelta::Upsert { node, .. } = &delta.deltas[0] else {
            panic!("expected upsert");
        };
        assert_eq!(node.metadata.title, "New Title");
        // The link-form target heals to the existing node id.
        assert_eq!(node.outgoing_edges, vec![Edge::new("/v/B.md")]);
        assert_eq!(node.content, "# New Title\n\nlink [B]*\n");
    }

    #[test]
    fn transitive_delete_skips_over_the_deleted_node() {
        // p -> z -> c must become p -> c.
        let g = graph_with(&[("/v/p.md", "/v/z.md"), ("/v/z.md", "/v/c.md")], &[]);
        let index = IncomingIndex::build(&g);
        let delta =
            delete_maintaining_transitive_edges(&g, &index, &NodeId::new("/v/z.md")).unwrap();

        let mut g2 = g.clone();
        g2.apply_delta(&delta);
        assert!(!g2.contains(&NodeId::new("/v/z.md")));
        assert!(g2.nodes[&NodeId::new("/v/p.md")].has_edge_to(&NodeId::new("/v/c.md")));
        // Upserts come before the delete.
        assert!(matches!(delta.deltas.last(), Some(NodeDelta::Delete { .. })));
    }

    #[test]
    fn transitive_delete_preserves_labels_and_dedupes() {
        let mut g = graph_with(&[("/v/z.md", "/v/c.md")], &["/v/p.md"]);
        g.nodes
            .get_mut(&NodeId::new("/v/p.md"))
            .unwrap()
            .outgoing_edges = vec![Edge::labeled("/v/z.md", "why"), Edge::new("/v/c.md")];
        let index = IncomingIndex::build(&g);
        let delta =
            delete_maintaining_transitive_edges(&g, &index, &NodeId::new("/v/z.md")).unwrap();

        let mut g2 = g.clone();
        g2.apply_delta(&delta);
        let p = &g2.nodes[&NodeId::new("/v/p.md")];
        // Existing p -> c wins over the rewritten labeled copy.
        assert_eq!(p.outgoing_edges, vec![Edge::new("/v/c.md")]);
    }

    #[test]
    fn delete_of_unknown_node_is_an_error() {
        let g = graph_with(&[], &["/v/a.md"]);
        let index = IncomingIndex::build(&g);
        let err =
            delete_maintaining_transitive_edges(&g, &index, &NodeId::new("/v/nope.md")).unwrap_err();
        assert!(matches!(err, VaultError::UnknownNode { .. }));
    }

    #[test]
    fn merge_picks_deepest_member_and_unions_outside_edges() {
        // child -> mid -> top (child has the most ancestors in the set),
        // mid also links outside the set.
        let mut g = graph_with(
            &[("/v/child.md", "/v/mid.md"), ("/v/mid.md", "/v/top.md")],
            &["/v/out.md"],
        );
        g.nodes
            .get_mut(&NodeId::new("/v/mid.md"))
            .unwrap()
            .push_edge_deduped(Edge::new("/v/out.md"));

        let ids = vec![
            NodeId::new("/v/child.md"),
            NodeId::new("/v/mid.md"),
            NodeId::new("/v/top.md"),
        ];
        let delta = merge(&g, &ids).unwrap();
        let NodeDelta::Upsert { node, .. } = &delta.deltas[0] else {
            panic!("expected representative upsert first");
        };
        assert_eq!(node.id, NodeId::new("/v/child.md"));
        assert_eq!(node.outgoing_edges, vec![Edge::new("/v/out.md")]);

        let mut g2 = g.clone();
        g2.apply_delta(&delta);
        assert!(g2.contains(&NodeId::new("/v/child.md")));
        assert!(!g2.contains(&NodeId::new("/v/mid.md")));
        assert!(!g2.contains(&NodeId::new("/v/top.md")));
    }

    #[test]
    fn merge_redirects_external_incomers_to_representative() {
        let g = graph_with(
            &[
                ("/v/b.md", "/v/a.md"),
                ("/v/outsider.md", "/v/a.md"),
                ("/v/outsider.md", "/v/b.md"),
            ],
            &[],
        );
        let ids = vec![NodeId::new("/v/a.md"), NodeId::new("/v/b.md")];
        let delta = merge(&g, &ids).unwrap();

        let mut g2 = g.clone();
        g2.apply_delta(&delta);
        // b had one ancestor (a) in the set; a had none. b is representative.
        assert!(g2.contains(&NodeId::new("/v/b.md")));
        let outsider = &g2.nodes[&NodeId::new("/v/outsider.md")];
        assert_eq!(outsider.outgoing_edges, vec![Edge::new("/v/b.md")]);
    }

    #[test]
    fn merge_position_is_centroid_of_positioned_members() {
        let mut g = graph_with(&[("/v/b.md", "/v/a.md")], &[]);
        g.nodes
            .get_mut(&NodeId::new("/v/a.md"))
            .unwrap()
            .metadata
            .position = Some(Position::new(0.0, 0.0));
        g.nodes
            .get_mut(&NodeId::new("/v/b.md"))
            .unwrap()
            .metadata
            .position = Some(Position::new(10.0, 10.0));
        let delta = merge(&g, &[NodeId::new("/v/a.md"), NodeId::new("/v/b.md")]).unwrap();
        let NodeDelta::Upsert { node, .. } = &delta.deltas[0] else {
            panic!("expected upsert");
        };
        assert_eq!(node.metadata.position, Some(Position::new(5.0, 5.0)));
    }
}
