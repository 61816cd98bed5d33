//! Pure combinators over the vault graph
//!
//! Edge reversal, the incrementally-maintained incoming-edge index, the
//! bidirectional spanning tree used for ASCII rendering, and the undirected
//! BFS neighborhood used by context nodes. Traversals ignore dangling and
//! self edges; the algebra itself preserves them.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{Edge, Graph, GraphNode};
use crate::types::NodeId;

/// Produce a graph with identical nodes and every edge between existing
/// nodes reversed. Labels are preserved. Edges to non-existent targets are
/// kept on their original source, so double application restores the
/// original graph modulo dangling targets.
pub fn reverse_graph_edges(graph: &Graph) -> Graph {
    let mut reversed = Graph::new();
    for (id, node) in &graph.nodes {
        let mut copy = node.clone();
        copy.outgoing_edges = Vec::new();
        reversed.nodes.insert(id.clone(), copy);
    }

    // Deterministic edge order: sources in lexicographic order, edges in
    // their author order.
    for source in graph.sorted_ids() {
        let node = &graph.nodes[&source];
        for edge in &node.outgoing_edges {
            if graph.contains(&edge.target) {
                let target_node = reversed
                    .nodes
                    .get_mut(&edge.target)
                    .expect("reversed graph has every node");
                target_node.push_edge_deduped(Edge::labeled(source.clone(), edge.label.clone()));
            } else {
                let source_node = reversed
                    .nodes
                    .get_mut(&source)
                    .expect("reversed graph has every node");
                source_node.push_edge_deduped(edge.clone());
            }
        }
    }
    reversed
}

/// "Who points at me?" index, maintained incrementally alongside the graph.
///
/// Keys are edge targets (including dangling ones); values are the source
/// ids, unique per target and kept in lexicographic order so incremental
/// maintenance and a from-scratch rebuild produce identical indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingIndex {
    map: HashMap<NodeId, Vec<NodeId>>,
}

impl IncomingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from scratch by scanning every node.
    pub fn build(graph: &Graph) -> Self {
        let mut index = Self::new();
        for source in graph.sorted_ids() {
            for edge in &graph.nodes[&source].outgoing_edges {
                index.add(&edge.target, &source);
            }
        }
        index
    }

    /// Sources with an edge to `target`, in lexicographic order.
    pub fn incomers(&self, target: &NodeId) -> &[NodeId] {
        self.map.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Update for an upsert: drop the contribution of the node's previous
    /// edges, then add the new ones.
    pub fn update_for_upsert(&mut self, node: &GraphNode, previous: Option<&GraphNode>) {
        if let Some(prev) = previous {
            for edge in &prev.outgoing_edges {
                self.remove(&edge.target, &prev.id);
            }
        }
        for edge in &node.outgoing_edges {
            self.add(&edge.target, &node.id);
        }
    }

    /// Update for a delete: drop the node's own contributions and its
    /// incomers entry.
    pub fn update_for_delete(&mut self, node: &GraphNode) {
        for edge in &node.outgoing_edges {
            self.remove(&edge.target, &node.id);
        }
        self.map.remove(&node.id);
    }

    fn add(&mut self, target: &NodeId, source: &NodeId) {
        let entry = self.map.entry(target.clone()).or_default();
        if let Err(pos) = entry.binary_search(source) {
            entry.insert(pos, source.clone());
        }
    }

    fn remove(&mut self, target: &NodeId, source: &NodeId) {
        if let Some(entry) = self.map.get_mut(target) {
            entry.retain(|s| s != source);
            if entry.is_empty() {
                self.map.remove(target);
            }
        }
    }
}

/// Neighbors of `id` reachable in one undirected hop: resolved outgoing
/// targets in edge order, then incomers in lexicographic order. Self and
/// dangling edges are skipped.
fn undirected_neighbors(graph: &Graph, index: &IncomingIndex, id: &NodeId) -> Vec<NodeId> {
    let mut neighbors = Vec::new();
    if let Some(node) = graph.get(id) {
        for edge in &node.outgoing_edges {
            if edge.target != *id && graph.contains(&edge.target) {
                neighbors.push(edge.target.clone());
            }
        }
    }
    // Incomers come pre-sorted from the index.
    neighbors.extend(
        index
            .incomers(id)
            .iter()
            .filter(|s| *s != id && graph.contains(s))
            .cloned(),
    );
    neighbors
}

/// DFS bidirectionally from `root`, keeping only the first edge discovered
/// to each vertex. The result contains the nodes of `root`'s undirected
/// component with edges re-oriented parent-to-child, so it is acyclic and
/// renders directly as a tree.
pub fn graph_to_spanning_tree(graph: &Graph, root: &NodeId) -> Graph {
    let mut tree = Graph::new();
    let Some(root_node) = graph.get(root) else {
        return tree;
    };

    let index = IncomingIndex::build(graph);
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![root.clone()];
    visited.insert(root.clone());

    let mut root_copy = root_node.clone();
    root_copy.outgoing_edges = Vec::new();
    tree.insert(root_copy);

    while let Some(current) = stack.pop() {
        for neighbor in undirected_neighbors(graph, &index, &current) {
            if visited.insert(neighbor.clone()) {
                let mut copy = graph.nodes[&neighbor].clone();
                copy.outgoing_edges = Vec::new();
                tree.insert(copy);
                // First edge discovered wins; the tree edge points down.
                tree.nodes
                    .get_mut(&current)
                    .expect("parent already in tree")
                    .push_edge_deduped(Edge::new(neighbor.clone()));
                stack.push(neighbor);
            }
        }
    }
    tree
}

/// Pre-order of a spanning tree rooted at `root`, children in edge order.
pub fn tree_preorder(tree: &Graph, root: &NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut stack = vec![root.clone()];
    let mut seen: HashSet<NodeId> = HashSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        order.push(current.clone());
        if let Some(node) = tree.get(&current) {
            for edge in node.outgoing_edges.iter().rev() {
                if tree.contains(&edge.target) {
                    stack.push(edge.target.clone());
                }
            }
        }
    }
    order
}

/// Render a spanning tree as an ASCII outline of node titles.
pub fn ascii_tree(tree: &Graph, root: &NodeId) -> String {
    let mut out = String::new();
    let Some(root_node) = tree.get(root) else {
        return out;
    };
    out.push_str(display_title(root_node));
    out.push('\n');
    render_children(tree, root, "", &mut out);
    out
}

fn display_title(node: &GraphNode) -> &str {
    if node.metadata.title.is_empty() {
        node.id.stem()
    } else {
        &node.metadata.title
    }
}

fn render_children(tree: &Graph, id: &NodeId, prefix: &str, out: &mut String) {
    let Some(node) = tree.get(id) else { return };
    let children: Vec<NodeId> = node
        .outgoing_edges
        .iter()
        .filter(|e| tree.contains(&e.target))
        .map(|e| e.target.clone())
        .collect();
    let count = children.len();
    for (i, child) in children.into_iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(display_title(&tree.nodes[&child]));
        out.push('\n');
        let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
        render_children(tree, &child, &child_prefix, out);
    }
}

/// Undirected BFS from `seed` up to `radius` hops. Returns visited ids in
/// BFS order, seed first. Empty when the seed is not in the graph.
pub fn bfs_neighborhood(graph: &Graph, seed: &NodeId, radius: usize) -> Vec<NodeId> {
    if !graph.contains(seed) {
        return Vec::new();
    }
    let index = IncomingIndex::build(graph);
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();

    visited.insert(seed.clone());
    order.push(seed.clone());
    queue.push_back((seed.clone(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth == radius {
            continue;
        }
        for neighbor in undirected_neighbors(graph, &index, &current) {
            if visited.insert(neighbor.clone()) {
                order.push(neighbor.clone());
                queue.push_back((neighbor, depth + 1));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, GraphNode};

    fn graph(edges: &[(&str, &str)]) -> Graph {
        let mut g = Graph::new();
        for (s, t) in edges {
            if !g.contains(&NodeId::new(*s)) {
                g.insert(GraphNode::new(*s));
            }
            if !g.contains(&NodeId::new(*t)) {
                g.insert(GraphNode::new(*t));
            }
            g.nodes
                .get_mut(&NodeId::new(*s))
                .unwrap()
                .push_edge_deduped(Edge::new(*t));
        }
        g
    }

    #[test]
    fn reversal_flips_existing_edges_and_keeps_dangling() {
        let mut g = graph(&[("/v/a.md", "/v/b.md")]);
        g.nodes
            .get_mut(&NodeId::new("/v/a.md"))
            .unwrap()
            .push_edge_deduped(Edge::new("ghost"));

        let r = reverse_graph_edges(&g);
        assert!(r.nodes[&NodeId::new("/v/b.md")].has_edge_to(&NodeId::new("/v/a.md")));
        assert!(r.nodes[&NodeId::new("/v/a.md")].has_edge_to(&NodeId::new("ghost")));
        assert!(!r.nodes[&NodeId::new("/v/a.md")].has_edge_to(&NodeId::new("/v/b.md")));

        let rr = reverse_graph_edges(&r);
        assert!(rr.nodes[&NodeId::new("/v/a.md")].has_edge_to(&NodeId::new("/v/b.md")));
        assert!(rr.nodes[&NodeId::new("/v/a.md")].has_edge_to(&NodeId::new("ghost")));
    }

    #[test]
    fn incoming_index_tracks_upserts_incrementally() {
        let g = graph(&[("/v/a.md", "/v/b.md"), ("/v/c.md", "/v/b.md")]);
        let mut index = IncomingIndex::build(&g);
        assert_eq!(
            index.incomers(&NodeId::new("/v/b.md")),
            &[NodeId::new("/v/a.md"), NodeId::new("/v/c.md")]
        );

        // Retarget a's edge from b to c.
        let previous = g.nodes[&NodeId::new("/v/a.md")].clone();
        let mut updated = previous.clone();
        updated.outgoing_edges = vec![Edge::new("/v/c.md")];
        index.update_for_upsert(&updated, Some(&previous));

        assert_eq!(index.incomers(&NodeId::new("/v/b.md")), &[NodeId::new("/v/c.md")]);
        assert_eq!(index.incomers(&NodeId::new("/v/c.md")), &[NodeId::new("/v/a.md")]);
    }

    #[test]
    fn incoming_index_delete_removes_both_directions() {
        let g = graph(&[("/v/a.md", "/v/b.md"), ("/v/b.md", "/v/c.md")]);
        let mut index = IncomingIndex::build(&g);
        index.update_for_delete(&g.nodes[&NodeId::new("/v/b.md")]);
        assert!(index.incomers(&NodeId::new("/v/b.md")).is_empty());
        assert!(index.incomers(&NodeId::new("/v/c.md")).is_empty());
    }

    #[test]
    fn spanning_tree_is_acyclic_on_cyclic_input() {
        // a -> b -> c -> a is a cycle; the tree must keep only first edges.
        let g = graph(&[
            ("/v/a.md", "/v/b.md"),
            ("/v/b.md", "/v/c.md"),
            ("/v/c.md", "/v/a.md"),
        ]);
        let tree = graph_to_spanning_tree(&g, &NodeId::new("/v/a.md"));
        assert_eq!(tree.len(), 3);
        let edge_count: usize = tree.nodes.values().map(|n| n.outgoing_edges.len()).sum();
        assert_eq!(edge_count, 2);
    }

    #[test]
    fn spanning_tree_follows_incoming_edges_too() {
        // child -> parent edges only; tree from parent must still reach child.
        let g = graph(&[("/v/child.md", "/v/parent.md")]);
        let tree = graph_to_spanning_tree(&g, &NodeId::new("/v/parent.md"));
        assert!(tree.contains(&NodeId::new("/v/child.md")));
    }

    #[test]
    fn bfs_neighborhood_respects_radius() {
        let g = graph(&[
            ("/v/b.md", "/v/a.md"),
            ("/v/c.md", "/v/b.md"),
            ("/v/d.md", "/v/c.md"),
        ]);
        let hood = bfs_neighborhood(&g, &NodeId::new("/v/a.md"), 2);
        assert_eq!(
            hood,
            vec![
                NodeId::new("/v/a.md"),
                NodeId::new("/v/b.md"),
                NodeId::new("/v/c.md"),
            ]
        );
    }

    #[test]
    fn ascii_tree_renders_titles_with_branch_glyphs() {
        let mut g = graph(&[("/v/root.md", "/v/kid.md"), ("/v/root.md", "/v/kid2.md")]);
        for (id, title) in [
            ("/v/root.md", "Root"),
            ("/v/kid.md", "Kid"),
            ("/v/kid2.md", "Kid Two"),
        ] {
            g.nodes.get_mut(&NodeId::new(id)).unwrap().metadata.title = title.to_string();
        }
        let tree = graph_to_spanning_tree(&g, &NodeId::new("/v/root.md"));
        let rendered = ascii_tree(&tree, &NodeId::new("/v/root.md"));
        assert!(rendered.starts_with("Root\n"));
        assert!(rendered.contains("── Kid"));
        assert!(rendered.contains("└── "));
    }
}
