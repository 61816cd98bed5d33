//! Deterministic position seeding for unpositioned nodes
//!
//! The loader runs this after folding a vault: nodes that already carry a
//! position (from YAML or the persisted recent-positions override) are left
//! untouched; everything else gets a seeded position derived from its
//! parent's position and its sibling index. Roots are laid out on a circle
//! around the origin. The result depends only on the graph, never on file
//! iteration order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::f64::consts::TAU;

use crate::graph::Graph;
use crate::graph_ops::IncomingIndex;
use crate::types::{NodeId, Position};

/// Radius of the circle root nodes are placed on.
const ROOT_RADIUS: f64 = 600.0;

/// Distance from a parent at which its children fan out.
const CHILD_RADIUS: f64 = 220.0;

/// Seeded position for the k-th of n root nodes.
pub fn root_position(index: usize, total: usize) -> Position {
    let n = total.max(1) as f64;
    let angle = TAU * (index as f64) / n;
    Position::new(ROOT_RADIUS * angle.cos(), ROOT_RADIUS * angle.sin())
}

/// Seeded position for the i-th of n children fanning out around a parent.
pub fn child_position(parent: Position, index: usize, total: usize) -> Position {
    let n = total.max(1) as f64;
    // Offset the fan so single children do not land on the root axis.
    let angle = TAU * (index as f64) / n + TAU / 8.0;
    Position::new(
        parent.x + CHILD_RADIUS * angle.cos(),
        parent.y + CHILD_RADIUS * angle.sin(),
    )
}

/// Assign a position to every node that lacks one.
///
/// `overrides` is the persisted recent-positions layer and wins over the
/// seeded value. Parenthood follows child-to-parent outgoing edges, so the
/// children of `p` are its incomers; siblings are ordered lexicographically.
pub fn seed_positions(graph: &mut Graph, overrides: &HashMap<NodeId, Position>) {
    let index = IncomingIndex::build(graph);

    // Roots: no resolved outgoing edge to another node.
    let mut roots: Vec<NodeId> = graph
        .sorted_ids()
        .into_iter()
        .filter(|id| {
            !graph.nodes[id]
                .outgoing_edges
                .iter()
                .any(|e| e.target != *id && graph.contains(&e.target))
        })
        .collect();

    // Cycle components have no root; their smallest member stands in.
    let mut reachable: HashSet<NodeId> = HashSet::new();
    collect_reachable(graph, &index, &roots, &mut reachable);
    let mut leftovers: Vec<NodeId> = graph
        .sorted_ids()
        .into_iter()
        .filter(|id| !reachable.contains(id))
        .collect();
    while let Some(entry) = leftovers.first().cloned() {
        roots.push(entry.clone());
        collect_reachable(graph, &index, &[entry], &mut reachable);
        leftovers.retain(|id| !reachable.contains(id));
    }

    let total_roots = roots.len();
    let mut assigned: HashMap<NodeId, Position> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for (i, root) in roots.iter().enumerate() {
        let position = resolve_position(graph, overrides, root)
            .unwrap_or_else(|| root_position(i, total_roots));
        assigned.insert(root.clone(), position);
        visited.insert(root.clone());
        queue.push_back(root.clone());
    }

    while let Some(parent) = queue.pop_front() {
        let parent_pos = assigned[&parent];
        let mut children: Vec<NodeId> = index
            .incomers(&parent)
            .iter()
            .filter(|c| **c != parent && graph.contains(c))
            .cloned()
            .collect();
        children.sort();
        let total = children.len();
        for (i, child) in children.into_iter().enumerate() {
            if !visited.insert(child.clone()) {
                continue;
            }
            let position = resolve_position(graph, overrides, &child)
                .unwrap_or_else(|| child_position(parent_pos, i, total));
            assigned.insert(child.clone(), position);
            queue.push_back(child);
        }
    }

    for (id, position) in assigned {
        let node = graph.nodes.get_mut(&id).expect("assigned node exists");
        if node.metadata.position.is_none() {
            node.metadata.position = Some(position);
        }
    }
}

fn resolve_position(
    graph: &Graph,
    overrides: &HashMap<NodeId, Position>,
    id: &NodeId,
) -> Option<Position> {
    graph.nodes[id]
        .metadata
        .position
        .or_else(|| overrides.get(id).copied())
}

fn collect_reachable(
    graph: &Graph,
    index: &IncomingIndex,
    from: &[NodeId],
    reachable: &mut HashSet<NodeId>,
) {
    let mut queue: VecDeque<NodeId> = from.iter().cloned().collect();
    for id in from {
        reachable.insert(id.clone());
    }
    while let Some(current) = queue.pop_front() {
        for child in index.incomers(&current) {
            if graph.contains(child) && reachable.insert(child.clone()) {
                queue.push_back(child.clone());
            }
        }
    }
}
