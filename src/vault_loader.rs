//! Progressive, order-independent vault loading
//!
//! Files are folded into the graph one at a time; a healing step promotes
//! link-form edges to full ids as their targets appear, so the final graph
//! does not depend on iteration order. Unparseable files become sentinel
//! nodes instead of holes. A positioning pass seeds any node that still
//! lacks a position.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec;
use crate::config::EngineConfig;
use crate::derivation::resolve_edges;
use crate::errors::VaultError;
use crate::graph::{Edge, Graph, GraphDelta, GraphNode, NodeDelta};
use crate::layout::seed_positions;
use crate::types::{NodeId, Position};

/// Recursively collect the Markdown files of the given vault directories,
/// skipping denied directory names and enforcing the file-count ceiling.
/// Exceeding the ceiling is a whole-load failure, never a partial load.
pub fn scan_vault_files(
    vault_paths: &[PathBuf],
    config: &EngineConfig,
) -> Result<Vec<PathBuf>, VaultError> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    for vault in vault_paths {
        let walker = WalkDir::new(vault)
            .max_depth(config.max_scan_depth)
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    let name = entry.file_name().to_string_lossy();
                    !config.denied_directory_names.iter().any(|d| d == &name)
                } else {
                    true
                }
            });
        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    if files.len() > config.file_count_ceiling {
        return Err(VaultError::FileLimitExceeded {
            count: files.len(),
            ceiling: config.file_count_ceiling,
        });
    }
    files.sort();
    Ok(files)
}

fn dedup_edges(edges: &mut Vec<Edge>) {
    let mut seen: HashSet<NodeId> = HashSet::new();
    edges.retain(|e| seen.insert(e.target.clone()));
}

/// Upsert a node and heal edges in both directions: the node's own
/// link-form targets resolve against the graph, and other nodes' unresolved
/// link-form edges that name this node's basename are promoted to its id.
/// Idempotent for already-resolved edges, which is what makes the fold
/// order-independent.
pub fn upsert_with_healing(graph: &mut Graph, node: GraphNode) -> Vec<NodeDelta> {
    let id = node.id.clone();
    let previous = graph.get(&id).cloned();
    graph.insert(node);

    let mut resolved = resolve_edges(graph, &graph.nodes[&id].outgoing_edges);
    dedup_edges(&mut resolved);
    graph.nodes.get_mut(&id).expect("just inserted").outgoing_edges = resolved;

    let mut deltas = vec![NodeDelta::Upsert {
        node: graph.nodes[&id].clone(),
        previous,
    }];

    for other_id in graph.sorted_ids() {
        if other_id == id {
            continue;
        }
        let other = &graph.nodes[&other_id];
        let needs_healing = other.outgoing_edges.iter().any(|e| {
            e.target.is_link_form()
                && !graph.contains(&e.target)
                && id.matches_link(e.target.as_str())
        });
        if !needs_healing {
            continue;
        }
        let previous = other.clone();
        let mut updated = other.clone();
        for edge in &mut updated.outgoing_edges {
            if edge.target.is_link_form()
                && !graph.contains(&edge.target)
                && id.matches_link(edge.target.as_str())
            {
                edge.target = id.clone();
            }
        }
        dedup_edges(&mut updated.outgoing_edges);
        graph.insert(updated.clone());
        deltas.push(NodeDelta::Upsert {
            node: updated,
            previous: Some(previous),
        });
    }
    deltas
}

/// Parse one file into a node, substituting a sentinel on parse failure.
pub fn node_from_file(path: &Path, text: &str) -> GraphNode {
    let id = NodeId::from(path);
    match codec::parse(id.clone(), text) {
        Ok(node) => node,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "substituting sentinel node for unparseable file");
            codec::sentinel_node(id, text)
        }
    }
}

/// Load every configured vault into a fresh graph and seed positions.
pub async fn load_graph_from_disk(
    config: &EngineConfig,
    position_overrides: &HashMap<NodeId, Position>,
) -> Result<Graph> {
    let files = scan_vault_files(&config.vault_paths, config)?;
    info!(count = files.len(), "loading vault");

    let mut graph = Graph::new();
    for path in &files {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let node = node_from_file(path, &text);
        upsert_with_healing(&mut graph, node);
    }

    seed_positions(&mut graph, position_overrides);
    debug!(nodes = graph.len(), "vault load complete");
    Ok(graph)
}

/// Additive load: fold a new vault directory into an existing graph.
///
/// Returns the merged graph and one delta covering everything the load
/// changed — the newly introduced nodes plus any pre-existing node whose
/// unresolved edges were healed — so a single broadcast syncs the renderer.
pub async fn load_additional_vault(
    base: &Graph,
    vault: &Path,
    config: &EngineConfig,
    position_overrides: &HashMap<NodeId, Position>,
) -> Result<(Graph, GraphDelta)> {
    let files = scan_vault_files(&[vault.to_path_buf()], config)?;
    if base.len() + files.len() > config.file_count_ceiling {
        return Err(VaultError::FileLimitExceeded {
            count: base.len() + files.len(),
            ceiling: config.file_count_ceiling,
        }
        .into());
    }
    info!(count = files.len(), vault = %vault.display(), "additive vault load");

    let mut graph = base.clone();
    // First-touch previous state per id, in touch order.
    let mut touched: Vec<NodeId> = Vec::new();
    let mut first_previous: HashMap<NodeId, Option<GraphNode>> = HashMap::new();

    for path in &files {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let node = node_from_file(path, &text);
        for delta in upsert_with_healing(&mut graph, node) {
            if let NodeDelta::Upsert { node, previous } = delta {
                if !first_previous.contains_key(&node.id) {
                    first_previous.insert(node.id.clone(), previous);
                    touched.push(node.id.clone());
                }
            }
        }
    }

    seed_positions(&mut graph, position_overrides);

    let mut delta = GraphDelta::default();
    for id in touched {
        let previous = first_previous.remove(&id).flatten();
        delta.push(NodeDelta::Upsert {
            node: graph.nodes[&id].clone(),
            previous,
        });
    }
    Ok((graph, delta))
}
