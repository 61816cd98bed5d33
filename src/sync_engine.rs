//! The sync engine: single mutable owner of the in-memory graph
//!
//! Orchestrates both directions of synchronization. The write path carries
//! UI/agent intents through memory, the renderer broadcast, disk, and open
//! editors; the read path folds filesystem events back in, dropping the
//! ones the engine caused itself (echo suppression). All mutation happens
//! through `&mut self` on one task; collaborators hold broadcast snapshots
//! and submit intents.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::{EngineConfig, CONTEXT_NODES_DIR};
use crate::context_node::{self, DEFAULT_RADIUS};
use crate::contracts::{
    EditorHost, GraphBroadcast, RendererSink, UnseenNode, VaultEvent, VaultEventKind,
};
use crate::derivation;
use crate::errors::VaultError;
use crate::graph::{Graph, GraphDelta, GraphNode, NodeDelta};
use crate::graph_ops::IncomingIndex;
use crate::layout;
use crate::state::{ContextSeed, PersistedState, StateStore};
use crate::suppression::{RecentStore, ACTIONS_TTL, DELTAS_TTL};
use crate::types::{NodeId, Position};
use crate::vault_loader::{self, node_from_file, upsert_with_healing};

pub struct SyncEngine {
    config: EngineConfig,
    graph: Graph,
    incoming: IncomingIndex,
    /// Disk-side echo suppression: marked before every disk write.
    recent_deltas: RecentStore<NodeDelta>,
    /// Editor-side echo suppression: marked before every programmatic push.
    recent_actions: RecentStore<String>,
    /// Current text of each open editor, keyed by node id.
    open_editors: HashMap<NodeId, String>,
    renderer: Arc<dyn RendererSink>,
    editors: Arc<dyn EditorHost>,
    state_store: Option<StateStore>,
    state: PersistedState,
}

impl SyncEngine {
    /// Load the configured vaults, build the incoming index, and broadcast
    /// the initial graph as one delta of first-appearance upserts.
    pub async fn initialize(
        config: EngineConfig,
        renderer: Arc<dyn RendererSink>,
        editors: Arc<dyn EditorHost>,
    ) -> Result<Self> {
        let state_store = config.state_dir.as_ref().map(StateStore::new);
        let state = match &state_store {
            Some(store) => store.load().await,
            None => PersistedState::default(),
        };

        let graph = vault_loader::load_graph_from_disk(&config, &state.recent_positions).await?;
        let incoming = IncomingIndex::build(&graph);
        info!(nodes = graph.len(), "sync engine initialized");

        let mut engine = Self {
            config,
            graph,
            incoming,
            recent_deltas: RecentStore::new(DELTAS_TTL),
            recent_actions: RecentStore::new(ACTIONS_TTL),
            open_editors: HashMap::new(),
            renderer,
            editors,
            state_store,
            state,
        };

        // Record the load's positions (seeded or authored) so the next run
        // lays nodes out where this one left them.
        for node in engine.graph.nodes.values() {
            if let Some(position) = node.metadata.position {
                engine
                    .state
                    .recent_positions
                    .insert(node.id.clone(), position);
            }
        }
        engine.save_state().await;

        let initial = GraphDelta::new(
            engine
                .graph
                .sorted_ids()
                .into_iter()
                .map(|id| NodeDelta::Upsert {
                    node: engine.graph.nodes[&id].clone(),
                    previous: None,
                })
                .collect(),
        );
        if !initial.is_empty() {
            engine.broadcast(&initial).await;
        }
        Ok(engine)
    }

    /// Read-only view of the live graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Apply a delta through memory, the renderer, disk, and open editors.
    ///
    /// Deletes are first expanded with the transitive-edge rewrites. The
    /// returned delta is the inverse of what was applied; with
    /// `record_for_undo` it is also pushed onto the undo history. A disk
    /// failure aborts the remaining writes and surfaces the error, but
    /// memory and broadcasts are already committed — the next filesystem
    /// event for the path re-converges.
    pub async fn commit_delta(
        &mut self,
        delta: GraphDelta,
        record_for_undo: bool,
    ) -> Result<GraphDelta> {
        let (expanded, inverse) = self.expand_delta(delta);
        if expanded.is_empty() {
            return Ok(inverse);
        }

        if record_for_undo {
            self.state.undo_history.push(inverse.clone());
            self.state.redo_history.clear();
            self.state.trim_history(self.config.undo_history_limit);
        }

        // Mark before the disk write so even an immediate event is an echo.
        for elem in expanded.iter() {
            self.recent_deltas.mark(elem.node_id().clone(), elem.clone());
        }

        self.apply_to_memory(&expanded);
        self.broadcast(&expanded).await;
        let write_result = self.write_to_disk(&expanded).await;
        self.reconcile_editors(&expanded).await;
        self.remember_positions(&expanded);
        self.save_state().await;
        write_result?;
        Ok(inverse)
    }

    /// Expand deletes with the transitive-edge rule and clamp every
    /// upsert's `previous` to the actual pre-state, producing the delta
    /// that will be applied and its inverse.
    fn expand_delta(&self, delta: GraphDelta) -> (GraphDelta, GraphDelta) {
        let mut sim = self.graph.clone();
        let mut sim_index = self.incoming.clone();
        let mut expanded = GraphDelta::default();
        let mut inverse = Vec::new();

        for elem in delta.deltas {
            match elem {
                NodeDelta::Upsert { node, previous } => {
                    Self::expand_upsert(&mut sim, &mut sim_index, node, previous, &mut expanded, &mut inverse);
                }
                NodeDelta::Delete { node_id } => {
                    if !sim.contains(&node_id) {
                        debug!(node = %node_id, "dropping delete of unknown node");
                        continue;
                    }
                    let sub = derivation::delete_maintaining_transitive_edges(
                        &sim, &sim_index, &node_id,
                    )
                    .expect("node existence checked above");
                    for sub_elem in sub.deltas {
                        match sub_elem {
                            NodeDelta::Upsert { node, previous } => {
                                Self::expand_upsert(
                                    &mut sim,
                                    &mut sim_index,
                                    node,
                                    previous,
                                    &mut expanded,
                                    &mut inverse,
                                );
                            }
                            NodeDelta::Delete { node_id } => {
                                if let Some(removed) = sim.remove(&node_id) {
                                    sim_index.update_for_delete(&removed);
                                    inverse.push(NodeDelta::Upsert {
                                        node: removed,
                                        previous: None,
                                    });
                                    expanded.push(NodeDelta::Delete { node_id });
                                }
                            }
                        }
                    }
                }
            }
        }
        inverse.reverse();
        (expanded, GraphDelta::new(inverse))
    }

    fn expand_upsert(
        sim: &mut Graph,
        sim_index: &mut IncomingIndex,
        node: GraphNode,
        previous: Option<GraphNode>,
        expanded: &mut GraphDelta,
        inverse: &mut Vec<NodeDelta>,
    ) {
        let actual = sim.get(&node.id).cloned();
        if previous != actual {
            // Programmer error upstream; clamp to preserve liveness.
            warn!(
                node = %node.id,
                "upsert carried a stale previous state, clamping to the live graph"
            );
        }
        inverse.push(match &actual {
            Some(prev) => NodeDelta::Upsert {
                node: prev.clone(),
                previous: Some(node.clone()),
            },
            None => NodeDelta::Delete {
                node_id: node.id.clone(),
            },
        });
        sim_index.update_for_upsert(&node, actual.as_ref());
        sim.insert(node.clone());
        expanded.push(NodeDelta::Upsert {
            node,
            previous: actual,
        });
    }

    fn apply_to_memory(&mut self, expanded: &GraphDelta) {
        for elem in expanded.iter() {
            match elem {
                NodeDelta::Upsert { node, previous } => {
                    self.incoming.update_for_upsert(node, previous.as_ref());
                    self.graph.insert(node.clone());
                }
                NodeDelta::Delete { node_id } => {
                    if let Some(removed) = self.graph.remove(node_id) {
                        self.incoming.update_for_delete(&removed);
                    }
                }
            }
        }
    }

    async fn broadcast(&self, delta: &GraphDelta) {
        let update = GraphBroadcast {
            delta: delta.clone(),
        };
        if let Err(e) = self.renderer.broadcast(update).await {
            warn!(error = %e, "renderer broadcast failed");
        }
    }

    /// Sequential disk writes: encode-and-rename per upsert, unlink per
    /// delete. The first failure aborts the rest.
    async fn write_to_disk(&self, expanded: &GraphDelta) -> Result<()> {
        for elem in expanded.iter() {
            match elem {
                NodeDelta::Upsert { node, .. } => {
                    self.write_node_file(node).await?;
                }
                NodeDelta::Delete { node_id } => {
                    match tokio::fs::remove_file(node_id.as_path()).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(VaultError::WriteFailure {
                                path: node_id.to_string(),
                                source: e,
                            })
                            .context("removing deleted node file");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_node_file(&self, node: &GraphNode) -> Result<()> {
        let path = node.id.as_path();
        let encoded = codec::encode(node);
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("md.tmp");
            tokio::fs::write(&tmp, encoded.as_bytes()).await?;
            tokio::fs::rename(&tmp, path).await
        };
        write.await.map_err(|e| {
            anyhow::Error::from(VaultError::WriteFailure {
                path: node.id.to_string(),
                source: e,
            })
        })
    }

    /// Push changed content into open editors, marking the recent-actions
    /// store first so the editor's echoed `onChange` is filtered.
    async fn reconcile_editors(&mut self, expanded: &GraphDelta) {
        for elem in expanded.iter() {
            match elem {
                NodeDelta::Upsert { node, .. } => {
                    let Some(current) = self.open_editors.get(&node.id) else {
                        continue;
                    };
                    if *current == node.content {
                        continue;
                    }
                    self.recent_actions
                        .mark(node.id.clone(), node.content.clone());
                    if let Err(e) = self.editors.push_content(&node.id, &node.content).await {
                        warn!(node = %node.id, error = %e, "editor push failed");
                    }
                    self.open_editors.insert(node.id.clone(), node.content.clone());
                }
                NodeDelta::Delete { node_id } => {
                    self.open_editors.remove(node_id);
                    self.recent_actions.delete_key(node_id);
                }
            }
        }
    }

    fn remember_positions(&mut self, expanded: &GraphDelta) {
        for elem in expanded.iter() {
            match elem {
                NodeDelta::Upsert { node, .. } => {
                    if let Some(position) = node.metadata.position {
                        self.state
                            .recent_positions
                            .insert(node.id.clone(), position);
                    }
                }
                NodeDelta::Delete { node_id } => {
                    self.state.recent_positions.remove(node_id);
                    self.state.context_seeds.remove(node_id);
                }
            }
        }
    }

    async fn save_state(&mut self) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save(&mut self.state).await {
                warn!(error = %e, "persisting engine state failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Fold a filesystem event into the graph, unless it is an echo of the
    /// engine's own write. Applies, broadcasts, and reconciles editors —
    /// everything the write path does except the disk write.
    pub async fn handle_fs_event(&mut self, event: VaultEvent) -> Result<()> {
        if event.path.extension().and_then(|e| e.to_str()) != Some("md") {
            return Ok(());
        }
        if !self
            .config
            .vault_paths
            .iter()
            .any(|vault| event.path.starts_with(vault))
        {
            return Ok(());
        }
        let id = NodeId::from(event.path.as_path());

        match event.kind {
            VaultEventKind::Added | VaultEventKind::Changed => {
                let text = match event.content {
                    Some(text) => text,
                    None => match tokio::fs::read_to_string(&event.path).await {
                        Ok(text) => text,
                        Err(e) => {
                            debug!(path = %event.path.display(), error = %e, "ignoring unreadable event");
                            return Ok(());
                        }
                    },
                };
                let mut node = node_from_file(&event.path, &text);
                node.outgoing_edges = derivation::resolve_edges(&self.graph, &node.outgoing_edges);
                let previous = self.graph.get(&id).cloned();
                // Positions are a UI overlay; a file written without one
                // keeps the position the node already had.
                if node.metadata.position.is_none() {
                    if let Some(prev) = &previous {
                        node.metadata.position = prev.metadata.position;
                    }
                }
                if previous.as_ref() == Some(&node) {
                    return Ok(());
                }

                let candidate = NodeDelta::Upsert {
                    node: node.clone(),
                    previous: previous.clone(),
                };
                if self.recent_deltas.is_recent(&id, &candidate) {
                    debug!(node = %id, "suppressed disk echo");
                    return Ok(());
                }

                // Heal in both directions on a scratch graph so the
                // broadcast carries the neighbor upserts too.
                let mut scratch = self.graph.clone();
                let deltas = upsert_with_healing(&mut scratch, node);
                self.commit_in_memory(GraphDelta::new(deltas)).await;
            }
            VaultEventKind::Deleted => {
                if !self.graph.contains(&id) {
                    return Ok(());
                }
                let candidate = NodeDelta::Delete {
                    node_id: id.clone(),
                };
                if self.recent_deltas.is_recent(&id, &candidate) {
                    debug!(node = %id, "suppressed disk echo");
                    return Ok(());
                }
                self.commit_in_memory(GraphDelta::single(candidate)).await;
            }
        }
        Ok(())
    }

    /// Apply a disk-originated delta: memory, broadcast, editors — no disk
    /// write, no undo record, no echo marks.
    async fn commit_in_memory(&mut self, delta: GraphDelta) {
        let (expanded, _inverse) = self.expand_delta(delta);
        if expanded.is_empty() {
            return;
        }
        self.apply_to_memory(&expanded);
        self.broadcast(&expanded).await;
        self.reconcile_editors(&expanded).await;
        self.remember_positions(&expanded);
        self.save_state().await;
    }

    /// Entry point for the renderer's editor `onChange`. Values the engine
    /// pushed itself are recognized in the recent-actions store and
    /// dropped; everything else becomes a content-change intent.
    pub async fn handle_editor_change(&mut self, id: NodeId, text: String) -> Result<()> {
        if self.recent_actions.is_recent(&id, &text) {
            debug!(node = %id, "suppressed editor echo");
            self.open_editors.insert(id, text);
            return Ok(());
        }
        self.open_editors.insert(id.clone(), text.clone());
        self.modify_node_content(&id, &text).await
    }

    // ------------------------------------------------------------------
    // Intents
    // ------------------------------------------------------------------

    /// Create a child under `parent_id`, written into the parent's own
    /// directory. The child points at its parent.
    pub async fn create_child_node(&mut self, parent_id: &NodeId) -> Result<NodeId> {
        let parent = self
            .graph
            .get(parent_id)
            .ok_or_else(|| VaultError::unknown_node(parent_id.as_str()))?
            .clone();
        let dir = parent
            .id
            .as_path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.write_path.clone());
        let fresh = NodeId::from(dir.join(format!("node-{}.md", Uuid::new_v4())));

        let sibling_index = self.incoming.incomers(parent_id).len();
        let position = parent
            .metadata
            .position
            .map(|p| layout::child_position(p, sibling_index, sibling_index + 1));

        let delta = derivation::create_child(&parent, fresh.clone(), position);
        self.commit_delta(delta, true).await?;
        Ok(fresh)
    }

    /// Create a free-standing node at `position` in the write vault.
    pub async fn create_orphan_node(&mut self, position: Position) -> Result<NodeId> {
        let fresh = NodeId::from(
            self.config
                .write_path
                .join(format!("node-{}.md", Uuid::new_v4())),
        );
        let delta = derivation::create_orphan(fresh.clone(), position);
        self.commit_delta(delta, true).await?;
        Ok(fresh)
    }

    /// Replace a node's body, re-deriving its edges and title.
    pub async fn modify_node_content(&mut self, id: &NodeId, new_body: &str) -> Result<()> {
        let current = self
            .graph
            .get(id)
            .ok_or_else(|| VaultError::unknown_node(id.as_str()))?
            .clone();
        let delta = derivation::content_change(&self.graph, &current, new_body);
        self.commit_delta(delta, true).await?;
        Ok(())
    }

    /// Delete a node, rewriting incoming edges to its children first.
    pub async fn delete_node(&mut self, id: &NodeId) -> Result<()> {
        if !self.graph.contains(id) {
            return Err(VaultError::unknown_node(id.as_str()).into());
        }
        self.commit_delta(
            GraphDelta::single(NodeDelta::Delete {
                node_id: id.clone(),
            }),
            true,
        )
        .await?;
        Ok(())
    }

    /// Merge nodes into a representative; see the derivation module for
    /// representative selection and edge policy.
    pub async fn merge_nodes(&mut self, ids: &[NodeId]) -> Result<()> {
        let delta = derivation::merge(&self.graph, ids)?;
        self.commit_delta(delta, true).await?;
        Ok(())
    }

    /// Switch the vault that receives new-node writes. Orthogonal to which
    /// vaults are watched.
    pub fn set_default_write_path(&mut self, path: PathBuf) -> Result<()> {
        if !path.is_absolute() {
            anyhow::bail!("write path must be absolute: {}", path.display());
        }
        info!(path = %path.display(), "write path changed");
        self.config.write_path = path;
        Ok(())
    }

    /// Additive vault load: fold another directory into the live graph and
    /// broadcast everything that changed as one delta.
    pub async fn add_read_only_vault_path(&mut self, path: PathBuf) -> Result<()> {
        let (graph, delta) = vault_loader::load_additional_vault(
            &self.graph,
            &path,
            &self.config,
            &self.state.recent_positions,
        )
        .await?;
        self.graph = graph;
        self.incoming = IncomingIndex::build(&self.graph);
        if !self.config.vault_paths.contains(&path) {
            self.config.vault_paths.push(path);
        }
        if !delta.is_empty() {
            self.broadcast(&delta).await;
        }
        Ok(())
    }

    /// Materialize a context node around `seed` and persist it through the
    /// write path.
    pub async fn create_context_node(
        &mut self,
        seed: &NodeId,
        radius: Option<usize>,
    ) -> Result<NodeId> {
        let radius = radius.unwrap_or(DEFAULT_RADIUS);
        let fresh = NodeId::from(
            self.config
                .write_path
                .join(CONTEXT_NODES_DIR)
                .join(format!("context-{}.md", Uuid::new_v4())),
        );
        let node = context_node::build_context_node(&self.graph, seed, radius, fresh.clone())?;
        self.state.context_seeds.insert(
            fresh.clone(),
            ContextSeed {
                seed: seed.clone(),
                radius,
            },
        );
        self.commit_delta(
            GraphDelta::single(NodeDelta::Upsert {
                node,
                previous: None,
            }),
            true,
        )
        .await?;
        Ok(fresh)
    }

    /// Nodes that entered the context node's neighborhood since capture.
    pub fn unseen_nodes_around_context_node(&self, ctx_id: &NodeId) -> Result<Vec<UnseenNode>> {
        let mut ctx = self
            .graph
            .get(ctx_id)
            .ok_or_else(|| VaultError::unknown_node(ctx_id.as_str()))?
            .clone();
        // Frontmatter is authoritative for the anchor; the persisted seed
        // map covers context nodes whose YAML lost it (external edits).
        if !ctx
            .metadata
            .additional_yaml_props
            .contains_key(context_node::SEED_PROP)
        {
            if let Some(recorded) = self.state.context_seeds.get(ctx_id) {
                ctx.metadata.additional_yaml_props.insert(
                    context_node::SEED_PROP.to_string(),
                    recorded.seed.to_string(),
                );
                ctx.metadata.additional_yaml_props.insert(
                    context_node::RADIUS_PROP.to_string(),
                    recorded.radius.to_string(),
                );
            }
        }
        Ok(context_node::unseen_nodes(&self.graph, &ctx)?)
    }

    /// Replay the most recent inverse delta. Returns false when the history
    /// is empty.
    pub async fn undo(&mut self) -> Result<bool> {
        let Some(delta) = self.state.undo_history.pop() else {
            return Ok(false);
        };
        let inverse = self.commit_delta(delta, false).await?;
        self.state.redo_history.push(inverse);
        self.state.trim_history(self.config.undo_history_limit);
        self.save_state().await;
        Ok(true)
    }

    pub async fn redo(&mut self) -> Result<bool> {
        let Some(delta) = self.state.redo_history.pop() else {
            return Ok(false);
        };
        let inverse = self.commit_delta(delta, false).await?;
        self.state.undo_history.push(inverse);
        self.state.trim_history(self.config.undo_history_limit);
        self.save_state().await;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Editors
    // ------------------------------------------------------------------

    /// Register an open editor and return the node's current body.
    pub fn open_editor(&mut self, id: &NodeId) -> Result<String> {
        let node = self
            .graph
            .get(id)
            .ok_or_else(|| VaultError::unknown_node(id.as_str()))?;
        self.open_editors.insert(id.clone(), node.content.clone());
        Ok(node.content.clone())
    }

    pub fn close_editor(&mut self, id: &NodeId) {
        self.open_editors.remove(id);
        self.recent_actions.delete_key(id);
    }

    /// Flush persisted state and dispose editor registrations. The caller
    /// stops its watcher before or after; the engine holds none.
    pub async fn shutdown(&mut self) {
        self.save_state().await;
        self.open_editors.clear();
        self.recent_actions.clear();
        self.recent_deltas.clear();
        info!("sync engine shut down");
    }
}
