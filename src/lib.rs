// VaultGraph - A Bidirectional Markdown-Vault Graph Synchronization Engine
// Root library module

pub mod codec;
pub mod config;
pub mod context_node;
pub mod contracts;
pub mod derivation;
pub mod errors;
pub mod graph;
pub mod graph_ops;
pub mod layout;
pub mod observability;
pub mod state;
pub mod suppression;
pub mod sync_engine;
pub mod types;
pub mod vault_loader;
pub mod watcher;

// Re-export key types
pub use errors::VaultError;
pub use types::{NodeId, Position};

pub use graph::{Edge, Graph, GraphDelta, GraphNode, NodeDelta, NodeMetadata};

// Re-export the pure combinators
pub use graph_ops::{
    ascii_tree, bfs_neighborhood, graph_to_spanning_tree, reverse_graph_edges, IncomingIndex,
};

// Re-export the codec surface
pub use codec::{encode, parse, sentinel_node, strip_placeholders};

// Re-export delta derivation
pub use derivation::{
    content_change, create_child, create_orphan, delete_maintaining_transitive_edges, merge,
};

// Re-export the suppression stores
pub use suppression::{normalize_content, RecentMatch, RecentStore};

// Re-export loading and layout
pub use layout::seed_positions;
pub use vault_loader::{load_additional_vault, load_graph_from_disk, scan_vault_files};

// Re-export the engine and its contracts
pub use config::EngineConfig;
pub use contracts::{
    EditorHost, GraphBroadcast, RendererSink, UnseenNode, VaultEvent, VaultEventKind,
};
pub use sync_engine::SyncEngine;

// Re-export context nodes
pub use context_node::{build_context_node, unseen_nodes};

// Re-export persisted state and the watcher bridge
pub use observability::init_logging;
pub use state::{ContextSeed, PersistedState, StateStore};
pub use watcher::{Coalescer, VaultWatcher};
