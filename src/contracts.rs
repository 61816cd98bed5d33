//! Contracts between the engine and its collaborators
//!
//! The engine is the only mutator of the graph. Renderers receive one typed
//! broadcast per applied delta; editor hosts receive programmatic content
//! pushes; the filesystem appears as a stream of `VaultEvent`s from any
//! watcher implementation that delivers full post-change content.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::graph::GraphDelta;
use crate::types::NodeId;

/// One renderer message per applied delta, carrying the complete delta —
/// never the full graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphBroadcast {
    pub delta: GraphDelta,
}

/// Sink for renderer broadcasts.
#[async_trait::async_trait]
pub trait RendererSink: Send + Sync {
    async fn broadcast(&self, update: GraphBroadcast) -> Result<()>;
}

/// Host for open editors: receives programmatic content pushes when disk or
/// other collaborators changed a node whose editor is open.
#[async_trait::async_trait]
pub trait EditorHost: Send + Sync {
    async fn push_content(&self, node_id: &NodeId, content: &str) -> Result<()>;
}

/// The kind of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEventKind {
    Added,
    Changed,
    Deleted,
}

/// A filesystem change as consumed by the engine. `Added`/`Changed` events
/// carry full post-change content when the watcher could read it; the
/// engine falls back to reading the path itself otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultEvent {
    pub path: PathBuf,
    pub kind: VaultEventKind,
    pub content: Option<String>,
}

impl VaultEvent {
    pub fn added(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: VaultEventKind::Added,
            content: Some(content.into()),
        }
    }

    pub fn changed(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: VaultEventKind::Changed,
            content: Some(content.into()),
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: VaultEventKind::Deleted,
            content: None,
        }
    }
}

/// A node the caller has not seen yet, reported by the context-node diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnseenNode {
    pub id: NodeId,
    /// Body with YAML and link placeholders stripped.
    pub body: String,
}
