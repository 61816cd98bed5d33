//! Structured error taxonomy for the sync engine
//!
//! Pure modules (codec, algebra, derivation) return these as values; the
//! engine boundary wraps them in `anyhow::Error` with context so callers
//! can still downcast to the structured variant.

use std::io;
use thiserror::Error;

/// Errors surfaced by vault loading, the codec, and engine intents
#[derive(Debug, Error)]
pub enum VaultError {
    /// The vault scan found more Markdown files than the configured ceiling.
    /// The load is aborted wholesale; the engine keeps its previous state.
    #[error("file limit exceeded: found {count} markdown files, ceiling is {ceiling}")]
    FileLimitExceeded { count: usize, ceiling: usize },

    /// A single file failed to parse. The loader substitutes a sentinel
    /// node so the graph stays complete; this variant is only surfaced
    /// when parsing is requested directly.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Encoding or the disk write failed. Memory and broadcasts are already
    /// committed; the next filesystem event for the path re-converges.
    #[error("write failed for {path}")]
    WriteFailure {
        path: String,
        #[source]
        source: io::Error,
    },

    /// An upsert's recorded previous state did not match the live graph.
    /// Logged and clamped to the actual previous state in production.
    #[error("integrity violation on {node_id}: {detail}")]
    Integrity { node_id: String, detail: String },

    /// An intent targeted a node id that is not in the graph.
    #[error("unknown node: {node_id}")]
    UnknownNode { node_id: String },
}

impl VaultError {
    pub fn unknown_node(id: impl Into<String>) -> Self {
        Self::UnknownNode {
            node_id: id.into(),
        }
    }
}
