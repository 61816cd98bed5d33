//! Engine configuration
//!
//! One config per project root. `vault_paths` are the directories whose
//! Markdown files participate in the graph; `write_path` is the vault that
//! receives new-node writes and may be switched at runtime independently of
//! what is watched.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Subfolder (under the write path) that receives synthesized context nodes.
pub const CONTEXT_NODES_DIR: &str = "ctx-nodes";

/// Configuration for a sync engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Project root; every vault path lives under it.
    pub watched_directory: PathBuf,

    /// Directories scanned for `.md` files.
    pub vault_paths: Vec<PathBuf>,

    /// The vault that receives new-node writes.
    pub write_path: PathBuf,

    /// Hard ceiling on the number of Markdown files a load may touch.
    /// Exceeding it aborts the load with `FileLimitExceeded`.
    pub file_count_ceiling: usize,

    /// Directory segment names skipped during scans.
    pub denied_directory_names: Vec<String>,

    /// Maximum scan depth below each vault path.
    pub max_scan_depth: usize,

    /// High-water mark for the watcher's event buffer; beyond it, pending
    /// `Added`/`Changed` events are coalesced per path.
    pub event_high_water_mark: usize,

    /// Where persisted engine state (positions, undo history, context
    /// seeds) lives. `None` disables persistence.
    pub state_dir: Option<PathBuf>,

    /// Bound on the undo/redo history.
    pub undo_history_limit: usize,
}

impl EngineConfig {
    /// Minimal config for a single-vault project rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            watched_directory: root.clone(),
            vault_paths: vec![root.clone()],
            write_path: root,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watched_directory: PathBuf::new(),
            vault_paths: Vec::new(),
            write_path: PathBuf::new(),
            file_count_ceiling: 10_000,
            denied_directory_names: [
                "node_modules",
                "target",
                "build",
                "dist",
                ".cache",
                ".git",
                ".obsidian",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_scan_depth: 16,
            event_high_water_mark: 256,
            state_dir: None,
            undo_history_limit: 100,
        }
    }
}
