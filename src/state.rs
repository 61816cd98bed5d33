//! Persisted per-project engine state
//!
//! A single JSON document in the configured state directory holds the
//! recent-positions override layer used by the loader's positioning pass,
//! the bounded undo/redo history, and the context-node seed map. Saves are
//! atomic (temp file then rename) and best-effort: a failed save is logged,
//! never fatal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::graph::GraphDelta;
use crate::types::{NodeId, Position};

const STATE_FILE: &str = "engine-state.json";

/// The anchor a context node was synthesized around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSeed {
    pub seed: NodeId,
    pub radius: usize,
}

/// Everything the engine persists across runs for one project root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Last known positions, consulted before seeding new ones.
    pub recent_positions: HashMap<NodeId, Position>,
    /// Inverse deltas, most recent last.
    pub undo_history: Vec<GraphDelta>,
    pub redo_history: Vec<GraphDelta>,
    /// Context-node id to the seed it was built around.
    pub context_seeds: HashMap<NodeId, ContextSeed>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    /// Record a position, and bound the undo stacks to `limit` entries each
    /// (oldest dropped first).
    pub fn trim_history(&mut self, limit: usize) {
        if self.undo_history.len() > limit {
            let excess = self.undo_history.len() - limit;
            self.undo_history.drain(..excess);
        }
        if self.redo_history.len() > limit {
            let excess = self.redo_history.len() - limit;
            self.redo_history.drain(..excess);
        }
    }
}

/// Loads and saves the persisted state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE),
        }
    }

    /// Read the state, falling back to defaults when the file is missing or
    /// unreadable. Corruption loses history but never blocks startup.
    pub async fn load(&self) -> PersistedState {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "discarding corrupt engine state");
                    PersistedState::default()
                }
            },
            Err(_) => PersistedState::default(),
        }
    }

    /// Write the state atomically.
    pub async fn save(&self, state: &mut PersistedState) -> Result<()> {
        state.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(state).context("serializing engine state")?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_state_document() -> Result<()> {
        let dir = TempDir::new()?;
        let store = StateStore::new(dir.path());

        let mut state = PersistedState::default();
        state
            .recent_positions
            .insert(NodeId::new("/v/a.md"), Position::new(1.0, 2.0));
        state.context_seeds.insert(
            NodeId::new("/v/ctx-nodes/k.md"),
            ContextSeed {
                seed: NodeId::new("/v/a.md"),
                radius: 2,
            },
        );
        store.save(&mut state).await?;

        let loaded = store.load().await;
        assert_eq!(loaded.recent_positions, state.recent_positions);
        assert_eq!(loaded.context_seeds, state.context_seeds);
        assert!(loaded.saved_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_corrupt_state_falls_back_to_default() -> Result<()> {
        let dir = TempDir::new()?;
        let store = StateStore::new(dir.path());
        assert_eq!(store.load().await, PersistedState::default());

        tokio::fs::write(dir.path().join(STATE_FILE), "not json").await?;
        assert_eq!(store.load().await, PersistedState::default());
        Ok(())
    }

    #[test]
    fn history_trimming_drops_oldest_entries() {
        let mut state = PersistedState::default();
        for _ in 0..5 {
            state.undo_history.push(GraphDelta::default());
        }
        state.trim_history(3);
        assert_eq!(state.undo_history.len(), 3);
    }
}
