//! Core identifier and geometry types shared across the engine
//!
//! A `NodeId` is the node's absolute file path. The graph algebra treats it
//! as an opaque string; path semantics (stems, vault membership) live in
//! helpers here so the loader and codec stay consistent about resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Node identifier: the absolute path of the backing Markdown file.
///
/// Edges may also carry a `NodeId` in *link form* — the raw wikilink text
/// (no path separator) that has not yet been resolved to a file. Link-form
/// ids are dangling until the vault loader heals them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// File stem used for wikilink resolution: the final path segment with
    /// any `.md` extension removed. For link-form ids this is the link text.
    pub fn stem(&self) -> &str {
        let base = self.0.rsplit('/').next().unwrap_or(&self.0);
        base.strip_suffix(".md").unwrap_or(base)
    }

    /// True when the id is the raw text of a wikilink rather than a path.
    pub fn is_link_form(&self) -> bool {
        !self.0.contains('/')
    }

    /// Whether a wikilink with the given text refers to this node.
    pub fn matches_link(&self, link: &str) -> bool {
        let link = link.strip_suffix(".md").unwrap_or(link);
        let link = link.rsplit('/').next().unwrap_or(link);
        self.stem() == link
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<PathBuf> for NodeId {
    fn from(p: PathBuf) -> Self {
        Self(p.to_string_lossy().into_owned())
    }
}

impl From<&Path> for NodeId {
    fn from(p: &Path) -> Self {
        Self(p.to_string_lossy().into_owned())
    }
}

/// A 2D canvas position. Free-form float precision round-trips through YAML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Centroid of a non-empty set of positions; `None` when empty.
    pub fn centroid(positions: &[Position]) -> Option<Position> {
        if positions.is_empty() {
            return None;
        }
        let n = positions.len() as f64;
        let (sx, sy) = positions
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Position::new(sx / n, sy / n))
    }
}
