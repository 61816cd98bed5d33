//! TTL-based echo-suppression stores
//!
//! Two structurally identical stores let the engine recognize events caused
//! by its own writes. The recent-deltas store masks disk echoes (the OS may
//! deliver several notifications for one write); the recent-actions store
//! masks editor echoes (the editor's `onChange` fires after a programmatic
//! push). `is_recent` is a pure query and never consumes entries — TTL
//! expiry on subsequent `mark` calls is the only removal mechanism.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::graph::NodeDelta;
use crate::types::NodeId;

/// Default TTL for the renderer-side recent-actions store.
pub const ACTIONS_TTL: Duration = Duration::from_millis(300);

/// Default TTL for the engine-side recent-deltas store. Long enough to
/// survive OS-level event coalescing after a write.
pub const DELTAS_TTL: Duration = Duration::from_secs(10);

/// Bounded entries kept per key.
const ENTRIES_PER_KEY: usize = 8;

/// Relative length tolerance for regular-node upsert matching.
const LENGTH_TOLERANCE: f64 = 0.02;

static LINK_PAYLOAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[[^\[\]]*\]\]|\[[^\[\]]*\]\*").expect("static regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Content-tolerant matching between a stored value and a probe.
pub trait RecentMatch {
    fn matches_recent(&self, probe: &Self) -> bool;
}

/// A mapping from node id to a bounded list of `(timestamp, value)` entries
/// with a TTL. Matching is delegated to [`RecentMatch`].
#[derive(Debug, Clone)]
pub struct RecentStore<T> {
    ttl: Duration,
    entries: HashMap<NodeId, Vec<(Instant, T)>>,
}

impl<T: RecentMatch> RecentStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Record a value for the key, pruning expired entries and bounding the
    /// per-key list.
    pub fn mark(&mut self, key: NodeId, value: T) {
        let now = Instant::now();
        let ttl = self.ttl;
        let list = self.entries.entry(key).or_default();
        list.retain(|(at, _)| now.duration_since(*at) <= ttl);
        list.push((now, value));
        if list.len() > ENTRIES_PER_KEY {
            let excess = list.len() - ENTRIES_PER_KEY;
            list.drain(..excess);
        }
    }

    /// Whether a matching value was marked for this key within the TTL.
    /// Pure: entries are never consumed, so repeated OS notifications for
    /// one write are all filtered.
    pub fn is_recent(&self, key: &NodeId, probe: &T) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|list| {
            list.iter().any(|(at, value)| {
                now.duration_since(*at) <= self.ttl && value.matches_recent(probe)
            })
        })
    }

    pub fn delete_key(&mut self, key: &NodeId) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Normalize editor/body content for tolerant comparison: strip wikilink
/// payloads (both link and placeholder form) and collapse whitespace, so
/// content re-serialized by the codec still matches what the editor holds.
pub fn normalize_content(content: &str) -> String {
    let stripped = LINK_PAYLOAD_RE.replace_all(content, "");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Editor snapshots match on normalized equality.
impl RecentMatch for String {
    fn matches_recent(&self, probe: &Self) -> bool {
        normalize_content(self) == normalize_content(probe)
    }
}

/// Delta matching rules:
/// - deletes match any recent delete for the id;
/// - context-node upserts match by id alone (they are engine-synthesized
///   and large, so content comparison is skipped);
/// - regular upserts match when normalized content lengths agree within 2%.
impl RecentMatch for NodeDelta {
    fn matches_recent(&self, probe: &Self) -> bool {
        match (self, probe) {
            (NodeDelta::Delete { .. }, NodeDelta::Delete { .. }) => true,
            (
                NodeDelta::Upsert { node: marked, .. },
                NodeDelta::Upsert { node: probed, .. },
            ) => {
                if marked.id != probed.id {
                    return false;
                }
                if marked.metadata.is_context_node || probed.metadata.is_context_node {
                    return true;
                }
                lengths_within_tolerance(
                    normalize_content(&marked.content).len(),
                    normalize_content(&probed.content).len(),
                )
            }
            _ => false,
        }
    }
}

fn lengths_within_tolerance(a: usize, b: usize) -> bool {
    let max = a.max(b);
    if max == 0 {
        return true;
    }
    let diff = a.abs_diff(b);
    (diff as f64) <= (max as f64) * LENGTH_TOLERANCE
}
