//! Filesystem watcher bridge
//!
//! Adapts `notify` events into the engine's generic `VaultEvent` stream.
//! Content is read on the watcher thread so `Added`/`Changed` events carry
//! the full post-change text. A per-path coalescing buffer implements the
//! backpressure rule: past the high-water mark, only the latest
//! `Added`/`Changed` per path is kept, while `Deleted` is always preserved.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::contracts::{VaultEvent, VaultEventKind};

/// Bounded pending-event buffer with per-path coalescing.
#[derive(Debug)]
pub struct Coalescer {
    high_water_mark: usize,
    pending: VecDeque<VaultEvent>,
}

impl Coalescer {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            pending: VecDeque::new(),
        }
    }

    /// Queue an event. Beyond the high-water mark, a new `Added`/`Changed`
    /// replaces any pending `Added`/`Changed` for the same path in place;
    /// `Deleted` events are never coalesced away.
    pub fn push(&mut self, event: VaultEvent) {
        if self.pending.len() >= self.high_water_mark && event.kind != VaultEventKind::Deleted {
            if let Some(existing) = self.pending.iter_mut().find(|e| {
                e.path == event.path && e.kind != VaultEventKind::Deleted
            }) {
                *existing = event;
                return;
            }
        }
        self.pending.push_back(event);
    }

    pub fn pop(&mut self) -> Option<VaultEvent> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Watches vault directories and yields `VaultEvent`s for the engine loop.
pub struct VaultWatcher {
    // Kept alive for the duration of the watch; dropping stops it.
    _watcher: RecommendedWatcher,
    buffer: Arc<Mutex<Coalescer>>,
    wakeup: mpsc::UnboundedReceiver<()>,
}

impl VaultWatcher {
    /// Start watching the given directories recursively.
    pub fn new(paths: &[PathBuf], high_water_mark: usize) -> Result<Self> {
        let buffer = Arc::new(Mutex::new(Coalescer::new(high_water_mark)));
        let (tx, wakeup) = mpsc::unbounded_channel();

        let callback_buffer = Arc::clone(&buffer);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "watcher error");
                    return;
                }
            };
            for vault_event in translate(&event) {
                callback_buffer.lock().push(vault_event);
                let _ = tx.send(());
            }
        })
        .context("creating filesystem watcher")?;

        for path in paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", path.display()))?;
        }

        Ok(Self {
            _watcher: watcher,
            buffer,
            wakeup,
        })
    }

    /// Await the next event. `None` once the watcher thread has stopped and
    /// the buffer drained.
    pub async fn next_event(&mut self) -> Option<VaultEvent> {
        loop {
            if let Some(event) = self.buffer.lock().pop() {
                return Some(event);
            }
            self.wakeup.recv().await?;
        }
    }
}

/// Map a notify event to vault events, reading post-change content here so
/// the engine never has to touch the filesystem on the read path.
fn translate(event: &Event) -> Vec<VaultEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => VaultEventKind::Added,
        EventKind::Modify(_) => VaultEventKind::Changed,
        EventKind::Remove(_) => VaultEventKind::Deleted,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .filter_map(|path| match kind {
            VaultEventKind::Deleted => Some(VaultEvent::deleted(path.clone())),
            _ => match std::fs::read_to_string(path) {
                Ok(content) => Some(VaultEvent {
                    path: path.clone(),
                    kind,
                    content: Some(content),
                }),
                Err(e) => {
                    // A rename race can make the path unreadable; the
                    // engine will converge on the following event.
                    debug!(path = %path.display(), error = %e, "event content unavailable");
                    None
                }
            },
        })
        .collect()
}
