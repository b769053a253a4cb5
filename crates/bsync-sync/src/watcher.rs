//! Thin filesystem watcher.
//!
//! Raw notify events are mapped to [`WatchEvent`]s and coalesced per path;
//! a path is released once it has been quiet for the debounce window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bsync_index::{ScanOptions, WatchEvent, WatchEventKind};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Per-path debounce buffer. The latest event for a path replaces earlier
/// ones and restarts its quiet period.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, (WatchEventKind, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn push(&mut self, event: WatchEvent, now: Instant) {
        self.pending.insert(event.path, (event.kind, now));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// When the earliest pending path becomes ready.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, at)| *at + self.window).min()
    }

    /// Remove and return every path that has been quiet for the window.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<WatchEvent> {
        let window = self.window;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| *at + window <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut events: Vec<WatchEvent> = ready
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|(kind, _)| WatchEvent { kind, path })
            })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }

    /// Remove and return everything pending.
    pub fn drain_all(&mut self) -> Vec<WatchEvent> {
        let mut events: Vec<WatchEvent> = self
            .pending
            .drain()
            .map(|(path, (kind, _))| WatchEvent { kind, path })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

/// Watches a project root recursively and yields debounced event batches.
pub struct ProjectWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    debouncer: Debouncer,
}

impl ProjectWatcher {
    /// Start watching `root`. Events under directories the scanner skips
    /// are dropped.
    pub fn start(root: &Path, debounce: Duration, options: &ScanOptions) -> SyncResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let skip_root = root.to_path_buf();
        let options = options.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for mapped in map_notify_event(event) {
                        if is_skipped(&skip_root, &mapped.path, &options) {
                            continue;
                        }
                        if tx.send(mapped).is_err() {
                            debug!("watch event dropped because the receiver is closed");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "watch backend error"),
            }
        })
        .map_err(|e| SyncError::Watch(e.to_string()))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(e.to_string()))?;

        Ok(Self {
            _watcher: watcher,
            rx,
            debouncer: Debouncer::new(debounce),
        })
    }

    /// Wait for the next debounced batch. Returns `None` once the watcher
    /// has shut down and nothing is pending.
    pub async fn next_batch(&mut self) -> Option<Vec<WatchEvent>> {
        loop {
            let deadline = self.debouncer.next_deadline();
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => self.debouncer.push(event, Instant::now()),
                    None => {
                        let rest = self.debouncer.drain_all();
                        return (!rest.is_empty()).then_some(rest);
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    let ready = self.debouncer.drain_ready(Instant::now());
                    if !ready.is_empty() {
                        return Some(ready);
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

fn is_skipped(root: &Path, path: &Path, options: &ScanOptions) -> bool {
    options.skips(path.strip_prefix(root).unwrap_or(path))
}

fn map_notify_event(event: Event) -> Vec<WatchEvent> {
    let Event { kind, paths, .. } = event;
    let mapped = match kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => WatchEventKind::Added,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(mode)) => return map_rename(paths, mode),
        EventKind::Modify(_) => WatchEventKind::Changed,
        EventKind::Remove(RemoveKind::Folder) => WatchEventKind::RemovedDirectory,
        EventKind::Remove(_) => WatchEventKind::Removed,
        _ => return Vec::new(),
    };
    paths
        .into_iter()
        .map(|path| WatchEvent::new(mapped, path))
        .collect()
}

fn map_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<WatchEvent> {
    let arrived = |path: PathBuf| {
        if path.is_dir() {
            // Files inside a moved-in directory do not get their own events.
            None
        } else {
            Some(WatchEvent::new(WatchEventKind::Added, path))
        }
    };
    match mode {
        RenameMode::Both => {
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.first() {
                events.push(WatchEvent::new(WatchEventKind::RemovedDirectory, from.clone()));
            }
            if let Some(to) = paths.get(1) {
                events.extend(arrived(to.clone()));
            }
            events
        }
        RenameMode::From => paths
            .into_iter()
            .map(|path| WatchEvent::new(WatchEventKind::RemovedDirectory, path))
            .collect(),
        RenameMode::To => paths.into_iter().filter_map(arrived).collect(),
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .filter_map(|path| {
                if path.exists() {
                    arrived(path)
                } else {
                    Some(WatchEvent::new(WatchEventKind::RemovedDirectory, path))
                }
            })
            .collect(),
    }
}
