//! Change batches.
//!
//! A batch is the set of changes that turns the remote snapshot into the
//! local state. It holds at most one entry per path.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bsync_types::NormalizedPath;
use serde::Serialize;

use crate::entry::ChangeEntry;

/// A deduplicated set of pending changes, ordered by path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    entries: BTreeMap<NormalizedPath, ChangeEntry>,
    byte_size: u64,
}

impl ChangeBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, keeping at most one per path.
    ///
    /// A save always wins over a removal of the same path; otherwise the
    /// later entry replaces the earlier one. Returns the entry that was
    /// dropped, if any.
    pub fn insert(&mut self, entry: ChangeEntry) -> Option<ChangeEntry> {
        if let Some(existing) = self.entries.get(&entry.path) {
            if existing.is_save() && entry.is_remove() {
                return Some(entry);
            }
        }
        self.byte_size += entry.size;
        let previous = self.entries.insert(entry.path.clone(), entry);
        if let Some(prev) = &previous {
            self.byte_size -= prev.size;
        }
        previous
    }

    /// Look up the entry for a path.
    pub fn get(&self, path: &NormalizedPath) -> Option<&ChangeEntry> {
        self.entries.get(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the sizes of all save entries.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// All entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values()
    }

    /// Save entries in path order.
    pub fn saves(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values().filter(|e| e.is_save())
    }

    /// Remove entries in path order.
    pub fn removals(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values().filter(|e| e.is_remove())
    }

    /// Consume the batch, yielding entries in path order.
    pub fn into_entries(self) -> Vec<ChangeEntry> {
        self.entries.into_values().collect()
    }

    /// Counts suitable for display.
    pub fn summary(&self) -> BatchSummary {
        let saves = self.saves().count();
        BatchSummary {
            saves,
            removals: self.entries.len() - saves,
            bytes: self.byte_size,
        }
    }
}

impl FromIterator<ChangeEntry> for ChangeBatch {
    fn from_iter<T: IntoIterator<Item = ChangeEntry>>(iter: T) -> Self {
        let mut batch = Self::new();
        for entry in iter {
            batch.insert(entry);
        }
        batch
    }
}

/// Entry counts of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub saves: usize,
    pub removals: usize,
    pub bytes: u64,
}

/// A file that was skipped during scanning or event handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

impl ScanWarning {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}
