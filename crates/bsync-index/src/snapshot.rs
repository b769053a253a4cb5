//! The last known remote state of the project.

use std::collections::BTreeMap;

use bsync_types::{FileRecord, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::batch::ChangeBatch;

/// Path-keyed set of file records believed to exist remotely.
///
/// Snapshots are values: applying a batch produces a new snapshot, leaving
/// the original untouched for anyone still reading it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FileRecord>", into = "Vec<FileRecord>")]
pub struct RemoteSnapshot {
    records: BTreeMap<NormalizedPath, FileRecord>,
}

impl RemoteSnapshot {
    /// An empty snapshot (nothing uploaded yet).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from records. Later records win on duplicate paths.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.path.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, path: &NormalizedPath) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &NormalizedPath) -> bool {
        self.records.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in path order.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Total recorded size of all files.
    pub fn total_bytes(&self) -> u64 {
        self.records.values().map(|r| r.size).sum()
    }

    /// Paths equal to `dir` or underneath it.
    pub fn paths_within<'a>(
        &'a self,
        dir: &'a NormalizedPath,
    ) -> impl Iterator<Item = &'a NormalizedPath> + 'a {
        self.records
            .range(dir.clone()..)
            .map(|(path, _)| path)
            .take_while(move |path| path.as_str().starts_with(dir.as_str()))
            .filter(move |path| path.is_within(dir))
    }

    /// The snapshot that results from the remote applying `batch`.
    pub fn applying(&self, batch: &ChangeBatch) -> Self {
        let mut records = self.records.clone();
        for entry in batch.entries() {
            match entry.digest {
                Some(digest) if entry.is_save() => {
                    records.insert(
                        entry.path.clone(),
                        FileRecord::new(entry.path.clone(), digest, entry.size),
                    );
                }
                _ => {
                    records.remove(&entry.path);
                }
            }
        }
        Self { records }
    }
}

impl From<Vec<FileRecord>> for RemoteSnapshot {
    fn from(records: Vec<FileRecord>) -> Self {
        Self::from_records(records)
    }
}

impl From<RemoteSnapshot> for Vec<FileRecord> {
    fn from(snapshot: RemoteSnapshot) -> Self {
        snapshot.records.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ChangeEntry;
    use bsync_hash::ContentHasher;

    fn p(s: &str) -> NormalizedPath {
        NormalizedPath::parse(s).unwrap()
    }

    fn record(path: &str, body: &[u8]) -> FileRecord {
        FileRecord::new(p(path), ContentHasher::FILE.hash(body), body.len() as u64)
    }

    #[test]
    fn applying_leaves_original_untouched() {
        let before = RemoteSnapshot::from_records([record("a.js", b"1"), record("b.js", b"2")]);
        let mut batch = ChangeBatch::new();
        batch.insert(ChangeEntry::remove(p("a.js")));
        batch.insert(ChangeEntry::save_inline(p("c.js"), &b"3"[..]));

        let after = before.applying(&batch);
        assert_eq!(before.len(), 2);
        assert!(before.contains(&p("a.js")));
        assert!(!after.contains(&p("a.js")));
        assert!(after.contains(&p("b.js")));
        assert_eq!(after.get(&p("c.js")), Some(&record("c.js", b"3")));
    }

    #[test]
    fn paths_within_directory() {
        let snap = RemoteSnapshot::from_records([
            record("assets/a.png", b""),
            record("assets/img/b.png", b""),
            record("assets-old/c.png", b""),
            record("assetsx", b""),
            record("index.html", b""),
        ]);
        let dir = p("assets");
        let within: Vec<_> = snap.paths_within(&dir).map(|p| p.as_str()).collect();
        assert_eq!(within, ["assets/a.png", "assets/img/b.png"]);
    }

    #[test]
    fn paths_within_exact_file() {
        let snap = RemoteSnapshot::from_records([record("a.js", b""), record("a.jsx", b"")]);
        let dir = p("a.js");
        let within: Vec<_> = snap.paths_within(&dir).map(|p| p.as_str()).collect();
        assert_eq!(within, ["a.js"]);
    }

    #[test]
    fn serializes_as_record_list() {
        let snap = RemoteSnapshot::from_records([record("b", b"x"), record("a", b"y")]);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.starts_with("[{\"path\":\"a\""));
        let back: RemoteSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
