//! Diffing local state against the remote snapshot.

use std::collections::HashSet;
use std::path::PathBuf;

use bsync_hash::ContentHasher;
use bsync_types::{NormalizedPath, PathNormalizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::{ChangeBatch, ScanWarning};
use crate::entry::ChangeEntry;
use crate::scan::{LocalFile, ProjectListing};
use crate::snapshot::RemoteSnapshot;

/// Kind of a filesystem event delivered by the watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchEventKind {
    Added,
    Changed,
    Removed,
    RemovedDirectory,
}

/// A single filesystem event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Absolute, or relative to the project root.
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Computes change batches.
pub struct ChangeDetector;

impl ChangeDetector {
    /// The batch that turns `remote` into `local`.
    ///
    /// Snapshot paths missing locally become removals. Local files that are
    /// new or whose digest differs become saves. Unchanged files are elided.
    pub fn compute_batch(local: &[LocalFile], remote: &RemoteSnapshot) -> ChangeBatch {
        let local_paths: HashSet<&NormalizedPath> = local.iter().map(|f| &f.record.path).collect();
        let mut batch = ChangeBatch::new();

        for record in remote.records() {
            if !local_paths.contains(&record.path) {
                batch.insert(ChangeEntry::remove(record.path.clone()));
            }
        }

        for file in local {
            let record = &file.record;
            let changed = remote
                .get(&record.path)
                .map_or(true, |known| known.digest != record.digest);
            if changed {
                batch.insert(ChangeEntry::save_file(
                    record.path.clone(),
                    record.digest,
                    record.size,
                    file.source.clone(),
                ));
            }
        }

        let summary = batch.summary();
        debug!(
            saves = summary.saves,
            removals = summary.removals,
            bytes = summary.bytes,
            "computed change batch"
        );
        batch
    }

    /// Save entries for every local file, used for full submissions.
    pub fn full_batch(local: &[LocalFile]) -> ChangeBatch {
        local
            .iter()
            .map(|file| {
                ChangeEntry::save_file(
                    file.record.path.clone(),
                    file.record.digest,
                    file.record.size,
                    file.source.clone(),
                )
            })
            .collect()
    }

    /// Turn watcher events into a batch without hashing the whole project.
    ///
    /// `listing` is taken after the events happened and decides what belongs
    /// to the project: events for ignored files, or for a source that loses
    /// to another one after prefix stripping, are dropped. Added and changed
    /// files are hashed and skipped when the snapshot already holds the same
    /// digest. A removal covers every snapshot path that could have come from
    /// the removed file or directory; paths still provided by another source
    /// are re-hashed from that source instead of removed.
    pub fn batch_for_events(
        events: &[WatchEvent],
        remote: &RemoteSnapshot,
        listing: &ProjectListing,
        normalizer: &PathNormalizer,
    ) -> (ChangeBatch, Vec<ScanWarning>) {
        let root = listing.root();
        let unstripped = PathNormalizer::new();
        let mut batch = ChangeBatch::new();
        let mut warnings = Vec::new();

        for event in events {
            let source = if event.path.is_absolute() {
                event.path.clone()
            } else {
                root.join(&event.path)
            };

            match event.kind {
                WatchEventKind::Added | WatchEventKind::Changed => {
                    let path = match normalizer.normalize_under(root, &source) {
                        Ok(path) => path,
                        Err(e) => {
                            warnings.push(ScanWarning::new(&source, e.to_string()));
                            continue;
                        }
                    };
                    if !listing.admits(&path, &source) {
                        debug!(%path, source = %source.display(), "not part of the project, skipping");
                        continue;
                    }
                    save_if_changed(&mut batch, &mut warnings, remote, path, source);
                }
                WatchEventKind::Removed | WatchEventKind::RemovedDirectory => {
                    let removed = match unstripped.normalize_under(root, &source) {
                        Ok(removed) => removed,
                        Err(e) => {
                            warnings.push(ScanWarning::new(&source, e.to_string()));
                            continue;
                        }
                    };
                    for path in affected_by_removal(remote, &removed, normalizer) {
                        match listing.get(&path) {
                            None => {
                                batch.insert(ChangeEntry::remove(path));
                            }
                            Some(other) => {
                                let other = other.to_path_buf();
                                save_if_changed(&mut batch, &mut warnings, remote, path, other);
                            }
                        }
                    }
                }
            }
        }

        (batch, warnings)
    }
}

fn save_if_changed(
    batch: &mut ChangeBatch,
    warnings: &mut Vec<ScanWarning>,
    remote: &RemoteSnapshot,
    path: NormalizedPath,
    source: PathBuf,
) {
    match ContentHasher::FILE.hash_file(&source) {
        Ok((digest, size)) => {
            if remote.get(&path).is_some_and(|r| r.digest == digest) {
                debug!(%path, "unchanged, skipping");
            } else {
                batch.insert(ChangeEntry::save_file(path, digest, size, source));
            }
        }
        Err(e) => {
            warn!(%path, error = %e, "skipping unreadable file");
            warnings.push(ScanWarning::new(&source, e.to_string()));
        }
    }
}

/// Snapshot paths that a file at or under `removed` (root-relative, not
/// prefix-stripped) could have provided.
fn affected_by_removal(
    remote: &RemoteSnapshot,
    removed: &NormalizedPath,
    normalizer: &PathNormalizer,
) -> Vec<NormalizedPath> {
    if normalizer.strip_prefixes().is_empty() {
        return remote.paths_within(removed).cloned().collect();
    }
    remote
        .records()
        .map(|record| &record.path)
        .filter(|path| candidate_sources(path, normalizer).any(|source| source.is_within(removed)))
        .cloned()
        .collect()
}

/// Root-relative source paths that normalize to `path`.
fn candidate_sources<'a>(
    path: &'a NormalizedPath,
    normalizer: &'a PathNormalizer,
) -> impl Iterator<Item = NormalizedPath> + 'a {
    std::iter::once(path.as_str().to_string())
        .chain(
            normalizer
                .strip_prefixes()
                .iter()
                .map(move |prefix| format!("{prefix}/{path}")),
        )
        .filter_map(|raw| NormalizedPath::parse(&raw).ok())
        .filter(move |raw| {
            normalizer
                .normalize(raw.as_str())
                .is_ok_and(|normalized| &normalized == path)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ScanOptions, Scanner};
    use bsync_types::FileRecord;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;

    fn p(s: &str) -> NormalizedPath {
        NormalizedPath::parse(s).unwrap()
    }

    fn local(path: &str, body: &[u8]) -> LocalFile {
        LocalFile {
            record: FileRecord::new(p(path), ContentHasher::FILE.hash(body), body.len() as u64),
            source: PathBuf::from("/src").join(path),
        }
    }

    fn snapshot(files: &[(&str, &[u8])]) -> RemoteSnapshot {
        RemoteSnapshot::from_records(files.iter().map(|(path, body)| local(path, body).record))
    }

    #[test]
    fn manifest_and_two_sources_scenario() {
        // Remote holds manifest, a.js and b.js; locally a.js changed and
        // b.js was deleted.
        let remote = snapshot(&[
            ("manifest.json", b"{}"),
            ("a.js", b"old"),
            ("b.js", b"b"),
        ]);
        let files = vec![local("manifest.json", b"{}"), local("a.js", b"new")];

        let batch = ChangeDetector::compute_batch(&files, &remote);
        assert_eq!(batch.len(), 2);
        assert!(batch.get(&p("a.js")).unwrap().is_save());
        assert!(batch.get(&p("b.js")).unwrap().is_remove());
        assert!(batch.get(&p("manifest.json")).is_none());
        assert_eq!(batch.byte_size(), 3);
    }

    #[test]
    fn empty_local_removes_everything() {
        let remote = snapshot(&[("a", b"1"), ("b", b"2")]);
        let batch = ChangeDetector::compute_batch(&[], &remote);
        assert_eq!(batch.summary().removals, 2);
        assert_eq!(batch.byte_size(), 0);
    }

    #[test]
    fn empty_snapshot_saves_everything() {
        let files = vec![local("a", b"1"), local("b", b"22")];
        let batch = ChangeDetector::compute_batch(&files, &RemoteSnapshot::empty());
        assert_eq!(batch, ChangeDetector::full_batch(&files));
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn listing_of(root: &Path, normalizer: &PathNormalizer, options: ScanOptions) -> ProjectListing {
        Scanner::new(root, normalizer.clone(), options).listing().unwrap()
    }

    fn entries(batch: &ChangeBatch) -> Vec<(&str, bool)> {
        batch
            .entries()
            .map(|e| (e.path.as_str(), e.is_save()))
            .collect()
    }

    #[test]
    fn events_skip_unchanged_and_expand_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "same.js", "same");
        write(dir.path(), "new.js", "new");
        let remote = snapshot(&[
            ("same.js", b"same"),
            ("lib/x.js", b"x"),
            ("lib/y.js", b"y"),
            ("old.js", b"o"),
        ]);
        let events = vec![
            WatchEvent::new(WatchEventKind::Changed, dir.path().join("same.js")),
            WatchEvent::new(WatchEventKind::Added, "new.js"),
            WatchEvent::new(WatchEventKind::RemovedDirectory, "lib"),
            WatchEvent::new(WatchEventKind::Removed, "old.js"),
            WatchEvent::new(WatchEventKind::Removed, "never-uploaded.js"),
        ];
        let normalizer = PathNormalizer::new();
        let listing = listing_of(dir.path(), &normalizer, ScanOptions::default());

        let (batch, warnings) =
            ChangeDetector::batch_for_events(&events, &remote, &listing, &normalizer);
        assert!(warnings.is_empty());
        assert_eq!(
            entries(&batch),
            [
                ("lib/x.js", false),
                ("lib/y.js", false),
                ("new.js", true),
                ("old.js", false),
            ]
        );
    }

    #[test]
    fn ignored_files_in_events_are_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "*.log\n");
        write(dir.path(), "debug.log", "noise");
        write(dir.path(), "node_modules/x/i.js", "dep");
        write(dir.path(), "keep.js", "k");
        let normalizer = PathNormalizer::new();
        let options = ScanOptions {
            ignore: vec!["node_modules/".into()],
            ..ScanOptions::default()
        };
        let listing = listing_of(dir.path(), &normalizer, options);
        let events = vec![
            WatchEvent::new(WatchEventKind::Added, dir.path().join("debug.log")),
            WatchEvent::new(WatchEventKind::Added, dir.path().join("node_modules/x/i.js")),
            WatchEvent::new(WatchEventKind::Added, dir.path().join("keep.js")),
        ];

        let (batch, warnings) =
            ChangeDetector::batch_for_events(&events, &RemoteSnapshot::empty(), &listing, &normalizer);
        assert!(warnings.is_empty());
        assert_eq!(entries(&batch), [("keep.js", true)]);
    }

    #[test]
    fn shadowed_build_output_event_is_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.js", "source");
        write(dir.path(), "dist/app.js", "built");
        let normalizer = PathNormalizer::with_strip_prefixes(["dist"]);
        let listing = listing_of(dir.path(), &normalizer, ScanOptions::default());
        let remote = snapshot(&[("app.js", b"source")]);
        let events = vec![WatchEvent::new(WatchEventKind::Changed, "dist/app.js")];

        let (batch, _) = ChangeDetector::batch_for_events(&events, &remote, &listing, &normalizer);
        assert!(batch.is_empty());
    }

    #[test]
    fn removing_a_strip_prefix_directory_removes_its_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "manifest.json", "{}");
        let normalizer = PathNormalizer::with_strip_prefixes(["dist"]);
        let listing = listing_of(dir.path(), &normalizer, ScanOptions::default());
        let remote = snapshot(&[
            ("manifest.json", b"{}"),
            ("app.js", b"built"),
            ("lib/u.js", b"u"),
        ]);
        let events = vec![WatchEvent::new(WatchEventKind::RemovedDirectory, "dist")];

        let (batch, warnings) =
            ChangeDetector::batch_for_events(&events, &remote, &listing, &normalizer);
        assert!(warnings.is_empty());
        assert_eq!(entries(&batch), [("app.js", false), ("lib/u.js", false)]);
    }

    #[test]
    fn removing_a_stripped_subdirectory_keeps_same_named_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sub/a.js", "a");
        let normalizer = PathNormalizer::with_strip_prefixes(["dist"]);
        let listing = listing_of(dir.path(), &normalizer, ScanOptions::default());
        // sub/a.js came from the top-level sub/, sub/b.js from dist/sub/.
        let remote = snapshot(&[("sub/a.js", b"a"), ("sub/b.js", b"b")]);
        let events = vec![WatchEvent::new(
            WatchEventKind::RemovedDirectory,
            dir.path().join("dist/sub"),
        )];

        let (batch, _) = ChangeDetector::batch_for_events(&events, &remote, &listing, &normalizer);
        assert_eq!(entries(&batch), [("sub/b.js", false)]);
    }

    #[test]
    fn removed_output_falls_back_to_the_remaining_source() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sub/a.js", "top-level");
        let normalizer = PathNormalizer::with_strip_prefixes(["dist"]);
        let listing = listing_of(dir.path(), &normalizer, ScanOptions::default());
        // The remote copy was built from dist/sub/a.js, which is gone now.
        let remote = snapshot(&[("sub/a.js", b"built")]);
        let events = vec![WatchEvent::new(WatchEventKind::RemovedDirectory, "dist")];

        let (batch, _) = ChangeDetector::batch_for_events(&events, &remote, &listing, &normalizer);
        assert_eq!(entries(&batch), [("sub/a.js", true)]);
        assert_eq!(batch.byte_size(), 9);
    }

    #[test]
    fn unreadable_listed_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let vanished = dir.path().join("vanished.js");
        let listing = ProjectListing::new(dir.path(), [(p("vanished.js"), vanished.clone())]);
        let events = vec![WatchEvent::new(WatchEventKind::Added, vanished)];
        let (batch, warnings) = ChangeDetector::batch_for_events(
            &events,
            &RemoteSnapshot::empty(),
            &listing,
            &PathNormalizer::new(),
        );
        assert!(batch.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    fn arb_tree() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
        prop::collection::btree_map("[a-d]{1,2}(/[a-d]{1,2})?", prop::collection::vec(0u8..4, 0..4), 0..12)
    }

    fn to_local(tree: &BTreeMap<String, Vec<u8>>) -> Vec<LocalFile> {
        tree.iter().map(|(path, body)| local(path, body)).collect()
    }

    proptest! {
        #[test]
        fn applying_the_batch_reaches_local_state(local_tree in arb_tree(), remote_tree in arb_tree()) {
            let files = to_local(&local_tree);
            let remote = RemoteSnapshot::from_records(to_local(&remote_tree).into_iter().map(|f| f.record));

            let batch = ChangeDetector::compute_batch(&files, &remote);
            let after = remote.applying(&batch);
            let expected = RemoteSnapshot::from_records(files.iter().map(|f| f.record.clone()));
            prop_assert_eq!(&after, &expected);

            // Once applied, nothing is left to do.
            prop_assert!(ChangeDetector::compute_batch(&files, &after).is_empty());
        }

        #[test]
        fn at_most_one_entry_per_path(local_tree in arb_tree(), remote_tree in arb_tree()) {
            let files = to_local(&local_tree);
            let remote = RemoteSnapshot::from_records(to_local(&remote_tree).into_iter().map(|f| f.record));
            let batch = ChangeDetector::compute_batch(&files, &remote);
            let unique: HashSet<_> = batch.entries().map(|e| e.path.clone()).collect();
            prop_assert_eq!(unique.len(), batch.len());
            for entry in batch.saves() {
                prop_assert!(local_tree.contains_key(entry.path.as_str()));
            }
        }
    }
}
