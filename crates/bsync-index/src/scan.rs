//! Project scanning: walk the tree, normalize paths, hash contents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bsync_hash::ContentHasher;
use bsync_types::{FileRecord, NormalizedPath, PathNormalizer};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::batch::ScanWarning;
use crate::error::{IndexError, IndexResult};

/// Per-project ignore file, gitignore syntax.
pub const IGNORE_FILE: &str = ".bsyncignore";

/// Scanner settings.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Extra gitignore-style globs to exclude.
    pub ignore: Vec<String>,
    /// Directory names never descended into, wherever they appear.
    pub skip_dirs: Vec<String>,
    /// Root-relative paths never descended into.
    pub skip_paths: Vec<PathBuf>,
    /// Maximum number of files hashed at once.
    pub hash_concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            skip_dirs: vec![".git".into()],
            skip_paths: vec![PathBuf::from(".bsync")],
            hash_concurrency: 8,
        }
    }
}

impl ScanOptions {
    /// Returns `true` if events or walks should never look at `relative`,
    /// a path relative to the project root.
    pub fn skips(&self, relative: &Path) -> bool {
        self.skip_paths.iter().any(|p| relative.starts_with(p))
            || relative.components().any(|c| {
                c.as_os_str()
                    .to_str()
                    .is_some_and(|name| self.skip_dirs.iter().any(|d| d == name))
            })
    }
}

/// A local file that was found and hashed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub record: FileRecord,
    /// Absolute location on disk.
    pub source: PathBuf,
}

/// Result of a full project scan.
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    /// Hashed files in path order.
    pub files: Vec<LocalFile>,
    /// Files that were skipped.
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.record.size).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().map(|f| &f.record)
    }
}

/// The files a scan would hash, keyed by normalized path.
///
/// Ignored files are absent, and a path provided by several sources after
/// prefix stripping maps to the one the scanner keeps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectListing {
    root: PathBuf,
    files: BTreeMap<NormalizedPath, PathBuf>,
}

impl ProjectListing {
    pub fn new(
        root: impl Into<PathBuf>,
        files: impl IntoIterator<Item = (NormalizedPath, PathBuf)>,
    ) -> Self {
        Self {
            root: root.into(),
            files: files.into_iter().collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The source file that provides `path`.
    pub fn get(&self, path: &NormalizedPath) -> Option<&Path> {
        self.files.get(path).map(PathBuf::as_path)
    }

    /// Returns `true` if `source` is the file the scanner uses for `path`.
    pub fn admits(&self, path: &NormalizedPath, source: &Path) -> bool {
        self.files
            .get(path)
            .is_some_and(|listed| self.relative(listed) == self.relative(source))
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Walks a project root and produces hashed [`LocalFile`]s.
#[derive(Clone, Debug)]
pub struct Scanner {
    root: PathBuf,
    normalizer: PathNormalizer,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, normalizer: PathNormalizer, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            normalizer,
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// List candidate files without hashing them.
    ///
    /// Paths that fail normalization, or that collide with an earlier path
    /// after prefix stripping, become warnings.
    pub fn list(&self) -> IndexResult<(Vec<(NormalizedPath, PathBuf)>, Vec<ScanWarning>)> {
        if !self.root.is_dir() {
            return Err(IndexError::RootNotFound(self.root.display().to_string()));
        }

        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.options.ignore {
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| IndexError::Pattern(e.to_string()))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| IndexError::Pattern(e.to_string()))?;

        let options = self.options.clone();
        let root = self.root.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .overrides(overrides)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir
                    && entry.depth() > 0
                    && entry
                        .path()
                        .strip_prefix(&root)
                        .is_ok_and(|relative| options.skips(relative)))
            })
            .build();

        let mut sources = Vec::new();
        let mut warnings = Vec::new();
        for result in walker {
            match result {
                Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                    sources.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    warnings.push(ScanWarning::new(&self.root, e.to_string()));
                }
            }
        }
        sources.sort();

        let mut seen: BTreeMap<NormalizedPath, PathBuf> = BTreeMap::new();
        for source in sources {
            match self.normalizer.normalize_under(&self.root, &source) {
                Ok(path) => {
                    if let Some(first) = seen.get(&path) {
                        warnings.push(ScanWarning::new(
                            &source,
                            format!("{path} already provided by {}", first.display()),
                        ));
                    } else {
                        seen.insert(path, source);
                    }
                }
                Err(e) => warnings.push(ScanWarning::new(&source, e.to_string())),
            }
        }
        Ok((seen.into_iter().collect(), warnings))
    }

    /// The current [`ProjectListing`]. Listing warnings are only logged.
    pub fn listing(&self) -> IndexResult<ProjectListing> {
        let (files, warnings) = self.list()?;
        debug!(files = files.len(), warnings = warnings.len(), "listed project");
        Ok(ProjectListing::new(self.root.clone(), files))
    }

    /// Walk and hash the whole project.
    ///
    /// Hashing runs on the blocking pool, at most `hash_concurrency` files
    /// at a time. Files that cannot be read are reported as warnings.
    pub async fn scan(&self) -> IndexResult<ScanReport> {
        let (listing, warnings) = self.list()?;
        self.hash_listed(listing, warnings).await
    }

    async fn hash_listed(
        &self,
        listing: Vec<(NormalizedPath, PathBuf)>,
        mut warnings: Vec<ScanWarning>,
    ) -> IndexResult<ScanReport> {
        let semaphore = Arc::new(Semaphore::new(self.options.hash_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (path, source) in listing {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = ContentHasher::FILE.hash_file(&source);
                (path, source, result)
            });
        }

        let mut files = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, source, result) = joined.map_err(|e| IndexError::Task(e.to_string()))?;
            match result {
                Ok((digest, size)) => {
                    debug!(%path, digest = %digest.short_hex(), size, "hashed");
                    files.push(LocalFile {
                        record: FileRecord::new(path, digest, size),
                        source,
                    });
                }
                Err(e) => {
                    warn!(%path, error = %e, "skipping unreadable file");
                    warnings.push(ScanWarning::new(source, e.to_string()));
                }
            }
        }
        files.sort_by(|a, b| a.record.path.cmp(&b.record.path));

        debug!(files = files.len(), warnings = warnings.len(), "scan complete");
        Ok(ScanReport { files, warnings })
    }
}
