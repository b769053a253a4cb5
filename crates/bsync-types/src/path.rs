//! Canonical project-relative paths.
//!
//! Local scans, watcher events and remote listings all spell paths slightly
//! differently (Windows separators, `./` prefixes, build-output directories).
//! Everything is funnelled through [`PathNormalizer`] so that the two sides
//! compare equal on a plain string key.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A project-relative path in canonical form.
///
/// Invariants: `/`-separated, no empty, `.` or `..` segments, no leading or
/// trailing separator, never empty.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalize `raw` without stripping any build-output prefix.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        clean(raw).map(Self)
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns `true` if `self` equals `dir` or lives underneath it.
    pub fn is_within(&self, dir: &NormalizedPath) -> bool {
        self.0 == dir.0
            || (self.0.len() > dir.0.len()
                && self.0.starts_with(&dir.0)
                && self.0.as_bytes()[dir.0.len()] == b'/')
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NormalizedPath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NormalizedPath> for String {
    fn from(path: NormalizedPath) -> Self {
        path.0
    }
}

/// Canonicalizes raw paths into [`NormalizedPath`]s.
///
/// Build-output prefixes (for example `dist/`) are stripped so a locally
/// built `dist/app.js` lines up with the remote `app.js`. Only the first
/// matching prefix is removed.
#[derive(Clone, Debug, Default)]
pub struct PathNormalizer {
    strip_prefixes: Vec<String>,
}

impl PathNormalizer {
    /// A normalizer that strips nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A normalizer that strips the given build-output prefixes.
    ///
    /// Prefixes that do not normalize to a valid path are ignored.
    pub fn with_strip_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let strip_prefixes = prefixes
            .into_iter()
            .filter_map(|p| clean(p.as_ref()).ok())
            .collect();
        Self { strip_prefixes }
    }

    /// Configured prefixes, in canonical form.
    pub fn strip_prefixes(&self) -> &[String] {
        &self.strip_prefixes
    }

    /// Normalize a raw path string.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedPath, TypeError> {
        let cleaned = clean(raw)?;
        for prefix in &self.strip_prefixes {
            if let Some(rest) = cleaned
                .strip_prefix(prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                return Ok(NormalizedPath(rest.to_string()));
            }
        }
        Ok(NormalizedPath(cleaned))
    }

    /// Normalize a filesystem path relative to the project `root`.
    pub fn normalize_under(&self, root: &Path, path: &Path) -> Result<NormalizedPath, TypeError> {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let raw = relative.to_str().ok_or_else(|| TypeError::InvalidPath {
            path: relative.to_string_lossy().into_owned(),
            reason: "not valid UTF-8".into(),
        })?;
        self.normalize(raw)
    }
}

fn clean(raw: &str) -> Result<String, TypeError> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(TypeError::InvalidPath {
                    path: raw.to_string(),
                    reason: "escapes the project root".into(),
                })
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(TypeError::InvalidPath {
            path: raw.to_string(),
            reason: "empty path".into(),
        });
    }
    Ok(segments.join("/"))
}
