use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::path::NormalizedPath;

/// One tracked project file: where it lives and what it contains.
///
/// Equality is `(path, digest)` only. `size` is carried for size accounting
/// and may be zero for records that came from a remote listing that did not
/// report sizes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: NormalizedPath,
    pub digest: Digest,
    #[serde(default)]
    pub size: u64,
}

impl FileRecord {
    pub fn new(path: NormalizedPath, digest: Digest, size: u64) -> Self {
        Self { path, digest, size }
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.digest == other.digest
    }
}

impl Eq for FileRecord {}
