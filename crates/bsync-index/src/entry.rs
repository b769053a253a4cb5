//! Change entries: one pending save or removal of a project file.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use bsync_hash::ContentHasher;
use bsync_types::{Digest, NormalizedPath};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What a change entry does to the remote copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Upload the file contents.
    Save,
    /// Delete the file remotely.
    Remove,
}

/// Where the contents of a save entry come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Read from disk at packaging time.
    File(PathBuf),
    /// Already held in memory.
    Inline(Bytes),
}

impl Payload {
    /// Open a reader over the payload bytes.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match self {
            Payload::File(path) => Ok(Box::new(File::open(path)?)),
            Payload::Inline(bytes) => Ok(Box::new(Cursor::new(bytes.as_ref()))),
        }
    }
}

/// A single pending change.
///
/// Save entries always carry a digest and a payload. Remove entries carry
/// neither and have a size of zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEntry {
    pub path: NormalizedPath,
    pub action: ChangeAction,
    pub size: u64,
    pub digest: Option<Digest>,
    pub payload: Option<Payload>,
}

impl ChangeEntry {
    /// A save whose contents will be streamed from `source`.
    pub fn save_file(path: NormalizedPath, digest: Digest, size: u64, source: PathBuf) -> Self {
        Self {
            path,
            action: ChangeAction::Save,
            size,
            digest: Some(digest),
            payload: Some(Payload::File(source)),
        }
    }

    /// A save of in-memory contents. The digest is computed here.
    pub fn save_inline(path: NormalizedPath, contents: impl Into<Bytes>) -> Self {
        let contents = contents.into();
        let digest = ContentHasher::FILE.hash(&contents);
        Self {
            path,
            action: ChangeAction::Save,
            size: contents.len() as u64,
            digest: Some(digest),
            payload: Some(Payload::Inline(contents)),
        }
    }

    /// A removal.
    pub fn remove(path: NormalizedPath) -> Self {
        Self {
            path,
            action: ChangeAction::Remove,
            size: 0,
            digest: None,
            payload: None,
        }
    }

    pub fn is_save(&self) -> bool {
        self.action == ChangeAction::Save
    }

    pub fn is_remove(&self) -> bool {
        self.action == ChangeAction::Remove
    }

    /// Read the full contents of a save entry into memory.
    ///
    /// Returns `Ok(None)` for removals. Fails if the file cannot be read or
    /// its length no longer matches the recorded size.
    pub fn read_contents(&self) -> io::Result<Option<Vec<u8>>> {
        let Some(payload) = &self.payload else {
            return Ok(None);
        };
        let mut buf = Vec::with_capacity(self.size as usize);
        payload.open()?.read_to_end(&mut buf)?;
        if buf.len() as u64 != self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} changed while reading: expected {} bytes, got {}",
                    self.path,
                    self.size,
                    buf.len()
                ),
            ));
        }
        Ok(Some(buf))
    }
}
