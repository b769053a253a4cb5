//! Relink wire entries.
//!
//! A relink sends only what changed: full contents for saves and bare paths
//! for removals. Each entry travels in its own frame (see [`RelinkCodec`]).
//!
//! [`RelinkCodec`]: crate::codec::RelinkCodec

use bsync_index::{ChangeAction, ChangeEntry};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Upper bound on a single encoded entry.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelinkEntry {
    Save { path: String, contents: Vec<u8> },
    Remove { path: String },
}

impl RelinkEntry {
    /// Materialize a change entry, reading save contents into memory.
    pub fn from_change(entry: &ChangeEntry) -> ProtocolResult<Self> {
        let path = entry.path.to_string();
        match entry.action {
            ChangeAction::Remove => Ok(Self::Remove { path }),
            ChangeAction::Save => {
                let contents = entry
                    .read_contents()
                    .map_err(|source| ProtocolError::Read {
                        path: path.clone(),
                        source,
                    })?
                    .unwrap_or_default();
                Ok(Self::Save { path, contents })
            }
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Save { path, .. } | Self::Remove { path } => path,
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Save { .. } => 1,
            Self::Remove { .. } => 2,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Save { .. } => "Save",
            Self::Remove { .. } => "Remove",
        }
    }
}
