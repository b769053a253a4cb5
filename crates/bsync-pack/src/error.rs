use std::path::PathBuf;

use bsync_types::NormalizedPath;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("project is {actual} bytes, over the {limit} byte limit")]
    ProjectTooLarge { actual: u64, limit: u64 },

    #[error("change set is {actual} bytes, over the {limit} byte limit")]
    ChangeTooLarge { actual: u64, limit: u64 },

    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} changed while packaging: expected {expected} bytes, read {actual}")]
    SizeChanged {
        path: NormalizedPath,
        expected: u64,
        actual: u64,
    },

    #[error("save entry {0} has no payload")]
    MissingPayload(NormalizedPath),

    #[error("invalid package magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported package version: {0}")]
    UnsupportedVersion(u32),

    #[error("package checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt package entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for {0}")]
    CrcMismatch(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

impl PackError {
    /// Returns `true` for the two size-limit rejections.
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            Self::ProjectTooLarge { .. } | Self::ChangeTooLarge { .. }
        )
    }
}

pub type PackResult<T> = Result<T, PackError>;
