//! Error types for the index crate.

use bsync_hash::HashError;
use bsync_types::TypeError;

/// Errors that can occur while scanning or diffing a project.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The project root does not exist or is not a directory.
    #[error("project root not found: {0}")]
    RootNotFound(String),

    /// A path could not be normalized.
    #[error(transparent)]
    Path(#[from] TypeError),

    /// A file could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// An ignore pattern could not be compiled.
    #[error("invalid ignore pattern: {0}")]
    Pattern(String),

    /// A background hashing task failed.
    #[error("hashing task failed: {0}")]
    Task(String),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
