//! Foundation types for bsync.
//!
//! Every other bsync crate depends on `bsync-types`.
//!
//! # Key Types
//!
//! - [`Digest`]: content digest of a file (BLAKE3, hex on the wire)
//! - [`NormalizedPath`]: canonical project-relative path
//! - [`PathNormalizer`]: separator cleanup and build-output prefix stripping
//! - [`FileRecord`]: `(path, digest)` pair compared by value

pub mod digest;
pub mod error;
pub mod file;
pub mod path;

pub use digest::Digest;
pub use error::TypeError;
pub use file::FileRecord;
pub use path::{NormalizedPath, PathNormalizer};
