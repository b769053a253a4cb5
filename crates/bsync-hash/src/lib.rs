//! Content hashing for bsync.
//!
//! Provides domain-separated BLAKE3 hashing. File digests are computed by
//! streaming, so hashing a large asset never holds it in memory.

pub mod hasher;

pub use hasher::{ContentHasher, HashError};
