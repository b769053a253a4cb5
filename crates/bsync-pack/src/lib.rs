//! Package format for bsync.
//!
//! Packages a project, or an incremental change set, into one
//! zstd-compressed container with per-entry CRC32s and a BLAKE3 trailer,
//! and enforces upload size ceilings before any bytes are compressed.
//!
//! # Layout
//!
//! ```text
//! "BSPK" | version u32 BE | entry count u32 BE | zstd stream | BLAKE3 of all previous bytes
//! zstd stream := repeat { varint path_len | path | varint len | contents | crc32 BE }
//! ```

pub mod error;
pub mod format;
pub mod limits;
pub mod reader;
pub mod writer;

pub use error::{PackError, PackResult};
pub use limits::{SizeGuard, SizeVerdict};
pub use reader::{PackageReader, PackedFile};
pub use writer::{Archive, Package, ZstdArchiver};
