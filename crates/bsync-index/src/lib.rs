//! Change detection for bsync.
//!
//! Scans the project tree, hashes file contents, and diffs the result
//! against the last known remote snapshot to produce a minimal batch of
//! save and remove operations.
//!
//! # Key Types
//!
//! - [`Scanner`] -- Walks the project root and hashes files concurrently
//! - [`ChangeDetector`] -- Diffs local files or watcher events against a snapshot
//! - [`ChangeBatch`] -- Deduplicated set of [`ChangeEntry`] values
//! - [`RemoteSnapshot`] -- Immutable record set believed to exist remotely

pub mod batch;
pub mod detector;
pub mod entry;
pub mod error;
pub mod scan;
pub mod snapshot;

pub use batch::{BatchSummary, ChangeBatch, ScanWarning};
pub use detector::{ChangeDetector, WatchEvent, WatchEventKind};
pub use entry::{ChangeAction, ChangeEntry, Payload};
pub use error::{IndexError, IndexResult};
pub use scan::{LocalFile, ProjectListing, ScanOptions, ScanReport, Scanner, IGNORE_FILE};
pub use snapshot::RemoteSnapshot;
