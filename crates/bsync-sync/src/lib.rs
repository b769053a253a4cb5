//! Sync pipeline for bsync.
//!
//! Drives one project from local edits to a remote build: scan and diff,
//! enforce size limits, package, pick a sticky build host, submit, and
//! record the new remote state on success.

pub mod affinity;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod transport;
pub mod watcher;

pub use affinity::{routing_hint, HostAffinityResolver, HostState};
pub use client::BuildSubmissionClient;
pub use config::{AffinityConfig, LimitsConfig, SyncConfig, CONFIG_FILE};
pub use error::{SyncError, SyncResult};
pub use pipeline::{FullOperation, PipelineStatus, SubmitOutcome, SyncPipeline};
pub use store::{InMemoryStateStore, JsonFileStore, StateStore, StateStoreExt};
pub use transport::Transport;
pub use watcher::{Debouncer, ProjectWatcher};
