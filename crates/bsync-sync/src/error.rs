use bsync_index::IndexError;
use bsync_pack::PackError;
use bsync_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no `{name}` found in the project")]
    MissingManifest { name: String },

    #[error("found {count} files named `{name}`, expected exactly one")]
    DuplicateManifest { name: String, count: usize },

    #[error("project contains no files")]
    EmptyProject,

    #[error("no build host answered for project {project_id}")]
    NoHostAvailable { project_id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("build host failed with status {status}")]
    HostFailure { status: u16 },

    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("giving up after {attempts} host failures: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SyncError>,
    },

    #[error("state store error: {0}")]
    Store(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Failures attributable to the build host rather than the request.
    /// These invalidate the sticky host.
    pub fn is_host_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HostFailure { .. })
    }

    /// Failures worth retrying later without changing anything locally.
    pub fn is_retryable(&self) -> bool {
        self.is_host_failure()
            || matches!(
                self,
                Self::RetriesExhausted { .. } | Self::NoHostAvailable { .. }
            )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
