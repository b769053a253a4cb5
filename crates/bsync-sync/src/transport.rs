use async_trait::async_trait;
use bsync_protocol::{TransportRequest, TransportResponse};

use crate::error::SyncResult;

/// Sends requests to the build service.
///
/// Implementations return `Err(SyncError::Transport)` when no response was
/// received at all. Any response, whatever its status, is returned as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> SyncResult<TransportResponse>;
}
