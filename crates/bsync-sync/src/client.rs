use std::sync::Arc;
use std::time::Duration;

use bsync_protocol::{BuildResult, Operation};
use tracing::{debug, info, warn};

use crate::affinity::HostState;
use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;

/// Longest response body echoed back in error messages.
const BODY_SNIPPET: usize = 512;

/// Sends one operation to the build service and interprets the answer.
pub struct BuildSubmissionClient {
    transport: Arc<dyn Transport>,
    project_id: String,
    manifest_name: String,
    request_timeout: Duration,
}

impl BuildSubmissionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        project_id: impl Into<String>,
        manifest_name: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            project_id: project_id.into(),
            manifest_name: manifest_name.into(),
            request_timeout,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Submit `operation`, routed to `host` when one is known.
    ///
    /// A structured result is returned as-is, whatever its code. Transport
    /// failures, timeouts and 5xx responses without a structured body are
    /// host failures.
    pub async fn submit(
        &self,
        operation: &Operation,
        host: Option<&HostState>,
    ) -> SyncResult<BuildResult> {
        if let Some(package) = operation.package() {
            check_manifest(package.count_named(&self.manifest_name), &self.manifest_name)?;
        }

        let hint = host.map(|h| h.hint_key.as_str());
        let request = operation.to_request(&self.project_id, hint)?;
        info!(
            operation = operation.name(),
            project_id = %self.project_id,
            host = host.map(|h| h.host_id.as_str()).unwrap_or("-"),
            bytes = request.body.len(),
            "submitting"
        );

        let response = tokio::time::timeout(self.request_timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                SyncError::Transport(format!("no response within {:?}", self.request_timeout))
            })??;

        if let Some(result) = BuildResult::parse(&response.body) {
            debug!(status = response.status, code = %result.code, "build result");
            return Ok(result);
        }
        if response.is_server_error() {
            warn!(status = response.status, "host failure without a build result");
            return Err(SyncError::HostFailure {
                status: response.status,
            });
        }
        let body = String::from_utf8_lossy(&response.body);
        let body: String = body.chars().take(BODY_SNIPPET).collect();
        if (200..300).contains(&response.status) {
            return Err(bsync_protocol::ProtocolError::MalformedResult(body).into());
        }
        Err(SyncError::UnexpectedStatus {
            status: response.status,
            body,
        })
    }
}

/// Full submissions must carry exactly one manifest.
pub(crate) fn check_manifest(count: usize, name: &str) -> SyncResult<()> {
    match count {
        1 => Ok(()),
        0 => Err(SyncError::MissingManifest { name: name.into() }),
        count => Err(SyncError::DuplicateManifest {
            name: name.into(),
            count,
        }),
    }
}
