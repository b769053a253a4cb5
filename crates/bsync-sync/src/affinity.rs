//! Sticky build-host selection.
//!
//! Incremental builds are only fast when they land on the host that holds
//! the project's in-memory build cache. The resolver picks the least loaded
//! host once, remembers it per project, and hands out a routing hint that
//! lets the service's balancer reproduce the same placement.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bsync_hash::ContentHasher;
use bsync_protocol::{endpoints, headers, params, Availability, Method, TransportRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::store::{host_key, StateStore, StateStoreExt};
use crate::transport::Transport;

/// The preferred build host for one project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub host_id: String,
    pub hostname: String,
    /// Routing hint attached to every request for this project.
    pub hint_key: String,
    pub score: f64,
    pub last_confirmed_at: DateTime<Utc>,
}

/// Deterministic routing hint for candidate `index` of `project_id`.
pub fn routing_hint(project_id: &str, index: usize) -> String {
    ContentHasher::HINT
        .hash(format!("{project_id}#{index}").as_bytes())
        .short_hex()
}

pub struct HostAffinityResolver {
    transport: Arc<dyn Transport>,
    store: Arc<dyn StateStore>,
    current: RwLock<HashMap<String, Arc<HostState>>>,
}

impl HostAffinityResolver {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn StateStore>) -> Self {
        Self {
            transport,
            store,
            current: RwLock::new(HashMap::new()),
        }
    }

    /// The current host for `project_id`, if one is known.
    ///
    /// Falls back to the persisted value after a restart.
    pub fn current(&self, project_id: &str) -> Option<Arc<HostState>> {
        if let Some(state) = self
            .current
            .read()
            .ok()
            .and_then(|map| map.get(project_id).cloned())
        {
            return Some(state);
        }
        match self.store.get_as::<HostState>(&host_key(project_id)) {
            Ok(Some(state)) => {
                let state = Arc::new(state);
                self.publish(project_id, state.clone());
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(project_id, error = %e, "ignoring unreadable host state");
                None
            }
        }
    }

    /// Reuse the known host, or probe `candidate_count` candidates and keep
    /// the least loaded one.
    pub async fn resolve(
        &self,
        project_id: &str,
        candidate_count: usize,
        probe_timeout: Duration,
    ) -> SyncResult<Arc<HostState>> {
        if let Some(state) = self.current(project_id) {
            debug!(project_id, host = %state.host_id, "reusing sticky host");
            return Ok(state);
        }

        let (availability, hint_key) = self
            .probe(project_id, candidate_count.max(1), probe_timeout)
            .await?;
        let state = HostState {
            host_id: availability.host,
            hostname: availability.hostname,
            hint_key,
            score: availability.score,
            last_confirmed_at: Utc::now(),
        };
        info!(
            project_id,
            host = %state.host_id,
            hostname = %state.hostname,
            score = state.score,
            "selected build host"
        );
        self.remember(project_id, state)
    }

    /// Forget the host for `project_id` so the next resolve probes again.
    pub fn invalidate(&self, project_id: &str) -> SyncResult<()> {
        if let Ok(mut map) = self.current.write() {
            map.remove(project_id);
        }
        if self.store.remove(&host_key(project_id))? {
            warn!(project_id, "invalidated sticky host");
        }
        Ok(())
    }

    /// Refresh the host from availability piggybacked on a build result.
    ///
    /// The routing hint only reaches the host it was probed for, so a
    /// result from a different host drops the sticky state and the next
    /// submission probes again. Returns the refreshed state, or `None` when
    /// nothing is sticky afterwards.
    pub fn observe(
        &self,
        project_id: &str,
        availability: &Availability,
    ) -> SyncResult<Option<Arc<HostState>>> {
        let Some(current) = self.current(project_id) else {
            return Ok(None);
        };
        if current.host_id != availability.host {
            debug!(
                project_id,
                sticky = %current.host_id,
                reported = %availability.host,
                "build ran on another host"
            );
            self.invalidate(project_id)?;
            return Ok(None);
        }
        let hostname = if availability.hostname.is_empty() {
            current.hostname.clone()
        } else {
            availability.hostname.clone()
        };
        let state = HostState {
            host_id: current.host_id.clone(),
            hostname,
            hint_key: current.hint_key.clone(),
            score: availability.score,
            last_confirmed_at: Utc::now(),
        };
        debug!(project_id, host = %state.host_id, score = state.score, "host confirmed");
        self.remember(project_id, state).map(Some)
    }

    fn remember(&self, project_id: &str, state: HostState) -> SyncResult<Arc<HostState>> {
        self.store.set_as(&host_key(project_id), &state)?;
        let state = Arc::new(state);
        self.publish(project_id, state.clone());
        Ok(state)
    }

    fn publish(&self, project_id: &str, state: Arc<HostState>) {
        if let Ok(mut map) = self.current.write() {
            map.insert(project_id.to_string(), state);
        }
    }

    /// Probe candidates in parallel until all answer or the timeout passes.
    /// Lowest score wins; on a tie the earlier answer is kept.
    async fn probe(
        &self,
        project_id: &str,
        candidate_count: usize,
        probe_timeout: Duration,
    ) -> SyncResult<(Availability, String)> {
        let deadline = Instant::now() + probe_timeout;
        let mut probes = JoinSet::new();
        for index in 0..candidate_count {
            let transport = self.transport.clone();
            let hint = routing_hint(project_id, index);
            let request = TransportRequest::new(Method::Get, endpoints::AVAILABILITY)
                .header(headers::ROUTING_HINT, hint.clone())
                .param(params::PROJECT, project_id);
            probes.spawn(async move {
                let result = match transport.send(request).await {
                    Ok(resp) if (200..300).contains(&resp.status) => {
                        Availability::from_response(&resp).map_err(SyncError::from)
                    }
                    Ok(resp) => Err(SyncError::HostFailure { status: resp.status }),
                    Err(e) => Err(e),
                };
                (hint, result)
            });
        }

        let mut best: Option<(Availability, String)> = None;
        loop {
            match tokio::time::timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok((hint, Ok(availability))))) => {
                    debug!(project_id, %hint, host = %availability.host, score = availability.score, "probe answered");
                    let better = best
                        .as_ref()
                        .map_or(true, |(current, _)| availability.score < current.score);
                    if better {
                        best = Some((availability, hint));
                    }
                }
                Ok(Some(Ok((hint, Err(e))))) => {
                    warn!(project_id, %hint, error = %e, "probe failed");
                }
                Ok(Some(Err(e))) => {
                    warn!(project_id, error = %e, "probe task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(project_id, remaining = probes.len(), "probe timeout, using best answer so far");
                    probes.abort_all();
                    break;
                }
            }
        }

        best.ok_or_else(|| SyncError::NoHostAvailable {
            project_id: project_id.to_string(),
        })
    }
}
