//! The sync pipeline: scan, diff, guard, package, route, submit.
//!
//! One pipeline drives one project. It owns the remote snapshot and is the
//! only writer of it; readers get a cheap `Arc` clone of the current value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bsync_index::{
    BatchSummary, ChangeBatch, ChangeDetector, ChangeEntry, RemoteSnapshot, ScanReport, Scanner,
    WatchEvent,
};
use bsync_pack::{Archive, SizeGuard, SizeVerdict};
use bsync_protocol::{BuildResult, Operation, RelinkEntry};
use bsync_types::{FileRecord, PathNormalizer};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::affinity::{HostAffinityResolver, HostState};
use crate::client::{check_manifest, BuildSubmissionClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{snapshot_key, StateStore, StateStoreExt};
use crate::transport::Transport;

/// A full-project operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FullOperation {
    Link,
    Test { filter: Option<String> },
    Publish { tag: Option<String> },
}

impl FullOperation {
    fn into_operation(self, package: bsync_pack::Package) -> Operation {
        match self {
            Self::Link => Operation::Link { package },
            Self::Test { filter } => Operation::Test { package, filter },
            Self::Publish { tag } => Operation::Publish { package, tag },
        }
    }
}

/// What a submission sent and what came back.
#[derive(Clone, Debug, Serialize)]
pub struct SubmitOutcome {
    pub operation: &'static str,
    pub result: BuildResult,
    pub entries: usize,
    pub raw_bytes: u64,
    pub size_warning: bool,
    pub warnings: usize,
}

/// Snapshot of the pipeline for display.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub project_id: String,
    pub snapshot_files: usize,
    pub snapshot_bytes: u64,
    pub pending: BatchSummary,
    pub host: Option<HostState>,
    pub warnings: usize,
}

pub struct SyncPipeline {
    root: PathBuf,
    config: SyncConfig,
    project_id: String,
    scanner: Scanner,
    guard: SizeGuard,
    archiver: Arc<dyn Archive>,
    client: BuildSubmissionClient,
    resolver: HostAffinityResolver,
    store: Arc<dyn StateStore>,
    snapshot: RwLock<Arc<RemoteSnapshot>>,
}

impl SyncPipeline {
    pub fn new(
        root: impl Into<PathBuf>,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        archiver: Arc<dyn Archive>,
        store: Arc<dyn StateStore>,
    ) -> SyncResult<Self> {
        let root = root.into();
        let project_id = config.project_id_for(&root)?;
        let scanner = Scanner::new(root.clone(), config.normalizer(), config.scan_options(&root));
        let client = BuildSubmissionClient::new(
            transport.clone(),
            project_id.clone(),
            config.manifest_name.clone(),
            config.request_timeout(),
        );
        let resolver = HostAffinityResolver::new(transport, store.clone());
        let snapshot = store
            .get_as::<RemoteSnapshot>(&snapshot_key(&project_id))?
            .unwrap_or_default();
        debug!(project_id, files = snapshot.len(), "loaded remote snapshot");

        Ok(Self {
            guard: config.size_guard(),
            root,
            config,
            project_id,
            scanner,
            archiver,
            client,
            resolver,
            store,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        self.scanner.normalizer()
    }

    /// The current remote snapshot.
    pub fn snapshot(&self) -> Arc<RemoteSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn current_host(&self) -> Option<Arc<HostState>> {
        self.resolver.current(&self.project_id)
    }

    /// Drop the sticky host so the next submission probes again.
    pub fn reset_host(&self) -> SyncResult<()> {
        self.resolver.invalidate(&self.project_id)
    }

    pub async fn scan(&self) -> SyncResult<ScanReport> {
        let report = self.scanner.scan().await?;
        for warning in &report.warnings {
            warn!(path = %warning.path.display(), "{}", warning.message);
        }
        Ok(report)
    }

    /// The batch that would be sent by a relink right now.
    pub async fn pending(&self) -> SyncResult<(ChangeBatch, ScanReport)> {
        let report = self.scan().await?;
        let batch = ChangeDetector::compute_batch(&report.files, &self.snapshot());
        Ok((batch, report))
    }

    pub async fn status(&self) -> SyncResult<PipelineStatus> {
        let (batch, report) = self.pending().await?;
        let snapshot = self.snapshot();
        Ok(PipelineStatus {
            project_id: self.project_id.clone(),
            snapshot_files: snapshot.len(),
            snapshot_bytes: snapshot.total_bytes(),
            pending: batch.summary(),
            host: self.current_host().map(|h| (*h).clone()),
            warnings: report.warnings.len(),
        })
    }

    /// Package and submit the whole project.
    pub async fn submit_full(&self, kind: FullOperation) -> SyncResult<SubmitOutcome> {
        let report = self.scan().await?;
        let records: Vec<FileRecord> = report.records().cloned().collect();
        let entries = ChangeDetector::full_batch(&report.files).into_entries();

        if entries.is_empty() {
            return Err(SyncError::EmptyProject);
        }
        let manifests = entries
            .iter()
            .filter(|e| e.path.file_name() == self.config.manifest_name)
            .count();
        check_manifest(manifests, &self.config.manifest_name)?;

        let verdict = self.guard.check_project(&entries)?;
        let raw_bytes: u64 = entries.iter().map(|e| e.size).sum();
        let entry_count = entries.len();

        let archiver = self.archiver.clone();
        let package = tokio::task::spawn_blocking(move || archiver.package(&entries))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;

        let operation = kind.into_operation(package);
        let result = self.submit_with_affinity(&operation).await?;
        if result.is_success() {
            self.replace_snapshot(RemoteSnapshot::from_records(records))?;
        }

        Ok(SubmitOutcome {
            operation: operation.name(),
            result,
            entries: entry_count,
            raw_bytes,
            size_warning: matches!(verdict, SizeVerdict::Warn { .. }),
            warnings: report.warnings.len(),
        })
    }

    pub async fn link(&self) -> SyncResult<SubmitOutcome> {
        self.submit_full(FullOperation::Link).await
    }

    pub async fn test(&self, filter: Option<String>) -> SyncResult<SubmitOutcome> {
        self.submit_full(FullOperation::Test { filter }).await
    }

    pub async fn publish(&self, tag: Option<String>) -> SyncResult<SubmitOutcome> {
        self.submit_full(FullOperation::Publish { tag }).await
    }

    /// Rescan and submit only what changed. Returns `None` when nothing did.
    pub async fn relink(&self) -> SyncResult<Option<SubmitOutcome>> {
        let base = self.snapshot();
        let report = self.scan().await?;
        let batch = ChangeDetector::compute_batch(&report.files, &base);
        self.relink_batch(batch, base, report.warnings.len()).await
    }

    /// Submit the changes described by watcher events without rehashing the
    /// whole project. The tree is listed again so ignore rules still apply.
    pub async fn relink_events(&self, events: &[WatchEvent]) -> SyncResult<Option<SubmitOutcome>> {
        let base = self.snapshot();
        let scanner = self.scanner.clone();
        let events = events.to_vec();
        let snapshot = base.clone();
        let (batch, warnings) = tokio::task::spawn_blocking(move || -> SyncResult<_> {
            let listing = scanner.listing()?;
            Ok(ChangeDetector::batch_for_events(
                &events,
                &snapshot,
                &listing,
                scanner.normalizer(),
            ))
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))??;
        for warning in &warnings {
            warn!(path = %warning.path.display(), "{}", warning.message);
        }
        self.relink_batch(batch, base, warnings.len()).await
    }

    async fn relink_batch(
        &self,
        batch: ChangeBatch,
        base: Arc<RemoteSnapshot>,
        warnings: usize,
    ) -> SyncResult<Option<SubmitOutcome>> {
        if batch.is_empty() {
            debug!(project_id = %self.project_id, "nothing to relink");
            return Ok(None);
        }

        let entries: Vec<ChangeEntry> = batch.entries().cloned().collect();
        let verdict = self.guard.check_change_batch(&entries)?;
        let summary = batch.summary();

        let wire = tokio::task::spawn_blocking(move || {
            entries
                .iter()
                .map(RelinkEntry::from_change)
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))??;

        let operation = Operation::Relink { entries: wire };
        let result = self.submit_with_affinity(&operation).await?;
        if result.is_success() {
            self.replace_snapshot(base.applying(&batch))?;
        }

        Ok(Some(SubmitOutcome {
            operation: operation.name(),
            result,
            entries: batch.len(),
            raw_bytes: summary.bytes,
            size_warning: matches!(verdict, SizeVerdict::Warn { .. }),
            warnings,
        }))
    }

    /// Submit, re-resolving the host after each host failure until
    /// `max_host_failures` consecutive failures.
    async fn submit_with_affinity(&self, operation: &Operation) -> SyncResult<BuildResult> {
        let max_failures = self.config.max_host_failures.max(1);
        let mut failures = 0u32;
        loop {
            let host = match self
                .resolver
                .resolve(
                    &self.project_id,
                    self.config.affinity.candidate_count,
                    self.config.affinity.probe_timeout(),
                )
                .await
            {
                Ok(host) => Some(host),
                Err(SyncError::NoHostAvailable { .. }) => {
                    warn!(project_id = %self.project_id, "no host answered, submitting without a routing hint");
                    None
                }
                Err(e) => return Err(e),
            };

            match self.client.submit(operation, host.as_deref()).await {
                Ok(result) => {
                    if let Some(availability) = &result.availability {
                        self.resolver.observe(&self.project_id, availability)?;
                    }
                    info!(
                        operation = operation.name(),
                        code = %result.code,
                        time_nano = result.time_nano.unwrap_or_default(),
                        "submission finished"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_host_failure() => {
                    failures += 1;
                    warn!(
                        operation = operation.name(),
                        attempt = failures,
                        error = %e,
                        "host failure"
                    );
                    self.resolver.invalidate(&self.project_id)?;
                    if failures >= max_failures {
                        return Err(SyncError::RetriesExhausted {
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn replace_snapshot(&self, snapshot: RemoteSnapshot) -> SyncResult<()> {
        self.store.set_as(&snapshot_key(&self.project_id), &snapshot)?;
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::routing_hint;
    use crate::store::InMemoryStateStore;
    use async_trait::async_trait;
    use bsync_pack::{Package, PackError, PackResult, ZstdArchiver};
    use bsync_protocol::{endpoints, headers, RelinkCodec, TransportRequest, TransportResponse};
    use bsync_types::NormalizedPath;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PROJECT: &str = "proj";

    /// Build service double: probes answer with a score per candidate,
    /// submissions pop queued responses and default to success.
    struct FakeService {
        scores: Vec<Option<f64>>,
        probes: AtomicUsize,
        submissions: Mutex<Vec<TransportRequest>>,
        responses: Mutex<VecDeque<SyncResult<TransportResponse>>>,
    }

    impl FakeService {
        fn new(scores: Vec<Option<f64>>) -> Arc<Self> {
            Arc::new(Self {
                scores,
                probes: AtomicUsize::new(0),
                submissions: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
            })
        }

        fn queue(&self, response: SyncResult<TransportResponse>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        fn submissions(&self) -> Vec<TransportRequest> {
            self.submissions.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.probes() + self.submissions().len()
        }
    }

    #[async_trait]
    impl Transport for FakeService {
        async fn send(&self, request: TransportRequest) -> SyncResult<TransportResponse> {
            if request.path == endpoints::AVAILABILITY {
                self.probes.fetch_add(1, Ordering::SeqCst);
                let hint = request.get_header(headers::ROUTING_HINT).unwrap_or_default();
                let Some(index) = (0..self.scores.len()).find(|&i| routing_hint(PROJECT, i) == hint)
                else {
                    return Err(SyncError::Transport(format!("no host behind hint {hint}")));
                };
                return match self.scores[index] {
                    Some(score) => Ok(TransportResponse::new(200, format!(r#"{{"score":{score}}}"#))
                        .with_header(headers::CHOSEN_HOST, format!("h{index}"))),
                    None => Err(SyncError::Transport("unreachable".into())),
                };
            }
            self.submissions.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TransportResponse::new(200, r#"{"code":"success"}"#)))
        }
    }

    struct CountingArchiver {
        inner: ZstdArchiver,
        calls: AtomicUsize,
    }

    impl Archive for CountingArchiver {
        fn package(&self, entries: &[ChangeEntry]) -> PackResult<Package> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.package(entries)
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        service: Arc<FakeService>,
        archiver: Arc<CountingArchiver>,
        store: Arc<InMemoryStateStore>,
        pipeline: SyncPipeline,
    }

    impl Harness {
        fn new(files: &[(&str, &str)], scores: Vec<Option<f64>>, mut config: SyncConfig) -> Self {
            config.affinity.candidate_count = scores.len().max(1);
            let dir = tempfile::tempdir().unwrap();
            for (path, body) in files {
                write(dir.path(), path, body);
            }
            let service = FakeService::new(scores);
            let archiver = Arc::new(CountingArchiver {
                inner: ZstdArchiver::new(),
                calls: AtomicUsize::new(0),
            });
            let store = Arc::new(InMemoryStateStore::new());
            let pipeline = SyncPipeline::new(
                dir.path(),
                config,
                service.clone(),
                archiver.clone(),
                store.clone(),
            )
            .unwrap();
            Self {
                dir,
                service,
                archiver,
                store,
                pipeline,
            }
        }

        fn write(&self, path: &str, body: &str) {
            write(self.dir.path(), path, body);
        }

        fn archive_calls(&self) -> usize {
            self.archiver.calls.load(Ordering::SeqCst)
        }
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn config() -> SyncConfig {
        let mut config = SyncConfig {
            project_id: Some(PROJECT.into()),
            ..SyncConfig::default()
        };
        config.affinity.probe_timeout_ms = 5_000;
        config
    }

    fn base_files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("manifest.json", "{}"),
            ("a.js", "export const a = 1;"),
            ("b.js", "export const b = 2;"),
        ]
    }

    fn p(s: &str) -> NormalizedPath {
        NormalizedPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn link_then_relink_sends_only_changes() {
        let h = Harness::new(&base_files(), vec![Some(0.5)], config());
        let outcome = h.pipeline.link().await.unwrap();
        assert!(outcome.result.is_success());
        assert_eq!(outcome.entries, 3);
        assert_eq!(h.pipeline.snapshot().len(), 3);

        h.write("a.js", "export const a = 42;");
        fs::remove_file(h.dir.path().join("b.js")).unwrap();
        let outcome = h.pipeline.relink().await.unwrap().unwrap();
        assert_eq!(outcome.operation, "relink");
        assert_eq!(outcome.entries, 2);

        let submissions = h.service.submissions();
        let last = submissions.last().unwrap();
        assert_eq!(last.path, endpoints::RELINK);
        let entries = RelinkCodec::decode_all(&last.body).unwrap();
        assert_eq!(
            entries,
            vec![
                RelinkEntry::Save {
                    path: "a.js".into(),
                    contents: b"export const a = 42;".to_vec()
                },
                RelinkEntry::Remove { path: "b.js".into() },
            ]
        );

        let snapshot = h.pipeline.snapshot();
        assert!(!snapshot.contains(&p("b.js")));
        assert_eq!(snapshot.get(&p("a.js")).unwrap().size, 20);

        // Nothing left to send.
        assert!(h.pipeline.relink().await.unwrap().is_none());
        assert_eq!(h.service.submissions().len(), 2);
    }

    #[tokio::test]
    async fn lowest_scoring_host_receives_submissions() {
        let h = Harness::new(&base_files(), vec![Some(0.9), Some(0.2), Some(0.5)], config());
        h.pipeline.link().await.unwrap();
        let submissions = h.service.submissions();
        assert_eq!(
            submissions[0].get_header(headers::ROUTING_HINT),
            Some(routing_hint(PROJECT, 1).as_str())
        );
        assert_eq!(h.pipeline.current_host().unwrap().host_id, "h1");
    }

    #[tokio::test]
    async fn host_is_probed_once_for_many_submissions() {
        let h = Harness::new(&base_files(), vec![Some(0.3), Some(0.1), Some(0.7)], config());
        for i in 0..4 {
            h.write("a.js", &format!("export const a = {i};"));
            h.pipeline.link().await.unwrap();
        }
        assert_eq!(h.service.probes(), 3);
        let hints: Vec<_> = h
            .service
            .submissions()
            .iter()
            .map(|r| r.get_header(headers::ROUTING_HINT).map(str::to_string))
            .collect();
        assert_eq!(hints.len(), 4);
        assert!(hints.iter().all(|hint| hint.as_deref() == Some(routing_hint(PROJECT, 1).as_str())));
    }

    #[tokio::test]
    async fn host_failure_triggers_fresh_probing() {
        let h = Harness::new(&base_files(), vec![Some(0.3), Some(0.1)], config());
        h.service.queue(Ok(TransportResponse::new(503, "unavailable")));

        let outcome = h.pipeline.link().await.unwrap();
        assert!(outcome.result.is_success());
        assert_eq!(h.service.probes(), 4);
        assert_eq!(h.service.submissions().len(), 2);
        // The package is reused for the retry.
        assert_eq!(h.archive_calls(), 1);
    }

    #[tokio::test]
    async fn retries_stop_after_max_host_failures() {
        let mut cfg = config();
        cfg.max_host_failures = 2;
        let h = Harness::new(&base_files(), vec![Some(0.3)], cfg);
        for _ in 0..2 {
            h.service.queue(Err(SyncError::Transport("reset".into())));
        }

        let err = h.pipeline.link().await.unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 2, .. }));
        assert!(err.is_retryable());
        assert!(h.pipeline.snapshot().is_empty());
        assert!(h.pipeline.current_host().is_none());
    }

    #[tokio::test]
    async fn oversized_change_is_rejected_before_packaging_or_network() {
        let mut cfg = config();
        cfg.limits.change_max_bytes = 50;
        let big = "x".repeat(60);
        let h = Harness::new(&[("manifest.json", "{}"), ("big.bin", big.as_str())], vec![Some(0.1)], cfg);

        let err = h.pipeline.relink().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Pack(PackError::ChangeTooLarge { actual: 62, limit: 50 })
        ));
        assert_eq!(h.archive_calls(), 0);
        assert_eq!(h.service.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_project_is_rejected_before_packaging_or_network() {
        let mut cfg = config();
        cfg.limits.project_max_bytes = 10;
        let h = Harness::new(&base_files(), vec![Some(0.1)], cfg);

        let err = h.pipeline.link().await.unwrap_err();
        assert!(matches!(err, SyncError::Pack(PackError::ProjectTooLarge { limit: 10, .. })));
        assert_eq!(h.archive_calls(), 0);
        assert_eq!(h.service.calls(), 0);
    }

    #[tokio::test]
    async fn missing_manifest_is_rejected_locally() {
        let h = Harness::new(&[("a.js", "1")], vec![Some(0.1)], config());
        let err = h.pipeline.link().await.unwrap_err();
        assert!(matches!(err, SyncError::MissingManifest { .. }));
        assert_eq!(h.archive_calls(), 0);
        assert_eq!(h.service.calls(), 0);
    }

    #[tokio::test]
    async fn empty_project_is_rejected_locally() {
        let h = Harness::new(&[], vec![Some(0.1)], config());
        assert!(matches!(h.pipeline.link().await, Err(SyncError::EmptyProject)));
        assert_eq!(h.service.calls(), 0);
    }

    #[tokio::test]
    async fn build_error_is_returned_and_snapshot_kept() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        h.service.queue(Ok(TransportResponse::new(
            200,
            r#"{"code":"compile-error","message":"a.js:1:1 unexpected token"}"#,
        )));

        let outcome = h.pipeline.link().await.unwrap();
        assert_eq!(outcome.result.code, "compile-error");
        assert!(h.pipeline.snapshot().is_empty());
        assert_eq!(h.service.submissions().len(), 1);
        // The host was fine; it stays sticky.
        assert!(h.pipeline.current_host().is_some());
    }

    #[tokio::test]
    async fn unreachable_hosts_fall_back_to_unrouted_submission() {
        let h = Harness::new(&base_files(), vec![None, None], config());
        let outcome = h.pipeline.link().await.unwrap();
        assert!(outcome.result.is_success());
        let submissions = h.service.submissions();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].get_header(headers::ROUTING_HINT).is_none());
    }

    #[tokio::test]
    async fn availability_in_result_refreshes_host() {
        let h = Harness::new(&base_files(), vec![Some(0.4)], config());
        h.service.queue(Ok(TransportResponse::new(
            200,
            r#"{"code":"success","availability":{"host":"h0","hostname":"build-0","score":0.05},"timeNano":99}"#,
        )));
        h.pipeline.link().await.unwrap();
        let host = h.pipeline.current_host().unwrap();
        assert_eq!(host.score, 0.05);
        assert_eq!(host.hostname, "build-0");
        assert_eq!(host.hint_key, routing_hint(PROJECT, 0));
    }

    #[tokio::test]
    async fn result_from_another_host_drops_the_sticky_host() {
        let h = Harness::new(&base_files(), vec![Some(0.4)], config());
        h.service.queue(Ok(TransportResponse::new(
            200,
            r#"{"code":"success","availability":{"host":"h9","hostname":"build-9","score":0.01}}"#,
        )));
        h.pipeline.link().await.unwrap();
        assert!(h.pipeline.current_host().is_none());

        h.write("a.js", "again");
        h.pipeline.relink().await.unwrap().unwrap();
        assert_eq!(h.service.probes(), 2);
        assert_eq!(h.pipeline.current_host().unwrap().host_id, "h0");
    }

    #[tokio::test]
    async fn test_and_publish_carry_parameters() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        h.pipeline.test(Some("unit".into())).await.unwrap();
        h.pipeline.publish(Some("v1.2.0".into())).await.unwrap();
        let submissions = h.service.submissions();
        assert_eq!(submissions[0].path, endpoints::TEST);
        assert!(submissions[0]
            .params
            .contains(&("filter".to_string(), "unit".to_string())));
        assert_eq!(submissions[1].path, endpoints::PUBLISH);
        assert!(submissions[1]
            .params
            .contains(&("tag".to_string(), "v1.2.0".to_string())));
    }

    #[tokio::test]
    async fn relink_from_watch_events() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        h.pipeline.link().await.unwrap();

        h.write("a.js", "changed");
        h.write("lib/c.js", "new");
        let events = vec![
            WatchEvent::new(bsync_index::WatchEventKind::Changed, h.dir.path().join("a.js")),
            WatchEvent::new(bsync_index::WatchEventKind::Added, h.dir.path().join("lib/c.js")),
            WatchEvent::new(bsync_index::WatchEventKind::Changed, h.dir.path().join("b.js")),
        ];
        let outcome = h.pipeline.relink_events(&events).await.unwrap().unwrap();
        assert_eq!(outcome.entries, 2);
        assert!(h.pipeline.snapshot().contains(&p("lib/c.js")));
    }

    #[tokio::test]
    async fn watch_events_for_ignored_files_are_not_sent() {
        let mut files = base_files();
        files.push((".gitignore", "*.log\n"));
        let mut cfg = config();
        cfg.ignore = vec!["node_modules/".into()];
        let h = Harness::new(&files, vec![Some(0.1)], cfg);
        h.pipeline.link().await.unwrap();
        let linked = h.pipeline.snapshot().len();

        h.write("debug.log", "noise");
        h.write("node_modules/x/i.js", "dep");
        let events = vec![
            WatchEvent::new(bsync_index::WatchEventKind::Added, h.dir.path().join("debug.log")),
            WatchEvent::new(
                bsync_index::WatchEventKind::Added,
                h.dir.path().join("node_modules/x/i.js"),
            ),
        ];
        assert!(h.pipeline.relink_events(&events).await.unwrap().is_none());
        assert_eq!(h.service.submissions().len(), 1);
        assert_eq!(h.pipeline.snapshot().len(), linked);
        assert!(!h.pipeline.snapshot().contains(&p("debug.log")));

        // A full rescan agrees that nothing is pending.
        assert!(h.pipeline.relink().await.unwrap().is_none());
        assert_eq!(h.service.submissions().len(), 1);
    }

    #[tokio::test]
    async fn removing_build_output_dir_removes_stripped_paths() {
        let mut cfg = config();
        cfg.strip_prefixes = vec!["dist".into()];
        let h = Harness::new(
            &[("manifest.json", "{}"), ("dist/app.js", "built"), ("dist/lib/u.js", "u")],
            vec![Some(0.1)],
            cfg,
        );
        h.pipeline.link().await.unwrap();
        assert!(h.pipeline.snapshot().contains(&p("app.js")));

        fs::remove_dir_all(h.dir.path().join("dist")).unwrap();
        let events = vec![WatchEvent::new(
            bsync_index::WatchEventKind::RemovedDirectory,
            h.dir.path().join("dist"),
        )];
        let outcome = h.pipeline.relink_events(&events).await.unwrap().unwrap();
        assert_eq!(outcome.entries, 2);
        let snapshot = h.pipeline.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&p("manifest.json")));
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        h.pipeline.link().await.unwrap();

        let reopened = SyncPipeline::new(
            h.dir.path(),
            config(),
            h.service.clone(),
            h.archiver.clone(),
            h.store.clone(),
        )
        .unwrap();
        assert_eq!(reopened.snapshot().len(), 3);
        assert!(reopened.relink().await.unwrap().is_none());
        let status = reopened.status().await.unwrap();
        assert_eq!(status.pending, BatchSummary::default());
        assert_eq!(status.host.unwrap().host_id, "h0");
    }

    #[tokio::test]
    async fn status_reports_pending_changes() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        let status = h.pipeline.status().await.unwrap();
        assert_eq!(status.project_id, PROJECT);
        assert_eq!(status.snapshot_files, 0);
        assert_eq!(status.pending.saves, 3);
        assert!(status.host.is_none());
        assert_eq!(h.service.calls(), 0);
    }

    #[tokio::test]
    async fn reset_host_forces_new_probe() {
        let h = Harness::new(&base_files(), vec![Some(0.1)], config());
        h.pipeline.link().await.unwrap();
        h.pipeline.reset_host().unwrap();
        assert!(h.pipeline.current_host().is_none());
        h.write("a.js", "again");
        h.pipeline.link().await.unwrap();
        assert_eq!(h.service.probes(), 2);
    }
}
