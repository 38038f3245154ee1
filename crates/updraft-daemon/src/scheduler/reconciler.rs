//! Detect, fetch and deploy cycles

use super::cycle::{CycleKind, CycleReport, ItemOutcome, RunningGuard};
use crate::catalog::Catalog;
use crate::config::{ApprovalConfig, ConcurrencyConfig, SchedulerConfig};
use crate::error::SchedulerError;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use updraft_approval::{
    ApprovalGate, Conclusion, Decision, DecisionContext, DecisionHandle, DecisionSubject,
};
use updraft_deploy::{DeployError, DeployOutcome, DeployPlan, DeploymentOrchestrator, ServerTarget};
use updraft_fetch::{ArtifactFetcher, ArtifactTarget, Detection, SourceError, SourceKind, SourceSet};
use updraft_registry::{RegistryError, VersionRegistry};
use updraft_types::{
    ArtifactId, ArtifactRef, EventSource, LatestChange, MessageId, UpdaterEvent,
    UpdaterEventEnvelope, VersionId,
};

const SOURCE_KINDS: [SourceKind; 4] = [
    SourceKind::Paper,
    SourceKind::Github,
    SourceKind::Jenkins,
    SourceKind::Storefront,
];

/// Collaborators every scheduler needs
pub struct SchedulerParts {
    pub registry: Arc<VersionRegistry>,
    pub catalog: Arc<Catalog>,
    pub sources: SourceSet,
    pub gate: Arc<ApprovalGate>,
    pub fetcher: Arc<ArtifactFetcher>,
    pub event_tx: broadcast::Sender<UpdaterEventEnvelope>,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<VersionRegistry>,
    catalog: Arc<Catalog>,
    sources: SourceSet,
    gate: Arc<ApprovalGate>,
    fetcher: Arc<ArtifactFetcher>,
    orchestrator: Option<Arc<DeploymentOrchestrator>>,
    approval_timeout: Duration,
    source_limits: HashMap<SourceKind, Arc<Semaphore>>,
    control_plane_limit: Arc<Semaphore>,
    detect_running: AtomicBool,
    fetch_running: AtomicBool,
    deploy_running: AtomicBool,
    /// Background waits on promotion prompts
    promotions: Mutex<Vec<JoinHandle<()>>>,
    /// Prompt currently deciding each artifact's latest version
    open_promotions: DashMap<ArtifactId, MessageId>,
    /// Latest versions whose prompt could not be posted
    unposted: DashMap<ArtifactId, VersionId>,
    event_tx: broadcast::Sender<UpdaterEventEnvelope>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Scheduler {
    /// Create a new scheduler with default limits and no deploy capability
    pub fn new(config: SchedulerConfig, parts: SchedulerParts) -> Self {
        let limits = ConcurrencyConfig::default();
        Self {
            config,
            registry: parts.registry,
            catalog: parts.catalog,
            sources: parts.sources,
            gate: parts.gate,
            fetcher: parts.fetcher,
            orchestrator: None,
            approval_timeout: Duration::from_secs(ApprovalConfig::default().timeout_secs),
            source_limits: Self::source_semaphores(&limits),
            control_plane_limit: Arc::new(Semaphore::new(limits.control_plane)),
            detect_running: AtomicBool::new(false),
            fetch_running: AtomicBool::new(false),
            deploy_running: AtomicBool::new(false),
            promotions: Mutex::new(Vec::new()),
            open_promotions: DashMap::new(),
            unposted: DashMap::new(),
            event_tx: parts.event_tx,
            shutdown: None,
        }
    }

    /// Enable the deploy cycle
    pub fn with_orchestrator(mut self, orchestrator: Arc<DeploymentOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Bound concurrent calls per source kind and against the control plane
    pub fn with_limits(mut self, limits: &ConcurrencyConfig) -> Self {
        self.source_limits = Self::source_semaphores(limits);
        self.control_plane_limit = Arc::new(Semaphore::new(limits.control_plane));
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Stop the cycle loops once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn source_semaphores(limits: &ConcurrencyConfig) -> HashMap<SourceKind, Arc<Semaphore>> {
        SOURCE_KINDS
            .iter()
            .map(|kind| (*kind, Arc::new(Semaphore::new(limits.limit_for(*kind)))))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // LOOPS
    // ═══════════════════════════════════════════════════════════════════

    /// Start the scheduler background tasks, one loop per cycle
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if self.config.run_on_startup {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_all().await;
            });
        }

        info!("Scheduler started");
        vec![
            self.spawn_loop(CycleKind::Detect, self.config.detect_interval_secs),
            self.spawn_loop(CycleKind::Fetch, self.config.fetch_interval_secs),
            self.spawn_loop(CycleKind::Deploy, self.config.deploy_interval_secs),
        ]
    }

    fn spawn_loop(self: &Arc<Self>, kind: CycleKind, period_secs: u64) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = Duration::from_secs(period_secs);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Spawned so a slow run shows up as an overrun on the next tick
                        let run = scheduler.clone();
                        tokio::spawn(async move {
                            run.run_cycle(kind).await;
                        });
                    }
                    _ = stopped(scheduler.shutdown.clone()) => break,
                }
            }

            debug!(cycle = %kind, "Cycle loop stopped");
        })
    }

    /// Run one cycle now, unless a run of the same kind is still active
    #[instrument(skip(self), fields(cycle = %kind))]
    pub async fn run_cycle(self: &Arc<Self>, kind: CycleKind) -> CycleReport {
        let Some(_guard) = RunningGuard::acquire(self.running_flag(kind)) else {
            warn!("Previous run still active, skipping");
            self.emit_event(UpdaterEvent::CycleOverrun {
                cycle: kind.to_string(),
            });
            return CycleReport::overrun(kind);
        };

        debug!("Cycle started");
        let report = match kind {
            CycleKind::Detect => self.detect_cycle().await,
            CycleKind::Fetch => self.fetch_cycle().await,
            CycleKind::Deploy => self.deploy_cycle().await,
        }
        .finish();

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Cycle completed"
        );
        self.emit_event(UpdaterEvent::CycleCompleted {
            cycle: kind.to_string(),
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
        });
        report
    }

    /// Detect, then fetch, then deploy
    pub async fn run_all(self: &Arc<Self>) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(CycleKind::ALL.len());
        for kind in CycleKind::ALL {
            reports.push(self.run_cycle(kind).await);
        }
        reports
    }

    /// Wait for every open promotion prompt to resolve
    pub async fn settle_promotions(&self) {
        let handles = std::mem::take(&mut *self.promotions.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Promotion task panicked");
            }
        }
    }

    fn running_flag(&self, kind: CycleKind) -> &AtomicBool {
        match kind {
            CycleKind::Detect => &self.detect_running,
            CycleKind::Fetch => &self.fetch_running,
            CycleKind::Deploy => &self.deploy_running,
        }
    }

    async fn source_permit(&self, kind: SourceKind) -> Option<OwnedSemaphorePermit> {
        self.source_limits.get(&kind)?.clone().acquire_owned().await.ok()
    }

    // ═══════════════════════════════════════════════════════════════════
    // DETECT
    // ═══════════════════════════════════════════════════════════════════

    async fn detect_cycle(self: &Arc<Self>) -> CycleReport {
        let mut tasks = JoinSet::new();
        for target in self.catalog.artifacts() {
            let scheduler = self.clone();
            let target = target.clone();
            tasks.spawn(async move { scheduler.detect_one(target).await });
        }
        drain(tasks, CycleReport::begin(CycleKind::Detect)).await
    }

    #[instrument(skip(self, target), fields(artifact = %target.id))]
    async fn detect_one(self: Arc<Self>, target: ArtifactTarget) -> ItemOutcome {
        let Some(_permit) = self.source_permit(target.source.kind()).await else {
            return ItemOutcome::Skipped;
        };

        match self.detect_artifact(&target).await {
            Ok(outcome) => outcome,
            Err(SchedulerError::Source(SourceError::ConfigurationMissing(reason))) => {
                warn!(reason = %reason, "Skipping detection");
                ItemOutcome::Skipped
            }
            Err(e) => {
                error!(error = %e, "Detection failed");
                ItemOutcome::Failed
            }
        }
    }

    async fn detect_artifact(
        self: &Arc<Self>,
        target: &ArtifactTarget,
    ) -> Result<ItemOutcome, SchedulerError> {
        // 1. Ask the source
        let source = self.sources.for_spec(&target.source)?;
        let approved = self
            .registry
            .get(&target.id)
            .await?
            .and_then(|record| record.approved);
        let detection = source.detect(&target.source, approved.as_ref()).await?;

        let Detection::Update {
            version,
            artifact_ref,
            changelog_url,
        } = detection
        else {
            debug!("Approved version is current");
            return Ok(ItemOutcome::Succeeded);
        };

        // 2. Record latest
        let (record, change) = self
            .registry
            .upsert_latest(&target.id, version.clone(), artifact_ref.clone())
            .await?;
        if !change.is_new() {
            if self.needs_repost(&target.id, &version, record.awaiting_approval()) {
                info!(version = %version, "Retrying promotion prompt");
                self.open_promotion(target, version, artifact_ref, changelog_url)
                    .await?;
            } else {
                debug!(version = %version, "Latest unchanged");
            }
            return Ok(ItemOutcome::Succeeded);
        }

        info!(version = %version, "New version detected");
        self.emit_event(UpdaterEvent::VersionDetected {
            artifact: target.id.clone(),
            version: version.clone(),
            previous: match change {
                LatestChange::Changed { previous } => previous,
                _ => None,
            },
        });

        // 3. Ask for promotion
        self.open_promotion(target, version, artifact_ref, changelog_url)
            .await?;
        Ok(ItemOutcome::Succeeded)
    }

    async fn open_promotion(
        self: &Arc<Self>,
        target: &ArtifactTarget,
        version: VersionId,
        artifact_ref: ArtifactRef,
        changelog_url: Option<String>,
    ) -> Result<MessageId, SchedulerError> {
        let subject = DecisionSubject::Promotion {
            artifact: target.id.clone(),
            version: version.clone(),
            artifact_ref: artifact_ref.clone(),
        };
        let context = DecisionContext {
            changelog_url,
            affected_servers: self.catalog.affected_servers(&target.id),
        };

        let handle = match self.gate.request(subject, context).await {
            Ok(handle) => handle,
            Err(e) => {
                self.unposted.insert(target.id.clone(), version);
                return Err(e.into());
            }
        };
        self.unposted.remove(&target.id);
        let message_id = handle.message_id.clone();
        self.open_promotions
            .insert(target.id.clone(), message_id.clone());

        let scheduler = self.clone();
        let artifact = target.id.clone();
        let task = tokio::spawn(async move {
            scheduler
                .settle_promotion(handle, artifact, version, artifact_ref)
                .await;
        });

        let mut promotions = self.promotions.lock().await;
        promotions.retain(|task| !task.is_finished());
        promotions.push(task);

        Ok(message_id)
    }

    /// Whether `version` is still unapproved and its last prompt never got posted
    fn needs_repost(&self, id: &ArtifactId, version: &VersionId, awaiting_approval: bool) -> bool {
        let unposted = self
            .unposted
            .get(id)
            .is_some_and(|entry| entry.value() == version);
        if !unposted {
            return false;
        }
        if !awaiting_approval {
            self.unposted.remove(id);
            return false;
        }
        let open = self.open_promotions.get(id).map(|entry| entry.value().clone());
        !open.is_some_and(|message_id| self.gate.is_pending(&message_id))
    }

    #[instrument(skip(self, handle, artifact_ref), fields(artifact = %artifact, version = %version))]
    async fn settle_promotion(
        &self,
        handle: DecisionHandle,
        artifact: ArtifactId,
        version: VersionId,
        artifact_ref: ArtifactRef,
    ) {
        match self.gate.await_decision(&handle, self.approval_timeout).await {
            Ok(Decision::Approved { actor, .. }) => {
                match self.registry.approve(&artifact, &version, artifact_ref).await {
                    Ok(_) => {
                        self.gate
                            .conclude(&handle, Conclusion::Approved { actor: actor.clone() })
                            .await;
                        self.emit_envelope(
                            UpdaterEventEnvelope::new(
                                UpdaterEvent::VersionApproved {
                                    artifact: artifact.clone(),
                                    version: version.clone(),
                                },
                                EventSource::Scheduler,
                            )
                            .with_actor(actor),
                        );
                    }
                    Err(e) if e.is_stale() => {
                        let latest = match &e {
                            RegistryError::StaleApproval { latest, .. } => latest.clone(),
                            _ => None,
                        };
                        warn!(latest = ?latest, "Approved version was superseded");
                        self.gate
                            .conclude(&handle, Conclusion::Stale { latest: latest.clone() })
                            .await;
                        self.emit_event(UpdaterEvent::ApprovalStale {
                            artifact: artifact.clone(),
                            requested: version.clone(),
                            latest,
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to record approval");
                        self.gate
                            .conclude(
                                &handle,
                                Conclusion::Failed {
                                    reason: e.to_string(),
                                },
                            )
                            .await;
                    }
                }
            }
            Ok(decision) => debug!(decision = ?decision, "Promotion not approved"),
            Err(e) => warn!(error = %e, "Promotion wait failed"),
        }

        self.open_promotions
            .remove_if(&artifact, |_, open| open == &handle.message_id);
    }

    /// Post a fresh promotion prompt for an artifact whose latest version is
    /// still unapproved, e.g. after the previous prompt lapsed.
    ///
    /// Returns the open prompt instead if one is still waiting.
    #[instrument(skip(self), fields(artifact = %id))]
    pub async fn reopen_approval(self: &Arc<Self>, id: &ArtifactId) -> Result<MessageId, SchedulerError> {
        let target = self
            .catalog
            .artifact(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotConfigured(id.to_string()))?;

        let open = self.open_promotions.get(id).map(|entry| entry.value().clone());
        if let Some(message_id) = open {
            if self.gate.is_pending(&message_id) {
                debug!(message = %message_id, "Prompt still open");
                return Ok(message_id);
            }
        }

        let record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::artifact_not_found(id))?;
        if !record.awaiting_approval() {
            return Err(SchedulerError::NothingPending(id.to_string()));
        }
        let Some(version) = record.latest else {
            return Err(SchedulerError::NothingPending(id.to_string()));
        };

        info!(version = %version, "Reopening approval");
        self.open_promotion(&target, version, record.latest_ref.unwrap_or_default(), None)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // FETCH
    // ═══════════════════════════════════════════════════════════════════

    async fn fetch_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::begin(CycleKind::Fetch);
        let mut tasks = JoinSet::new();

        for target in self.catalog.artifacts() {
            match self.registry.get(&target.id).await {
                Ok(Some(record)) if record.needs_fetch() => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(artifact = %target.id, error = %e, "Failed to read artifact record");
                    report.record(ItemOutcome::Failed);
                    continue;
                }
            }

            let scheduler = self.clone();
            let target = target.clone();
            tasks.spawn(async move { scheduler.fetch_one(target).await });
        }

        drain(tasks, report).await
    }

    #[instrument(skip(self, target), fields(artifact = %target.id))]
    async fn fetch_one(self: Arc<Self>, target: ArtifactTarget) -> ItemOutcome {
        let Some(_permit) = self.source_permit(target.source.kind()).await else {
            return ItemOutcome::Skipped;
        };

        match self.fetcher.fetch_approved(&target).await {
            Ok(Some(fetched)) => {
                debug!(version = %fetched.version, downloaded = fetched.downloaded, "Fetch done");
                ItemOutcome::Succeeded
            }
            Ok(None) => ItemOutcome::Skipped,
            Err(e) if e.is_configuration_missing() => {
                warn!(reason = %e, "Skipping fetch");
                ItemOutcome::Skipped
            }
            Err(e) => {
                error!(error = %e, "Fetch failed");
                ItemOutcome::Failed
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // DEPLOY
    // ═══════════════════════════════════════════════════════════════════

    async fn deploy_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::begin(CycleKind::Deploy);

        let Some(orchestrator) = self.orchestrator.clone() else {
            warn!("No control plane configured, skipping deploys");
            for _ in self.catalog.servers() {
                report.record(ItemOutcome::Skipped);
            }
            return report;
        };

        let mut tasks = JoinSet::new();
        for server in self.catalog.servers() {
            if let Err(e) = self
                .registry
                .ensure_server(&server.name, server.configured_plugins())
                .await
            {
                error!(server = %server.name, error = %e, "Failed to reconcile server record");
                report.record(ItemOutcome::Failed);
                continue;
            }

            let plan = match orchestrator.pending_updates(server).await {
                Ok(plan) if plan.is_empty() => {
                    debug!(server = %server.name, "Server up to date");
                    continue;
                }
                Ok(plan) => plan,
                Err(e) => {
                    error!(server = %server.name, error = %e, "Failed to plan deploy");
                    report.record(ItemOutcome::Failed);
                    continue;
                }
            };

            let scheduler = self.clone();
            let orchestrator = orchestrator.clone();
            let server = server.clone();
            tasks.spawn(async move { scheduler.deploy_one(orchestrator, server, plan).await });
        }

        drain(tasks, report).await
    }

    #[instrument(skip(self, orchestrator, server, plan), fields(server = %server.name))]
    async fn deploy_one(
        self: Arc<Self>,
        orchestrator: Arc<DeploymentOrchestrator>,
        server: ServerTarget,
        plan: DeployPlan,
    ) -> ItemOutcome {
        let Ok(_permit) = self.control_plane_limit.clone().acquire_owned().await else {
            return ItemOutcome::Skipped;
        };

        match orchestrator.deploy(&server, &plan).await {
            Ok(DeployOutcome::Deployed { .. }) => ItemOutcome::Succeeded,
            Ok(DeployOutcome::UpToDate) | Ok(DeployOutcome::Declined { .. }) => ItemOutcome::Skipped,
            Ok(DeployOutcome::Failed { .. }) => ItemOutcome::Failed,
            Err(DeployError::ConfigurationMissing(reason)) => {
                warn!(reason = %reason, "Skipping deploy");
                ItemOutcome::Skipped
            }
            Err(e) => {
                error!(error = %e, "Deploy failed");
                ItemOutcome::Failed
            }
        }
    }

    fn emit_event(&self, event: UpdaterEvent) {
        self.emit_envelope(UpdaterEventEnvelope::new(event, EventSource::Scheduler));
    }

    fn emit_envelope(&self, envelope: UpdaterEventEnvelope) {
        let _ = self.event_tx.send(envelope);
    }
}

async fn drain(mut tasks: JoinSet<ItemOutcome>, mut report: CycleReport) -> CycleReport {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                error!(error = %e, "Cycle task panicked");
                report.record(ItemOutcome::Failed);
            }
        }
    }
    report
}

async fn stopped(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    if rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
