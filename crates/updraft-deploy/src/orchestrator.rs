//! Deployment orchestration
//!
//! A deploy moves one server from its recorded versions to the fetched
//! versions of its runtime and plugins. The sequence is:
//!
//! 1. Request approval, with the live player count deciding which signal is
//!    accepted
//! 2. Stop the instance
//! 3. Upload the runtime to `/`
//! 4. Upload the plugin batch to `/plugins/`
//! 5. Wait for the instance to settle, force-kill it unless stopped, start it
//! 6. Commit every deployed version to the registry in one write
//!
//! The registry is only written after step 5 succeeds. A failure at any
//! control-plane step leaves the server record as it was.

use crate::control::{ControlPlane, PowerSignal, PowerState};
use crate::error::{ControlPlaneError, DeployError, Result};
use crate::occupancy::{resolve_occupancy, OccupancyProbe};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use updraft_approval::{ApprovalGate, Conclusion, Decision, DecisionContext, DecisionSubject};
use updraft_fetch::{ArtifactTarget, StagingArea};
use updraft_registry::VersionRegistry;
use updraft_types::{
    ArtifactId, ArtifactKey, DeploymentCommit, EventSource, InstanceId, ServerName, ServerRecord,
    UpdaterEvent, UpdaterEventEnvelope, VersionId,
};

const RUNTIME_DIR: &str = "/";
const PLUGIN_DIR: &str = "/plugins/";

/// A managed server and the artifacts it carries
#[derive(Debug, Clone)]
pub struct ServerTarget {
    pub name: ServerName,
    /// Control-plane identifier; deploys are refused without one
    pub instance: Option<InstanceId>,
    /// `host[:port]` for the player count probe
    pub address: Option<String>,
    /// Above this many players an override is required
    pub occupancy_threshold: u32,
    pub runtime: Option<ArtifactTarget>,
    pub plugins: Vec<ArtifactTarget>,
}

impl ServerTarget {
    /// Plugin keys the server is configured to carry
    pub fn configured_plugins(&self) -> BTreeSet<ArtifactKey> {
        self.plugins.iter().map(|p| p.id.key.clone()).collect()
    }
}

/// One staged version waiting to go onto a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub id: ArtifactId,
    pub version: VersionId,
    pub path: PathBuf,
}

/// Updates computed for one server from registry snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    pub server: ServerName,
    pub runtime: Option<PendingUpdate>,
    pub plugins: Vec<PendingUpdate>,
}

impl DeployPlan {
    pub fn is_empty(&self) -> bool {
        self.runtime.is_none() && self.plugins.is_empty()
    }

    /// Versions to record once the deploy is confirmed
    pub fn commit(&self) -> DeploymentCommit {
        DeploymentCommit {
            runtime: self.runtime.as_ref().map(|u| u.version.clone()),
            plugins: self
                .plugins
                .iter()
                .map(|u| (u.id.key.clone(), u.version.clone()))
                .collect(),
        }
    }

    fn staged_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.runtime.iter().chain(self.plugins.iter()).map(|u| &u.path)
    }
}

/// Control-plane step a deploy was executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    Stop,
    UploadRuntime,
    UploadPlugins,
    PowerCheck,
    Kill,
    Start,
    Commit,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStep::Stop => "stop",
            DeployStep::UploadRuntime => "upload runtime",
            DeployStep::UploadPlugins => "upload plugins",
            DeployStep::PowerCheck => "power check",
            DeployStep::Kill => "kill",
            DeployStep::Start => "start",
            DeployStep::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// How a deploy ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Nothing staged differs from what the server runs
    UpToDate,
    Deployed {
        commit: DeploymentCommit,
        actor: String,
    },
    /// Approval was dismissed or lapsed; nothing was touched
    Declined { reason: String },
    /// A step failed after approval; the registry was not updated
    Failed { step: DeployStep, reason: String },
}

/// Timing knobs for the deploy sequence
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub approval_timeout: Duration,
    /// Pause between uploading and checking the power state
    pub settle_delay: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::from_secs(900),
            settle_delay: Duration::from_millis(5000),
        }
    }
}

/// Runs approved deploys against the control plane
pub struct DeploymentOrchestrator {
    registry: Arc<VersionRegistry>,
    gate: Arc<ApprovalGate>,
    control: Arc<dyn ControlPlane>,
    probe: Arc<dyn OccupancyProbe>,
    staging: StagingArea,
    settings: DeploySettings,
    event_tx: Option<broadcast::Sender<UpdaterEventEnvelope>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        registry: Arc<VersionRegistry>,
        gate: Arc<ApprovalGate>,
        control: Arc<dyn ControlPlane>,
        probe: Arc<dyn OccupancyProbe>,
        staging: StagingArea,
    ) -> Self {
        Self {
            registry,
            gate,
            control,
            probe,
            staging,
            settings: DeploySettings::default(),
            event_tx: None,
        }
    }

    pub fn with_settings(mut self, settings: DeploySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<UpdaterEventEnvelope>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Compare fetched versions against what `target` runs.
    ///
    /// Reads snapshots only; a server without a record is treated as running
    /// nothing.
    pub async fn pending_updates(&self, target: &ServerTarget) -> Result<DeployPlan> {
        let server = self
            .registry
            .get_server(&target.name)
            .await?
            .unwrap_or_else(|| ServerRecord::new(target.name.clone(), target.configured_plugins()));

        let runtime = match &target.runtime {
            Some(runtime) => self
                .pending(runtime, server.deployed_runtime.as_ref())
                .await?,
            None => None,
        };

        let mut plugins = Vec::new();
        for plugin in &target.plugins {
            if let Some(update) = self
                .pending(plugin, server.deployed_plugin(&plugin.id.key))
                .await?
            {
                plugins.push(update);
            }
        }

        Ok(DeployPlan {
            server: target.name.clone(),
            runtime,
            plugins,
        })
    }

    async fn pending(
        &self,
        artifact: &ArtifactTarget,
        deployed: Option<&VersionId>,
    ) -> Result<Option<PendingUpdate>> {
        let Some(record) = self.registry.get(&artifact.id).await? else {
            return Ok(None);
        };
        Ok(match record.fetched {
            Some(fetched) if Some(&fetched) != deployed => Some(PendingUpdate {
                id: artifact.id.clone(),
                path: self
                    .staging
                    .path_for(&artifact.id, &fetched, &artifact.staged_filename),
                version: fetched,
            }),
            _ => None,
        })
    }

    /// Gate, apply and record `plan` on `target`.
    ///
    /// `Err` means the deploy stopped before the instance was touched.
    /// Control-plane failures after approval are reported as
    /// [`DeployOutcome::Failed`].
    #[instrument(skip(self, target, plan), fields(server = %target.name))]
    pub async fn deploy(&self, target: &ServerTarget, plan: &DeployPlan) -> Result<DeployOutcome> {
        if plan.is_empty() {
            return Ok(DeployOutcome::UpToDate);
        }

        let instance = target.instance.clone().ok_or_else(|| {
            DeployError::ConfigurationMissing(format!("no instance id for {}", target.name))
        })?;

        if let Some(path) = first_missing(plan).await {
            return Err(DeployError::StagedFileMissing(path));
        }

        // 1. Approval
        let occupancy =
            resolve_occupancy(self.probe.as_ref(), &target.name, target.address.as_deref()).await;
        let subject = DecisionSubject::Deployment {
            server: target.name.clone(),
            runtime: plan.runtime.as_ref().map(|u| u.version.clone()),
            plugins: plan
                .plugins
                .iter()
                .map(|u| (u.id.key.clone(), u.version.clone()))
                .collect(),
            occupancy,
            threshold: target.occupancy_threshold,
        };
        let handle = self.gate.request(subject, DecisionContext::default()).await?;
        let actor = match self
            .gate
            .await_decision(&handle, self.settings.approval_timeout)
            .await?
        {
            Decision::Approved { actor, .. } => actor,
            Decision::Dismissed { actor } => {
                return Ok(self.declined(&target.name, format!("dismissed by {}", actor)));
            }
            Decision::Expired => {
                return Ok(self.declined(&target.name, "approval lapsed".to_string()));
            }
        };

        // A newer fetch may have pruned the planned version during the wait
        if let Some(path) = first_missing(plan).await {
            warn!(path = %path.display(), "Planned version no longer staged");
            self.gate
                .conclude(
                    &handle,
                    Conclusion::Failed {
                        reason: format!("{} is no longer staged", path.display()),
                    },
                )
                .await;
            return Err(DeployError::StagedFileMissing(path));
        }

        info!(%actor, occupancy, "Deploy approved");
        self.emit_event(UpdaterEvent::DeploymentStarted {
            server: target.name.clone(),
        });

        // 2-5. Control plane
        if let Err((step, e)) = self.apply(&instance, plan).await {
            let reason = e.to_string();
            error!(%step, error = %reason, "Deploy failed");
            self.gate
                .conclude(&handle, Conclusion::Failed { reason: reason.clone() })
                .await;
            return Ok(self.failed(&target.name, step, reason));
        }

        // 6. Record
        let commit = plan.commit();
        if let Err(e) = self.registry.commit_deployment(&target.name, &commit).await {
            let reason = e.to_string();
            error!(error = %reason, "Deploy applied but could not be recorded");
            self.gate
                .conclude(&handle, Conclusion::Failed { reason: reason.clone() })
                .await;
            return Ok(self.failed(&target.name, DeployStep::Commit, reason));
        }

        self.gate.conclude(&handle, Conclusion::Deployed).await;
        info!(
            runtime = ?commit.runtime,
            plugins = commit.plugins.len(),
            "Server updated"
        );
        self.emit_event(UpdaterEvent::DeploymentCompleted {
            server: target.name.clone(),
            runtime: commit.runtime.clone(),
            plugins: commit.plugins.keys().cloned().collect(),
        });

        Ok(DeployOutcome::Deployed { commit, actor })
    }

    async fn apply(
        &self,
        instance: &InstanceId,
        plan: &DeployPlan,
    ) -> std::result::Result<(), (DeployStep, ControlPlaneError)> {
        let step = |step: DeployStep| move |e: ControlPlaneError| (step, e);

        self.control
            .set_power(instance, PowerSignal::Stop)
            .await
            .map_err(step(DeployStep::Stop))?;

        if let Some(runtime) = &plan.runtime {
            self.control
                .upload_files(instance, RUNTIME_DIR, std::slice::from_ref(&runtime.path))
                .await
                .map_err(step(DeployStep::UploadRuntime))?;
        }

        if !plan.plugins.is_empty() {
            let paths: Vec<PathBuf> = plan.plugins.iter().map(|u| u.path.clone()).collect();
            self.control
                .upload_files(instance, PLUGIN_DIR, &paths)
                .await
                .map_err(step(DeployStep::UploadPlugins))?;
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        let state = self
            .control
            .power_state(instance)
            .await
            .map_err(step(DeployStep::PowerCheck))?;
        if state != PowerState::Stopped {
            warn!(?state, "Instance did not stop, killing");
            self.control
                .set_power(instance, PowerSignal::Kill)
                .await
                .map_err(step(DeployStep::Kill))?;
        }

        self.control
            .set_power(instance, PowerSignal::Start)
            .await
            .map_err(step(DeployStep::Start))?;
        Ok(())
    }

    fn declined(&self, server: &ServerName, reason: String) -> DeployOutcome {
        info!(server = %server, %reason, "Deploy declined");
        self.emit_event(UpdaterEvent::DeploymentDeclined {
            server: server.clone(),
            reason: reason.clone(),
        });
        DeployOutcome::Declined { reason }
    }

    fn failed(&self, server: &ServerName, step: DeployStep, reason: String) -> DeployOutcome {
        self.emit_event(UpdaterEvent::DeploymentFailed {
            server: server.clone(),
            step: step.to_string(),
            reason: reason.clone(),
        });
        DeployOutcome::Failed { step, reason }
    }

    fn emit_event(&self, event: UpdaterEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(UpdaterEventEnvelope::new(event, EventSource::Deployment));
        }
    }
}

async fn first_missing(plan: &DeployPlan) -> Option<PathBuf> {
    for path in plan.staged_paths() {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Some(path.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use updraft_approval::{ApprovalChannel, ChannelError, Prompt, Signal, SignalEvent};
    use updraft_fetch::SourceSpec;
    use updraft_types::{ArtifactRef, MessageId};

    // ═══════════════════════════════════════════════════════════════════
    // FAKES
    // ═══════════════════════════════════════════════════════════════════

    /// Replies with queued signals, then stays silent until the timeout
    #[derive(Default)]
    struct ScriptedChannel {
        replies: Mutex<VecDeque<Signal>>,
        /// Removed while the decision is pending
        remove_during_wait: Mutex<Option<PathBuf>>,
        posted: Mutex<Vec<Prompt>>,
        edits: Mutex<Vec<Prompt>>,
        next_id: AtomicUsize,
    }

    impl ScriptedChannel {
        fn replying(signals: &[Signal]) -> Self {
            let channel = Self::default();
            channel.replies.lock().unwrap().extend(signals.iter().copied());
            channel
        }

        fn last_status(&self) -> Option<String> {
            self.edits.lock().unwrap().last().and_then(|p| p.status.clone())
        }
    }

    #[async_trait]
    impl ApprovalChannel for ScriptedChannel {
        async fn post(&self, prompt: &Prompt) -> std::result::Result<MessageId, ChannelError> {
            self.posted.lock().unwrap().push(prompt.clone());
            Ok(MessageId::new(format!(
                "msg-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            )))
        }

        async fn await_reaction(
            &self,
            _message: &MessageId,
            _allowed: &[Signal],
            timeout: Duration,
        ) -> std::result::Result<Option<SignalEvent>, ChannelError> {
            if let Some(path) = self.remove_during_wait.lock().unwrap().take() {
                std::fs::remove_file(path).unwrap();
            }
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(signal) => Ok(Some(SignalEvent::new(signal, "alice"))),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        async fn edit(
            &self,
            _message: &MessageId,
            prompt: &Prompt,
        ) -> std::result::Result<(), ChannelError> {
            self.edits.lock().unwrap().push(prompt.clone());
            Ok(())
        }

        async fn clear_signals(&self, _message: &MessageId) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
    }

    /// Records every call and fails on a chosen one
    struct RecordingControlPlane {
        calls: Mutex<Vec<String>>,
        uploaded: Mutex<Vec<Vec<u8>>>,
        state: PowerState,
        fail_on: Option<&'static str>,
    }

    impl RecordingControlPlane {
        fn new(state: PowerState) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                uploaded: Mutex::new(Vec::new()),
                state,
                fail_on: None,
            }
        }

        fn failing_on(mut self, call: &'static str) -> Self {
            self.fail_on = Some(call);
            self
        }

        fn record(&self, call: String) -> std::result::Result<(), ControlPlaneError> {
            let failed = self.fail_on.is_some_and(|f| call.starts_with(f));
            self.calls.lock().unwrap().push(call);
            if failed {
                Err(ControlPlaneError::Status {
                    status: 500,
                    url: "panel".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for RecordingControlPlane {
        async fn power_state(
            &self,
            _instance: &InstanceId,
        ) -> std::result::Result<PowerState, ControlPlaneError> {
            self.record("state".to_string())?;
            Ok(self.state)
        }

        async fn set_power(
            &self,
            _instance: &InstanceId,
            signal: PowerSignal,
        ) -> std::result::Result<(), ControlPlaneError> {
            self.record(signal.to_string())
        }

        async fn upload_files(
            &self,
            _instance: &InstanceId,
            target_dir: &str,
            files: &[PathBuf],
        ) -> std::result::Result<(), ControlPlaneError> {
            let names: Vec<String> = files
                .iter()
                .filter_map(|f| f.file_name()?.to_str().map(str::to_string))
                .collect();
            for file in files {
                if let Ok(bytes) = std::fs::read(file) {
                    self.uploaded.lock().unwrap().push(bytes);
                }
            }
            self.record(format!("upload {} {}", target_dir, names.join(",")))
        }
    }

    struct FixedProbe(u32);

    #[async_trait]
    impl OccupancyProbe for FixedProbe {
        async fn current_players(&self, _address: &str) -> std::result::Result<u32, ProbeError> {
            Ok(self.0)
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // HARNESS
    // ═══════════════════════════════════════════════════════════════════

    struct Harness {
        registry: Arc<VersionRegistry>,
        channel: Arc<ScriptedChannel>,
        control: Arc<RecordingControlPlane>,
        orchestrator: DeploymentOrchestrator,
        target: ServerTarget,
        staging: StagingArea,
        _dir: tempfile::TempDir,
    }

    fn artifact_target(id: ArtifactId, filename: &str) -> ArtifactTarget {
        ArtifactTarget {
            id,
            source: SourceSpec::Storefront {
                resource: "unused".into(),
            },
            staged_filename: filename.to_string(),
            archive: None,
        }
    }

    async fn stage(
        registry: &VersionRegistry,
        staging: &StagingArea,
        target: &ArtifactTarget,
        version: &str,
    ) {
        let version = VersionId::from(version);
        registry
            .upsert_latest(&target.id, version.clone(), ArtifactRef::default())
            .await
            .unwrap();
        registry
            .approve(&target.id, &version, ArtifactRef::default())
            .await
            .unwrap();
        staging
            .install(
                &target.id,
                &version,
                &target.staged_filename,
                format!("jar-{}", version).into_bytes(),
            )
            .await
            .unwrap();
        registry.mark_fetched(&target.id, &version).await.unwrap();
    }

    async fn harness(
        replies: &[Signal],
        control: RecordingControlPlane,
        players: u32,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        let registry = Arc::new(VersionRegistry::in_memory());

        let runtime = artifact_target(ArtifactId::runtime("paper-1.20"), "server.jar");
        let foo = artifact_target(ArtifactId::plugin("Foo"), "Foo.jar");
        stage(&registry, &staging, &runtime, "1.20-build5").await;
        stage(&registry, &staging, &foo, "2.1").await;

        let target = ServerTarget {
            name: ServerName::from("Lobby"),
            instance: Some(InstanceId::from("abc123")),
            address: Some("lobby:25565".to_string()),
            occupancy_threshold: 10,
            runtime: Some(runtime),
            plugins: vec![foo],
        };
        registry
            .ensure_server(&target.name, target.configured_plugins())
            .await
            .unwrap();

        let channel = Arc::new(ScriptedChannel::replying(replies));
        let control = Arc::new(control);
        let gate = Arc::new(ApprovalGate::new(channel.clone()));
        let orchestrator = DeploymentOrchestrator::new(
            registry.clone(),
            gate,
            control.clone(),
            Arc::new(FixedProbe(players)),
            staging.clone(),
        );

        Harness {
            registry,
            channel,
            control,
            orchestrator,
            target,
            staging,
            _dir: dir,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // TESTS
    // ═══════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn test_pending_updates_lists_fetched_versions() {
        let h = harness(&[], RecordingControlPlane::new(PowerState::Stopped), 0).await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        assert_eq!(plan.runtime.as_ref().unwrap().version, VersionId::from("1.20-build5"));
        assert_eq!(plan.plugins.len(), 1);
        assert!(plan.plugins[0].path.ends_with("plugin/Foo/2.1/Foo.jar"));

        h.registry
            .mark_deployed(
                &h.target.name,
                updraft_types::ArtifactKind::Plugin,
                &ArtifactKey::from("Foo"),
                VersionId::from("2.1"),
            )
            .await
            .unwrap();
        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        assert!(plan.plugins.is_empty());
        assert!(plan.runtime.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_deploy_commits_everything() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped),
            0,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::Deployed { ref actor, .. } if actor == "alice"));

        assert_eq!(
            h.control.calls(),
            vec![
                "stop",
                "upload / server.jar",
                "upload /plugins/ Foo.jar",
                "state",
                "start"
            ]
        );

        let server = h.registry.get_server(&h.target.name).await.unwrap().unwrap();
        assert_eq!(server.deployed_runtime, Some(VersionId::from("1.20-build5")));
        assert_eq!(
            server.deployed_plugin(&ArtifactKey::from("Foo")),
            Some(&VersionId::from("2.1"))
        );
        assert_eq!(h.channel.last_status().as_deref(), Some("Deployed"));

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_fetch_during_approval_does_not_change_uploaded_bytes() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped),
            0,
        )
        .await;
        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();

        // 2.2 lands between planning and the upload
        let foo = h.target.plugins[0].clone();
        stage(&h.registry, &h.staging, &foo, "2.2").await;

        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::Deployed { .. }));

        let uploaded = h.control.uploaded.lock().unwrap().clone();
        assert_eq!(uploaded.last().unwrap(), b"jar-2.1");
        let server = h.registry.get_server(&h.target.name).await.unwrap().unwrap();
        assert_eq!(
            server.deployed_plugin(&ArtifactKey::from("Foo")),
            Some(&VersionId::from("2.1"))
        );

        let next = h.orchestrator.pending_updates(&h.target).await.unwrap();
        assert_eq!(next.plugins[0].version, VersionId::from("2.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_pruned_during_approval_is_not_deployed() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped),
            0,
        )
        .await;
        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        *h.channel.remove_during_wait.lock().unwrap() = Some(plan.plugins[0].path.clone());

        let err = h.orchestrator.deploy(&h.target, &plan).await.unwrap_err();
        assert!(matches!(err, DeployError::StagedFileMissing(_)));
        assert!(h.control.calls().is_empty());
        assert!(h
            .channel
            .last_status()
            .unwrap()
            .starts_with("Update failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_instance_is_killed_before_start() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Running),
            0,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        h.orchestrator.deploy(&h.target, &plan).await.unwrap();

        let calls = h.control.calls();
        assert_eq!(&calls[calls.len() - 2..], &["kill", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_stop_leaves_registry_unchanged() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped).failing_on("upload /plugins/"),
            0,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(
            outcome,
            DeployOutcome::Failed {
                step: DeployStep::UploadPlugins,
                ..
            }
        ));

        // Runtime went up but nothing may be recorded
        let server = h.registry.get_server(&h.target.name).await.unwrap().unwrap();
        assert_eq!(server.deployed_runtime, None);
        assert!(server.deployed_plugins.is_empty());
        assert!(!h.control.calls().contains(&"start".to_string()));
        assert!(h
            .channel
            .last_status()
            .unwrap()
            .starts_with("Update failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_not_recorded() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped).failing_on("start"),
            0,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(
            outcome,
            DeployOutcome::Failed {
                step: DeployStep::Start,
                ..
            }
        ));
        let plan_after = h.orchestrator.pending_updates(&h.target).await.unwrap();
        assert_eq!(plan_after, plan);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_deploy_touches_nothing() {
        let h = harness(
            &[Signal::Dismiss],
            RecordingControlPlane::new(PowerState::Stopped),
            0,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::Declined { .. }));
        assert!(h.control.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_server_ignores_proceed_and_lapses() {
        let h = harness(
            &[Signal::Proceed],
            RecordingControlPlane::new(PowerState::Stopped),
            40,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::Declined {
                reason: "approval lapsed".to_string()
            }
        );
        assert!(h.control.calls().is_empty());

        let posted = h.channel.posted.lock().unwrap();
        assert_eq!(posted[0].signals, vec![Signal::Override, Signal::Dismiss]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_server_deploys_on_override() {
        let h = harness(
            &[Signal::Override],
            RecordingControlPlane::new(PowerState::Stopped),
            40,
        )
        .await;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::Deployed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_instance_is_configuration_missing() {
        let mut h = harness(&[], RecordingControlPlane::new(PowerState::Stopped), 0).await;
        h.target.instance = None;

        let plan = h.orchestrator.pending_updates(&h.target).await.unwrap();
        let err = h.orchestrator.deploy(&h.target, &plan).await.unwrap_err();
        assert!(matches!(err, DeployError::ConfigurationMissing(_)));
        assert!(h.channel.posted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plan_is_up_to_date() {
        let h = harness(&[], RecordingControlPlane::new(PowerState::Stopped), 0).await;
        let plan = DeployPlan {
            server: h.target.name.clone(),
            runtime: None,
            plugins: Vec::new(),
        };
        let outcome = h.orchestrator.deploy(&h.target, &plan).await.unwrap();
        assert_eq!(outcome, DeployOutcome::UpToDate);
        assert!(h.channel.posted.lock().unwrap().is_empty());
    }
}
