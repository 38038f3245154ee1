//! Approval gate: post a decision request, wait a bounded time, resolve once

use crate::channel::{ApprovalChannel, SignalEvent};
use crate::error::{ApprovalError, Result};
use crate::prompt::{Prompt, Signal, Tone};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use updraft_types::{
    ArtifactId, ArtifactKey, ArtifactRef, EventSource, MessageId, ServerName, UpdaterEvent,
    UpdaterEventEnvelope, VersionId,
};

/// What a decision request is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSubject {
    /// Promote a detected version to approved
    Promotion {
        artifact: ArtifactId,
        version: VersionId,
        artifact_ref: ArtifactRef,
    },
    /// Restart a server into its staged updates
    Deployment {
        server: ServerName,
        runtime: Option<VersionId>,
        plugins: Vec<(ArtifactKey, VersionId)>,
        /// Live occupancy, resolved once when the request is built
        occupancy: u32,
        threshold: u32,
    },
}

impl DecisionSubject {
    /// Signals that resolve a request about this subject
    pub fn allowed_signals(&self) -> Vec<Signal> {
        match self {
            DecisionSubject::Deployment {
                occupancy,
                threshold,
                ..
            } if occupancy > threshold => vec![Signal::Override, Signal::Dismiss],
            _ => vec![Signal::Proceed, Signal::Dismiss],
        }
    }

    /// Short label used in logs and events
    pub fn summary(&self) -> String {
        match self {
            DecisionSubject::Promotion {
                artifact, version, ..
            } => format!("promote {} {}", artifact, version),
            DecisionSubject::Deployment { server, .. } => format!("deploy {}", server),
        }
    }

    fn render(&self, context: &DecisionContext) -> Prompt {
        match self {
            DecisionSubject::Promotion {
                artifact,
                version,
                artifact_ref,
            } => Prompt::new_version(
                artifact,
                version,
                artifact_ref.build.as_deref(),
                context.changelog_url.as_deref(),
                &context.affected_servers,
            ),
            DecisionSubject::Deployment {
                server,
                runtime,
                plugins,
                occupancy,
                threshold,
            } => Prompt::deployment(server, runtime.as_ref(), plugins, *occupancy, *threshold),
        }
    }
}

/// Extra rendering context for a request
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub changelog_url: Option<String>,
    pub affected_servers: Vec<ServerName>,
}

/// Correlates a posted prompt with the subject it decides.
///
/// Valid from [`ApprovalGate::request`] until the gate resolves it; after
/// that only [`ApprovalGate::conclude`] accepts it.
#[derive(Debug, Clone)]
pub struct DecisionHandle {
    pub message_id: MessageId,
    pub subject: DecisionSubject,
    pub allowed: Vec<Signal>,
    prompt: Prompt,
}

impl DecisionHandle {
    /// The prompt as originally posted
    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }
}

/// Terminal resolution of one decision request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved { actor: String, signal: Signal },
    Dismissed { actor: String },
    Expired,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved { .. })
    }
}

/// Outcome the caller reached after an approval, rendered onto the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conclusion {
    /// Version promoted
    Approved { actor: String },
    /// Version was superseded while the prompt was open
    Stale { latest: Option<VersionId> },
    /// Server restarted into the new versions
    Deployed,
    /// Deploy or promotion aborted after approval
    Failed { reason: String },
}

#[derive(Debug)]
struct PendingDecision {
    summary: String,
    deadline: Option<Instant>,
}

enum WaitOutcome {
    Signalled(SignalEvent),
    TimedOut,
    Abandoned,
}

/// Posts decision prompts and resolves each exactly once
pub struct ApprovalGate {
    channel: Arc<dyn ApprovalChannel>,
    pending: DashMap<MessageId, PendingDecision>,
    shutdown: Option<watch::Receiver<bool>>,
    event_tx: Option<broadcast::Sender<UpdaterEventEnvelope>>,
}

impl ApprovalGate {
    pub fn new(channel: Arc<dyn ApprovalChannel>) -> Self {
        Self {
            channel,
            pending: DashMap::new(),
            shutdown: None,
            event_tx: None,
        }
    }

    /// Abandon outstanding waits once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<UpdaterEventEnvelope>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Whether a request is still awaiting resolution
    pub fn is_pending(&self, message_id: &MessageId) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Time left before an awaited request expires
    pub fn remaining(&self, message_id: &MessageId) -> Option<Duration> {
        self.pending
            .get(message_id)
            .and_then(|p| p.deadline)
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Post a prompt for `subject` and register the outstanding request
    #[instrument(skip(self, context), fields(subject = %subject.summary()))]
    pub async fn request(
        &self,
        subject: DecisionSubject,
        context: DecisionContext,
    ) -> Result<DecisionHandle> {
        let allowed = subject.allowed_signals();
        let prompt = subject.render(&context).with_signals(&allowed);

        let message_id = self.channel.post(&prompt).await?;
        let summary = subject.summary();
        self.pending.insert(
            message_id.clone(),
            PendingDecision {
                summary: summary.clone(),
                deadline: None,
            },
        );

        info!(message = %message_id, "Decision requested");
        self.emit_event(UpdaterEvent::ApprovalRequested {
            message_id: message_id.clone(),
            subject: summary,
        });

        Ok(DecisionHandle {
            message_id,
            subject,
            allowed,
            prompt,
        })
    }

    /// Wait up to `timeout` for the first accepted signal.
    ///
    /// Signals outside the handle's allowed set are ignored and the wait
    /// continues. Exactly one caller resolves a handle; any other concurrent
    /// or later wait on it fails with [`ApprovalError::NotPending`].
    #[instrument(skip(self, handle), fields(message = %handle.message_id))]
    pub async fn await_decision(
        &self,
        handle: &DecisionHandle,
        timeout: Duration,
    ) -> Result<Decision> {
        let deadline = Instant::now() + timeout;
        match self.pending.get_mut(&handle.message_id) {
            Some(mut pending) => pending.deadline = Some(deadline),
            None => return Err(ApprovalError::NotPending(handle.message_id.clone())),
        }

        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break WaitOutcome::TimedOut;
            }

            let reaction = tokio::select! {
                reaction = self.channel.await_reaction(&handle.message_id, &handle.allowed, remaining) => reaction,
                _ = shutdown_requested(self.shutdown.clone()) => break WaitOutcome::Abandoned,
            };

            match reaction {
                Ok(Some(event)) if handle.allowed.contains(&event.signal) => {
                    break WaitOutcome::Signalled(event);
                }
                Ok(Some(event)) => {
                    debug!(
                        signal = %event.signal,
                        actor = %event.actor,
                        "Ignoring signal not accepted by this prompt"
                    );
                }
                Ok(None) => break WaitOutcome::TimedOut,
                Err(e) => {
                    self.pending.remove(&handle.message_id);
                    return Err(e.into());
                }
            }
        };

        let Some((_, pending)) = self.pending.remove(&handle.message_id) else {
            return Err(ApprovalError::NotPending(handle.message_id.clone()));
        };

        let decision = match outcome {
            WaitOutcome::Signalled(event) if event.signal.is_affirmative() => {
                info!(actor = %event.actor, signal = %event.signal, "Decision approved");
                Decision::Approved {
                    actor: event.actor,
                    signal: event.signal,
                }
            }
            WaitOutcome::Signalled(event) => {
                info!(actor = %event.actor, "Decision dismissed");
                let status = format!("Dismissed by {}", event.actor);
                self.render_terminal(handle, Tone::Muted, &status).await;
                self.emit_event(UpdaterEvent::ApprovalLapsed {
                    message_id: handle.message_id.clone(),
                    outcome: status,
                });
                Decision::Dismissed { actor: event.actor }
            }
            WaitOutcome::TimedOut => {
                info!(subject = %pending.summary, "Decision expired");
                self.render_terminal(handle, Tone::Muted, "Timed out").await;
                self.emit_event(UpdaterEvent::ApprovalLapsed {
                    message_id: handle.message_id.clone(),
                    outcome: "timed out".to_string(),
                });
                Decision::Expired
            }
            WaitOutcome::Abandoned => {
                info!(subject = %pending.summary, "Decision abandoned on shutdown");
                self.render_terminal(handle, Tone::Muted, "Abandoned: updater shut down")
                    .await;
                self.emit_event(UpdaterEvent::ApprovalLapsed {
                    message_id: handle.message_id.clone(),
                    outcome: "abandoned".to_string(),
                });
                Decision::Expired
            }
        };

        Ok(decision)
    }

    /// Render the caller's final outcome onto an approved prompt
    pub async fn conclude(&self, handle: &DecisionHandle, conclusion: Conclusion) {
        let (tone, status) = match conclusion {
            Conclusion::Approved { actor } => (Tone::Success, format!("Approved by {}", actor)),
            Conclusion::Stale { latest } => (
                Tone::Muted,
                match latest {
                    Some(latest) => format!("Superseded by {} before approval", latest),
                    None => "Superseded before approval".to_string(),
                },
            ),
            Conclusion::Deployed => (Tone::Success, "Deployed".to_string()),
            Conclusion::Failed { reason } => (Tone::Danger, format!("Update failed: {}", reason)),
        };
        self.render_terminal(handle, tone, &status).await;
    }

    async fn render_terminal(&self, handle: &DecisionHandle, tone: Tone, status: &str) {
        let prompt = handle.prompt.clone().concluded(tone, status);
        if let Err(e) = self.channel.edit(&handle.message_id, &prompt).await {
            warn!(message = %handle.message_id, error = %e, "Failed to edit prompt");
        }
        if let Err(e) = self.channel.clear_signals(&handle.message_id).await {
            warn!(message = %handle.message_id, error = %e, "Failed to clear prompt signals");
        }
    }

    fn emit_event(&self, event: UpdaterEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(UpdaterEventEnvelope::new(event, EventSource::Approval));
        }
    }
}

async fn shutdown_requested(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
