//! Event types for Updraft observability
//!
//! Events provide a unified stream of update lifecycle activities.

use crate::ids::{ArtifactId, ArtifactKey, MessageId, ServerName, VersionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all Updraft events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: UpdaterEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Reconciliation scheduler
    Scheduler,
    /// Approval gate
    Approval,
    /// Artifact fetcher
    Fetcher,
    /// Deployment orchestrator
    Deployment,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
    /// A live service may be degraded
    Critical,
}

/// Updraft events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpdaterEvent {
    // ═══════════════════════════════════════════════════════════════════
    // DETECTION & APPROVAL EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A source reported a new latest version
    VersionDetected {
        artifact: ArtifactId,
        version: VersionId,
        previous: Option<VersionId>,
    },

    /// A decision prompt was posted
    ApprovalRequested {
        message_id: MessageId,
        subject: String,
    },

    /// A new version was promoted
    VersionApproved {
        artifact: ArtifactId,
        version: VersionId,
    },

    /// An approval arrived after the version was superseded
    ApprovalStale {
        artifact: ArtifactId,
        requested: VersionId,
        latest: Option<VersionId>,
    },

    /// A prompt ended without approval
    ApprovalLapsed {
        message_id: MessageId,
        outcome: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // FETCH EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Approved bytes verified and staged
    ArtifactFetched {
        artifact: ArtifactId,
        version: VersionId,
    },

    /// Fetch aborted without advancing state
    FetchFailed {
        artifact: ArtifactId,
        version: VersionId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // DEPLOYMENT EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Deploy authorized and started
    DeploymentStarted {
        server: ServerName,
    },

    /// Instance restarted into the new versions
    DeploymentCompleted {
        server: ServerName,
        runtime: Option<VersionId>,
        plugins: Vec<ArtifactKey>,
    },

    /// Deploy prompt dismissed or timed out
    DeploymentDeclined {
        server: ServerName,
        reason: String,
    },

    /// Deploy aborted after the instance was stopped
    DeploymentFailed {
        server: ServerName,
        step: String,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // SCHEDULER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A cycle finished
    CycleCompleted {
        cycle: String,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },

    /// A trigger found the previous run of the same cycle still active
    CycleOverrun {
        cycle: String,
    },
}

impl UpdaterEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: UpdaterEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            actor: None,
            event,
        }
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Infer severity from event type
    fn infer_severity(event: &UpdaterEvent) -> EventSeverity {
        match event {
            UpdaterEvent::DeploymentFailed { .. } => EventSeverity::Critical,

            UpdaterEvent::FetchFailed { .. } => EventSeverity::Error,

            UpdaterEvent::ApprovalStale { .. }
            | UpdaterEvent::ApprovalLapsed { .. }
            | UpdaterEvent::DeploymentDeclined { .. }
            | UpdaterEvent::CycleOverrun { .. } => EventSeverity::Warning,

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_inference() {
        let failed = UpdaterEventEnvelope::new(
            UpdaterEvent::DeploymentFailed {
                server: "Lobby".into(),
                step: "start".into(),
                reason: "timeout".into(),
            },
            EventSource::Deployment,
        );
        assert_eq!(failed.severity, EventSeverity::Critical);

        let overrun = UpdaterEventEnvelope::new(
            UpdaterEvent::CycleOverrun {
                cycle: "fetch".into(),
            },
            EventSource::Scheduler,
        )
        .with_actor("scheduler");
        assert_eq!(overrun.severity, EventSeverity::Warning);
        assert_eq!(overrun.actor.as_deref(), Some("scheduler"));
    }
}
