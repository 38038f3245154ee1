//! Application state for API handlers

use crate::board::PromptBoard;
use crate::catalog::Catalog;
use crate::events::EventLog;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::broadcast;
use updraft_registry::VersionRegistry;
use updraft_types::UpdaterEventEnvelope;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Version registry
    pub registry: Arc<VersionRegistry>,

    /// Configured artifacts and servers
    pub catalog: Arc<Catalog>,

    /// Prompt board answering approval requests
    pub board: Arc<PromptBoard>,

    /// Scheduler handle
    pub scheduler: Arc<Scheduler>,

    /// Recent events
    pub events: Arc<EventLog>,

    /// Event broadcast channel
    pub event_tx: broadcast::Sender<UpdaterEventEnvelope>,

    /// Whether a control plane is configured
    pub deploys_enabled: bool,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        registry: Arc<VersionRegistry>,
        catalog: Arc<Catalog>,
        board: Arc<PromptBoard>,
        scheduler: Arc<Scheduler>,
        events: Arc<EventLog>,
        event_tx: broadcast::Sender<UpdaterEventEnvelope>,
    ) -> Self {
        Self {
            registry,
            catalog,
            board,
            scheduler,
            events,
            event_tx,
            deploys_enabled: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn with_deploys_enabled(mut self, enabled: bool) -> Self {
        self.deploys_enabled = enabled;
        self
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
