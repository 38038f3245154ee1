//! Control-plane abstraction

use crate::error::ControlPlaneError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use updraft_types::InstanceId;

/// Power state reported for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Unknown,
}

impl PowerState {
    /// Map a panel state string (`running`, `starting`, `stopping`, `offline`)
    pub fn from_panel(state: &str) -> Self {
        match state {
            "running" => PowerState::Running,
            "starting" => PowerState::Starting,
            "stopping" => PowerState::Stopping,
            "offline" | "stopped" => PowerState::Stopped,
            _ => PowerState::Unknown,
        }
    }
}

/// Power action sent to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
    /// Forced stop
    Kill,
}

impl PowerSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
            PowerSignal::Kill => "kill",
        }
    }
}

impl fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote management API for game server instances
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn power_state(&self, instance: &InstanceId) -> Result<PowerState, ControlPlaneError>;

    async fn set_power(
        &self,
        instance: &InstanceId,
        signal: PowerSignal,
    ) -> Result<(), ControlPlaneError>;

    /// Upload local files into `target_dir` of the instance as one batch
    async fn upload_files(
        &self,
        instance: &InstanceId,
        target_dir: &str,
        files: &[PathBuf],
    ) -> Result<(), ControlPlaneError>;
}
