//! # Updraft Deploy
//!
//! Moves a server from the versions it runs to the versions staged for it.
//!
//! - [`ControlPlane`]: power and file operations on a managed instance, with
//!   [`PterodactylClient`] as the panel implementation
//! - [`OccupancyProbe`]: live player counts, best effort
//! - [`DeploymentOrchestrator`]: computes pending updates, gates the restart
//!   on approval, drives the control plane and records the result atomically

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod control;
pub mod error;
pub mod occupancy;
pub mod orchestrator;
pub mod pterodactyl;

pub use control::{ControlPlane, PowerSignal, PowerState};
pub use error::{ControlPlaneError, DeployError, ProbeError, Result};
pub use occupancy::{resolve_occupancy, MinecraftStatusProbe, OccupancyProbe};
pub use orchestrator::{
    DeployOutcome, DeployPlan, DeploySettings, DeployStep, DeploymentOrchestrator, PendingUpdate,
    ServerTarget,
};
pub use pterodactyl::PterodactylClient;
