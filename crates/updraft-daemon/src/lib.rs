//! Updraft daemon library
//!
//! This module provides the core components for the Updraft daemon:
//! - Configuration layering and validation
//! - The reconciliation scheduler driving detect, fetch and deploy cycles
//! - An in-process prompt board answering approval requests
//! - REST API handlers and server lifecycle management

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod board;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod server;

pub use board::{PromptBoard, PromptView};
pub use catalog::Catalog;
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, SchedulerError};
pub use events::EventLog;
pub use scheduler::{CycleKind, CycleReport, Scheduler, SchedulerParts};
pub use server::Server;
