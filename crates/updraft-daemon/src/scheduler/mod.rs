//! Reconciliation scheduler
//!
//! Three independent periodic cycles drive the update lifecycle:
//! - detect: ask every source for its newest version and open promotion prompts
//! - fetch: download and verify approved versions into the staging area
//! - deploy: restart servers whose staged versions differ from what they run
//!
//! A cycle never overlaps itself; a tick that fires while the previous run is
//! still active is reported as an overrun and skipped.

mod cycle;
mod reconciler;

pub use cycle::{CycleKind, CycleReport};
pub use reconciler::{Scheduler, SchedulerParts};
